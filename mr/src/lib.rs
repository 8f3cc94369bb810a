//! A fault-tolerant map/reduce master.
//!
//! The [`Master`] runs a [`Job`] through a map phase, a reduce phase and a
//! final merge. In distributed mode the [`Scheduler`] hands tasks to workers
//! that join at any time through a [`Registrar`], retries tasks whose worker
//! failed, and only lets the reduce phase start once every map task has
//! succeeded. [`Sequential`] runs the same job in-process and serves as the
//! reference output.

pub mod config;
pub mod error;
pub mod executor;
pub mod handle;
pub mod job;
pub mod master;
pub mod record;
pub mod rpc;
pub mod scheduler;
pub mod sequential;
pub mod task;
pub mod worker;

pub use config::Config;
pub use error::{MrError, Result};
pub use executor::{Executor, MapFn, ReduceFn};
pub use handle::{LocalWorker, Registrar, SharedWorker, WorkerHandle};
pub use job::Job;
pub use master::{JobState, JobStats, Master, PhaseReport, PhaseRunner};
pub use record::KeyValue;
pub use rpc::{serve_master, RpcWorker};
pub use scheduler::Scheduler;
pub use sequential::Sequential;
pub use task::{Phase, Task, TaskKind};
pub use worker::run_worker;
