use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::executor::{Executor, MapFn, ReduceFn};
use crate::master::{JobStats, PhaseReport, PhaseRunner};
use crate::task::{Phase, Task};

/// Name under which the sequential runner reports its work.
pub const SEQUENTIAL_WORKER: &str = "sequential";

/// Runs each task in-process, in index order, with no concurrency and no
/// retries. Its output is the reference the distributed path must match.
pub struct Sequential {
    executor: Executor,
    completed: usize,
}

impl Sequential {
    pub fn new(map_fn: MapFn, reduce_fn: ReduceFn, work_dir: &Path) -> Self {
        Sequential {
            executor: Executor::new(map_fn, reduce_fn, work_dir),
            completed: 0,
        }
    }
}

#[async_trait]
impl PhaseRunner for Sequential {
    async fn run_phase(&mut self, phase: Phase, tasks: Vec<Task>) -> Result<PhaseReport> {
        info!(%phase, tasks = tasks.len(), "running phase sequentially");
        let mut report = PhaseReport::new(phase);
        for task in tasks {
            let executor = self.executor.clone();
            tokio::task::spawn_blocking(move || executor.execute(&task)).await??;
            self.completed += 1;
            *report
                .completions
                .entry(SEQUENTIAL_WORKER.to_string())
                .or_default() += 1;
        }
        Ok(report)
    }

    async fn finish(&mut self) -> Result<JobStats> {
        let mut stats = JobStats::default();
        stats.record(SEQUENTIAL_WORKER, std::mem::take(&mut self.completed));
        Ok(stats)
    }
}
