//! Error types shared by the master, the scheduler and the workers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::master::JobState;

/// Result type for map/reduce operations
pub type Result<T> = std::result::Result<T, MrError>;

/// Every failure the library can report.
///
/// The type is `Clone` so a finished job's outcome can be handed to any
/// number of `Master::wait` callers.
#[derive(Error, Debug, Clone)]
pub enum MrError {
    /// Job parameters rejected before anything ran
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Task list handed to a phase does not describe that phase
    #[error("invalid {phase} task set: {reason}")]
    InvalidTasks { phase: String, reason: String },

    /// A job was started while another one is still running
    #[error("a job is already running (state: {0:?})")]
    JobInProgress(JobState),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("network error on {addr}: {source}")]
    Net {
        addr: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("malformed record in {path}: {message}")]
    Serialization { path: PathBuf, message: String },

    #[error("rpc to {worker} failed: {message}")]
    Rpc { worker: String, message: String },

    #[error("call to {worker} timed out after {after:?}")]
    Timeout { worker: String, after: Duration },

    #[error("worker {worker} failed task: {message}")]
    TaskFailed { worker: String, message: String },

    #[error("worker {0} is already running a task")]
    WorkerBusy(String),

    #[error("worker {0} has crashed")]
    Crashed(String),

    /// A reduce partition has no output although its phase completed
    #[error("reduce output for partition {partition} of job {job} is missing ({path})")]
    MissingOutput {
        job: String,
        partition: usize,
        path: PathBuf,
    },

    #[error("worker registration rejected: {0}")]
    Registration(String),

    #[error("registration channel closed")]
    RegistrationClosed,

    #[error("background task aborted: {0}")]
    Join(String),
}

impl MrError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub fn net(addr: impl ToString, source: io::Error) -> Self {
        Self::Net {
            addr: addr.to_string(),
            source: Arc::new(source),
        }
    }

    pub fn serialization(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for MrError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_path() {
        let err = MrError::io("mrtmp.test-0-0", io::Error::from(io::ErrorKind::NotFound));
        let message = err.to_string();
        assert!(message.contains("mrtmp.test-0-0"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = MrError::Timeout {
            worker: "w1".to_string(),
            after: Duration::from_secs(2),
        };
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
