use std::path::PathBuf;
use std::time::Duration;

/// Runtime knobs shared by the master, the scheduler and workers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding intermediate, reduce-output and merged files.
    pub work_dir: PathBuf,
    /// Upper bound on a single remote call. `None` waits for the transport
    /// to report an error on its own.
    pub call_timeout: Option<Duration>,
    /// Pause before a failed task index is offered to another worker.
    pub retry_delay: Duration,
    pub max_frame_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            work_dir: PathBuf::from("."),
            call_timeout: Some(Duration::from_secs(30)),
            retry_delay: Duration::from_millis(10),
            max_frame_length: usize::MAX,
        }
    }
}

impl Config {
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = Config::default()
            .with_work_dir("/tmp/mr")
            .with_call_timeout(None)
            .with_retry_delay(Duration::from_millis(1));

        assert_eq!(config.work_dir, PathBuf::from("/tmp/mr"));
        assert!(config.call_timeout.is_none());
        assert_eq!(config.retry_delay, Duration::from_millis(1));
    }
}
