use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{MrError, Result};
use crate::executor::{MapFn, ReduceFn};
use crate::handle::{registration_channel, Registrar};
use crate::job::{self, Job};
use crate::scheduler::Scheduler;
use crate::sequential::Sequential;
use crate::task::{Phase, Task};

/// Lifecycle of the job a master is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    MapPhase,
    ReducePhase,
    Merging,
    Done,
    Failed,
}

impl JobState {
    fn accepts_new_job(self) -> bool {
        matches!(self, JobState::Created | JobState::Done | JobState::Failed)
    }
}

/// Successful completions per worker during one phase. Duplicate
/// completions of the same index are counted here too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub completions: BTreeMap<String, usize>,
    pub failures: usize,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        PhaseReport {
            phase,
            completions: BTreeMap::new(),
            failures: 0,
        }
    }
}

/// Completed-task counters reported by each worker at shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    per_worker: BTreeMap<String, usize>,
}

impl JobStats {
    pub fn record(&mut self, worker: impl Into<String>, completed: usize) {
        self.per_worker.insert(worker.into(), completed);
    }

    pub fn get(&self, worker: &str) -> Option<usize> {
        self.per_worker.get(worker).copied()
    }

    pub fn len(&self) -> usize {
        self.per_worker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_worker.is_empty()
    }

    pub fn total(&self) -> usize {
        self.per_worker.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.per_worker.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Workers that were shut down without having completed anything.
    pub fn idle_workers(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, completed)| *completed == 0)
            .map(|(worker, _)| worker)
    }
}

/// How a master gets the tasks of one phase executed.
#[async_trait]
pub trait PhaseRunner: Send {
    /// Return once every task has completed successfully at least once.
    async fn run_phase(&mut self, phase: Phase, tasks: Vec<Task>) -> Result<PhaseReport>;

    /// Release the workers and report how much each one did.
    async fn finish(&mut self) -> Result<JobStats>;
}

/// Drives a job through map, reduce and merge, one job at a time.
pub struct Master<R> {
    config: Config,
    runner: tokio::sync::Mutex<R>,
    state: Mutex<JobState>,
    outcome: watch::Sender<Option<Result<JobStats>>>,
}

impl Master<Scheduler> {
    /// A master that hands tasks to workers joining through the returned
    /// `Registrar`.
    pub fn distributed(config: Config) -> (Self, Registrar) {
        let (registrar, registrations) = registration_channel();
        let scheduler = Scheduler::new(config.clone(), registrations);
        (Master::new(config, scheduler), registrar)
    }
}

impl Master<Sequential> {
    /// A master that runs every task in-process, one after another.
    pub fn sequential(config: Config, map_fn: MapFn, reduce_fn: ReduceFn) -> Self {
        let runner = Sequential::new(map_fn, reduce_fn, &config.work_dir);
        Master::new(config, runner)
    }
}

impl<R: PhaseRunner> Master<R> {
    pub fn new(config: Config, runner: R) -> Self {
        let (outcome, _) = watch::channel(None);
        Master {
            config,
            runner: tokio::sync::Mutex::new(runner),
            state: Mutex::new(JobState::Created),
            outcome,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the merged output of `job`.
    pub fn output_path(&self, job: &Job) -> PathBuf {
        self.config.work_dir.join(job::merged_name(job.name()))
    }

    /// Run `job` to completion and return the per-worker statistics. The
    /// outcome is also published to `wait`.
    pub async fn run(&self, job: Job) -> Result<JobStats> {
        self.begin()?;
        let outcome = self.drive(&job).await;
        self.complete(outcome)
    }

    /// Start `job` in the background. Configuration problems are reported
    /// here; everything after that is reported through `wait`.
    pub fn start(self: &Arc<Self>, job: Job) -> Result<()>
    where
        R: 'static,
    {
        self.begin()?;
        let master = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = master.drive(&job).await;
            let _ = master.complete(outcome);
        });
        Ok(())
    }

    /// Block until the current job has finished, then return its outcome.
    /// Every call after that returns the same outcome until a new job starts.
    pub async fn wait(&self) -> Result<JobStats> {
        let mut rx = self.outcome.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| MrError::Join("master dropped before the job finished".to_string()))?;
        match &*outcome {
            Some(result) => result.clone(),
            None => Err(MrError::Join("job outcome missing".to_string())),
        }
    }

    /// Remove every file `job` left in the work directory.
    pub fn cleanup(&self, job: &Job) -> Result<()> {
        job::cleanup(job, &self.config.work_dir)
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.accepts_new_job() {
            return Err(MrError::JobInProgress(*state));
        }
        *state = JobState::MapPhase;
        self.outcome.send_replace(None);
        Ok(())
    }

    fn set_state(&self, next: JobState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    async fn drive(&self, job: &Job) -> Result<JobStats> {
        info!(
            job = job.name(),
            files = job.n_map(),
            n_reduce = job.n_reduce(),
            "starting map/reduce job"
        );

        let stats = {
            let mut runner = self.runner.lock().await;
            runner
                .run_phase(Phase::Map, Task::for_phase(job, Phase::Map))
                .await?;
            // the map barrier has released: every intermediate file exists
            self.set_state(JobState::ReducePhase);
            runner
                .run_phase(Phase::Reduce, Task::for_phase(job, Phase::Reduce))
                .await?;
            runner.finish().await?
        };

        self.set_state(JobState::Merging);
        let merge_job = job.clone();
        let work_dir = self.config.work_dir.clone();
        let output = tokio::task::spawn_blocking(move || job::merge(&merge_job, &work_dir)).await??;

        if stats.is_empty() {
            warn!(job = job.name(), "no worker answered at shutdown");
        }
        for worker in stats.idle_workers() {
            warn!(job = job.name(), worker, "worker registered but completed no tasks");
        }
        info!(job = job.name(), output = %output.display(), "map/reduce job completed");
        Ok(stats)
    }

    fn complete(&self, outcome: Result<JobStats>) -> Result<JobStats> {
        match &outcome {
            Ok(_) => self.set_state(JobState::Done),
            Err(err) => {
                warn!(error = %err, "map/reduce job failed");
                self.set_state(JobState::Failed);
            }
        }
        self.outcome.send_replace(Some(outcome.clone()));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::KeyValue;
    use std::time::Duration;

    /// Runner that records phase order and can be held inside a phase.
    struct StubRunner {
        log: Arc<Mutex<Vec<Phase>>>,
        gate: Option<Arc<tokio::sync::Notify>>,
        fail_reduce: bool,
    }

    #[async_trait]
    impl PhaseRunner for StubRunner {
        async fn run_phase(&mut self, phase: Phase, _tasks: Vec<Task>) -> Result<PhaseReport> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.log.lock().unwrap().push(phase);
            if phase == Phase::Reduce && self.fail_reduce {
                return Err(MrError::Crashed("stub".to_string()));
            }
            Ok(PhaseReport::new(phase))
        }

        async fn finish(&mut self) -> Result<JobStats> {
            let mut stats = JobStats::default();
            stats.record("stub", 2);
            Ok(stats)
        }
    }

    fn stub(gate: Option<Arc<tokio::sync::Notify>>, fail_reduce: bool) -> (StubRunner, Arc<Mutex<Vec<Phase>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            StubRunner {
                log: Arc::clone(&log),
                gate,
                fail_reduce,
            },
            log,
        )
    }

    /// Job whose reduce output exists up front, so merging succeeds.
    fn prepared_job(dir: &std::path::Path) -> Job {
        let job = Job::new("stub", vec!["unused".to_string()], 1).unwrap();
        crate::record::write_records(
            &dir.join(job::result_name("stub", 0)),
            &[KeyValue::new("k", "v")],
        )
        .unwrap();
        job
    }

    #[tokio::test]
    async fn test_run_walks_the_phases_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, log) = stub(None, false);
        let master = Master::new(Config::default().with_work_dir(dir.path()), runner);
        assert_eq!(master.state(), JobState::Created);

        let job = prepared_job(dir.path());
        let stats = master.run(job.clone()).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![Phase::Map, Phase::Reduce]);
        assert_eq!(stats.get("stub"), Some(2));
        assert_eq!(master.state(), JobState::Done);
        assert_eq!(
            std::fs::read_to_string(master.output_path(&job)).unwrap(),
            "k: v\n"
        );
    }

    #[tokio::test]
    async fn test_second_job_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(tokio::sync::Notify::new());
        let (runner, _log) = stub(Some(Arc::clone(&gate)), false);
        let master = Arc::new(Master::new(
            Config::default().with_work_dir(dir.path()),
            runner,
        ));
        let job = prepared_job(dir.path());

        master.start(job.clone()).unwrap();
        assert_eq!(master.state(), JobState::MapPhase);
        assert!(matches!(
            master.start(job.clone()),
            Err(MrError::JobInProgress(JobState::MapPhase))
        ));

        release(&gate).await;
        release(&gate).await;
        master.wait().await.unwrap();
        assert_eq!(master.state(), JobState::Done);

        // a finished master takes the next job
        master.start(job).unwrap();
        release(&gate).await;
        release(&gate).await;
        master.wait().await.unwrap();
    }

    /// Let one gated phase through and give it time to run.
    async fn release(gate: &tokio::sync::Notify) {
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_wait_returns_same_outcome_twice() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _log) = stub(None, false);
        let master = Arc::new(Master::new(
            Config::default().with_work_dir(dir.path()),
            runner,
        ));

        master.start(prepared_job(dir.path())).unwrap();
        let first = master.wait().await.unwrap();
        let second = master.wait().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_wait_before_start_blocks() {
        let (runner, _log) = stub(None, false);
        let master = Master::new(Config::default(), runner);

        let waited = tokio::time::timeout(Duration::from_millis(50), master.wait()).await;

        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_runner_failure_reaches_wait() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _log) = stub(None, true);
        let master = Arc::new(Master::new(
            Config::default().with_work_dir(dir.path()),
            runner,
        ));

        master.start(prepared_job(dir.path())).unwrap();

        assert!(matches!(master.wait().await, Err(MrError::Crashed(_))));
        assert_eq!(master.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn test_missing_reduce_output_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _log) = stub(None, false);
        let master = Master::new(Config::default().with_work_dir(dir.path()), runner);
        let job = Job::new("absent", vec!["unused".to_string()], 1).unwrap();

        let err = master.run(job).await.unwrap_err();

        assert!(matches!(err, MrError::MissingOutput { partition: 0, .. }));
        assert!(matches!(
            master.wait().await,
            Err(MrError::MissingOutput { .. })
        ));
    }

    #[test]
    fn test_idle_workers() {
        let mut stats = JobStats::default();
        assert!(stats.is_empty());
        stats.record("a", 3);
        stats.record("b", 0);

        assert_eq!(stats.idle_workers().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.len(), 2);
        assert!(!stats.is_empty());
    }
}
