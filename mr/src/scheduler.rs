//! Task scheduling and fault tolerance for the distributed master.
//!
//! A single coordinating loop owns every piece of mutable scheduling state
//! (idle pool, pending indices, completion set, counters). Remote calls run
//! as independent tokio tasks and report back over a channel, so the loop
//! only ever reacts to two kinds of events: a worker joined, or an attempt
//! settled.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MrError, Result};
use crate::handle::SharedWorker;
use crate::master::{JobStats, PhaseReport, PhaseRunner};
use crate::task::{Phase, Task};

/// Result of one `assign` call, tagged with the phase epoch it belongs to.
struct Attempt {
    epoch: u64,
    index: usize,
    worker: SharedWorker,
    result: Result<()>,
}

/// Per-phase bookkeeping. Lives only for one `schedule` call.
struct PhaseState {
    tasks: Vec<Task>,
    pending: VecDeque<usize>,
    done: Vec<bool>,
    remaining: usize,
    report: PhaseReport,
}

impl PhaseState {
    fn new(phase: Phase, tasks: Vec<Task>) -> Self {
        let n = tasks.len();
        PhaseState {
            tasks,
            pending: (0..n).collect(),
            done: vec![false; n],
            remaining: n,
            report: PhaseReport::new(phase),
        }
    }

    /// Record a success; returns `true` if this completed the index.
    fn succeeded(&mut self, index: usize, worker: &str) -> bool {
        *self
            .report
            .completions
            .entry(worker.to_string())
            .or_default() += 1;
        if self.done[index] {
            return false;
        }
        self.done[index] = true;
        self.remaining -= 1;
        true
    }

    fn failed(&mut self, index: usize) {
        self.report.failures += 1;
        if !self.done[index] {
            self.pending.push_back(index);
        }
    }
}

pub struct Scheduler {
    config: Config,
    registrations: mpsc::UnboundedReceiver<SharedWorker>,
    registrations_open: bool,
    attempts_tx: mpsc::UnboundedSender<Attempt>,
    attempts: mpsc::UnboundedReceiver<Attempt>,
    /// Workers ready for a task, in the order they became ready.
    idle: VecDeque<SharedWorker>,
    /// Every worker ever registered, in registration order.
    workers: Vec<SharedWorker>,
    busy: HashSet<String>,
    dead: HashSet<String>,
    /// Confirmed successes per worker across all phases.
    completed: BTreeMap<String, usize>,
    in_flight: usize,
    epoch: u64,
}

impl Scheduler {
    pub fn new(config: Config, registrations: mpsc::UnboundedReceiver<SharedWorker>) -> Self {
        let (attempts_tx, attempts) = mpsc::unbounded_channel();
        Scheduler {
            config,
            registrations,
            registrations_open: true,
            attempts_tx,
            attempts,
            idle: VecDeque::new(),
            workers: Vec::new(),
            busy: HashSet::new(),
            dead: HashSet::new(),
            completed: BTreeMap::new(),
            in_flight: 0,
            epoch: 0,
        }
    }

    /// Run every task of `phase` to at least one successful completion.
    ///
    /// Failed attempts retire their worker and put the index back in the
    /// queue. If no live worker remains and none joins, this never returns.
    pub async fn schedule(&mut self, phase: Phase, tasks: Vec<Task>) -> Result<PhaseReport> {
        validate(phase, &tasks)?;
        self.epoch += 1;
        let mut state = PhaseState::new(phase, tasks);
        info!(%phase, tasks = state.tasks.len(), "scheduling phase");

        while state.remaining > 0 {
            self.dispatch(&mut state);
            tokio::select! {
                joined = self.registrations.recv(), if self.registrations_open => match joined {
                    Some(worker) => self.admit(worker),
                    None => {
                        debug!("registration channel closed");
                        self.registrations_open = false;
                    }
                },
                Some(attempt) = self.attempts.recv() => self.settle(attempt, Some(&mut state)),
            }
        }

        info!(
            %phase,
            failures = state.report.failures,
            workers = state.report.completions.len(),
            "phase complete"
        );
        Ok(state.report)
    }

    /// Wait until no attempt is outstanding. Results arriving here belong to
    /// finished phases and only update worker bookkeeping.
    pub async fn drain(&mut self) {
        while self.in_flight > 0 {
            tokio::select! {
                joined = self.registrations.recv(), if self.registrations_open => match joined {
                    Some(worker) => self.admit(worker),
                    None => self.registrations_open = false,
                },
                Some(attempt) = self.attempts.recv() => self.settle(attempt, None),
            }
        }
        while let Ok(worker) = self.registrations.try_recv() {
            self.admit(worker);
        }
    }

    /// Ask every worker that ever registered to stop and collect the number
    /// of tasks each one reports having completed. A retired worker may only
    /// have been slow, so it is asked too; workers that cannot be reached are
    /// logged and left out. The scheduler forgets all workers afterwards.
    pub async fn shutdown_workers(&mut self) -> JobStats {
        self.drain().await;

        let mut stats = JobStats::default();
        for worker in self.workers.drain(..) {
            let id = worker.id().to_string();
            let reply = match self.config.call_timeout {
                Some(limit) => tokio::time::timeout(limit, worker.shutdown())
                    .await
                    .unwrap_or_else(|_| {
                        Err(MrError::Timeout {
                            worker: id.clone(),
                            after: limit,
                        })
                    }),
                None => worker.shutdown().await,
            };
            match reply {
                Ok(count) => {
                    let confirmed = self.completed.get(&id).copied().unwrap_or(0);
                    if count != confirmed {
                        debug!(worker = %id, count, confirmed, "worker count differs from confirmed successes");
                    }
                    info!(worker = %id, completed = count, "worker shut down");
                    stats.record(id, count);
                }
                Err(err) if self.dead.contains(&id) => {
                    debug!(worker = %id, error = %err, "failed worker gone at shutdown")
                }
                Err(err) => warn!(worker = %id, error = %err, "worker unreachable at shutdown"),
            }
        }

        self.idle.clear();
        self.busy.clear();
        self.dead.clear();
        self.completed.clear();
        stats
    }

    /// Number of workers that registered and have not failed.
    pub fn live_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| !self.dead.contains(w.id()))
            .count()
    }

    /// Confirmed successful tasks of `worker` since the job started.
    pub fn completed_by(&self, worker: &str) -> usize {
        self.completed.get(worker).copied().unwrap_or(0)
    }

    fn dispatch(&mut self, state: &mut PhaseState) {
        while !state.pending.is_empty() {
            let Some(worker) = self.idle.pop_front() else {
                break;
            };
            let Some(index) = state.pending.pop_front() else {
                self.idle.push_front(worker);
                break;
            };
            if state.done[index] {
                self.idle.push_front(worker);
                continue;
            }
            self.launch(worker, state.tasks[index].clone());
        }
    }

    fn launch(&mut self, worker: SharedWorker, task: Task) {
        debug!(worker = worker.id(), %task, "assigning task");
        self.busy.insert(worker.id().to_string());
        self.in_flight += 1;

        let tx = self.attempts_tx.clone();
        let epoch = self.epoch;
        let call_timeout = self.config.call_timeout;
        let retry_delay = self.config.retry_delay;
        tokio::spawn(async move {
            let result = call_assign(&worker, &task, call_timeout).await;
            if result.is_err() && !retry_delay.is_zero() {
                tokio::time::sleep(retry_delay).await;
            }
            let _ = tx.send(Attempt {
                epoch,
                index: task.index(),
                worker,
                result,
            });
        });
    }

    fn settle(&mut self, attempt: Attempt, state: Option<&mut PhaseState>) {
        self.in_flight -= 1;
        let id = attempt.worker.id().to_string();
        self.busy.remove(&id);
        let state = state.filter(|_| attempt.epoch == self.epoch);

        match attempt.result {
            Ok(()) => {
                *self.completed.entry(id.clone()).or_default() += 1;
                match state {
                    Some(state) => {
                        if !state.succeeded(attempt.index, &id) {
                            debug!(worker = %id, index = attempt.index, "duplicate completion ignored");
                        }
                    }
                    None => debug!(worker = %id, index = attempt.index, "result from an earlier phase ignored"),
                }
                if !self.dead.contains(&id) {
                    self.idle.push_back(attempt.worker);
                }
            }
            Err(err) => {
                warn!(worker = %id, index = attempt.index, error = %err, "task attempt failed, retiring worker");
                self.dead.insert(id);
                if let Some(state) = state {
                    state.failed(attempt.index);
                }
            }
        }
    }

    fn admit(&mut self, worker: SharedWorker) {
        let id = worker.id().to_string();
        if self.busy.contains(&id) || self.idle.iter().any(|w| w.id() == id) {
            warn!(worker = %id, "duplicate registration ignored");
            return;
        }
        if self.dead.remove(&id) {
            info!(worker = %id, "failed worker registered again");
        } else {
            info!(worker = %id, "worker registered");
        }
        match self.workers.iter_mut().find(|w| w.id() == id) {
            Some(slot) => *slot = worker.clone(),
            None => self.workers.push(worker.clone()),
        }
        self.idle.push_back(worker);
    }
}

async fn call_assign(
    worker: &SharedWorker,
    task: &Task,
    call_timeout: Option<Duration>,
) -> Result<()> {
    match call_timeout {
        Some(limit) => tokio::time::timeout(limit, worker.assign(task))
            .await
            .unwrap_or_else(|_| {
                Err(MrError::Timeout {
                    worker: worker.id().to_string(),
                    after: limit,
                })
            }),
        None => worker.assign(task).await,
    }
}

fn validate(phase: Phase, tasks: &[Task]) -> Result<()> {
    for (position, task) in tasks.iter().enumerate() {
        let reason = if task.phase() != phase {
            format!("task {task} belongs to the {} phase", task.phase())
        } else if task.index() != position {
            format!("task at position {position} has index {}", task.index())
        } else if task.fan() == 0 {
            format!("task {task} has no partitions on the other side")
        } else {
            continue;
        };
        return Err(MrError::InvalidTasks {
            phase: phase.to_string(),
            reason,
        });
    }
    Ok(())
}

#[async_trait]
impl PhaseRunner for Scheduler {
    async fn run_phase(&mut self, phase: Phase, tasks: Vec<Task>) -> Result<PhaseReport> {
        self.schedule(phase, tasks).await
    }

    async fn finish(&mut self) -> Result<JobStats> {
        Ok(self.shutdown_workers().await)
    }
}
