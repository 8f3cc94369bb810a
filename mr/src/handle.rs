//! The master's view of a worker, and the channel workers join through.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::error::{MrError, Result};
use crate::executor::Executor;
use crate::task::Task;

/// A worker that executes one task at a time.
///
/// Callers never issue a second `assign` on a handle before the first one
/// returned, and never call `shutdown` while an `assign` is outstanding.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    /// Stable identity, used as the key in job statistics.
    fn id(&self) -> &str;

    /// Run `task` to completion on the worker.
    async fn assign(&self, task: &Task) -> Result<()>;

    /// Stop the worker and return how many tasks it completed.
    async fn shutdown(&self) -> Result<usize>;
}

pub type SharedWorker = Arc<dyn WorkerHandle>;

/// Producer side of the registration channel. Cheap to clone; registering
/// never blocks.
#[derive(Clone)]
pub struct Registrar {
    tx: mpsc::UnboundedSender<SharedWorker>,
}

impl Registrar {
    pub fn register(&self, worker: SharedWorker) -> Result<()> {
        debug!(worker = worker.id(), "worker announced itself");
        self.tx
            .send(worker)
            .map_err(|_| MrError::RegistrationClosed)
    }
}

pub fn registration_channel() -> (Registrar, mpsc::UnboundedReceiver<SharedWorker>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Registrar { tx }, rx)
}

/// In-process worker running tasks on the blocking thread pool.
///
/// Besides serving as the execution engine behind the RPC worker server, it
/// can simulate the failures a remote worker exhibits: a crash after a
/// number of tasks, an explicit kill, or a fixed slowdown per task.
pub struct LocalWorker {
    id: String,
    executor: Executor,
    busy: Arc<AtomicBool>,
    /// Signalled every time a running task releases `busy`.
    released: Arc<Notify>,
    alive: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
    accepted: AtomicUsize,
    fail_after: Option<usize>,
    delay: Option<Duration>,
}

impl LocalWorker {
    pub fn new(id: impl Into<String>, executor: Executor) -> Self {
        LocalWorker {
            id: id.into(),
            executor,
            busy: Arc::new(AtomicBool::new(false)),
            released: Arc::new(Notify::new()),
            alive: Arc::new(AtomicBool::new(true)),
            completed: Arc::new(AtomicUsize::new(0)),
            accepted: AtomicUsize::new(0),
            fail_after: None,
            delay: None,
        }
    }

    /// Crash once `tasks` assignments have been accepted: every later call
    /// fails.
    pub fn fail_after(mut self, tasks: usize) -> Self {
        self.fail_after = Some(tasks);
        self
    }

    /// Sleep for `delay` before executing each task.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Crash the worker now. A task already running still finishes its
    /// writes but is reported as failed.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Wait for a task still running in the background, including one whose
    /// caller already gave up on it.
    async fn settled(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.busy.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }

    fn crashed(&self) -> MrError {
        MrError::Crashed(self.id.clone())
    }
}

#[async_trait]
impl WorkerHandle for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn assign(&self, task: &Task) -> Result<()> {
        if !self.is_alive() {
            return Err(self.crashed());
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(MrError::WorkerBusy(self.id.clone()));
        }
        if let Some(limit) = self.fail_after {
            if self.accepted.fetch_add(1, Ordering::SeqCst) >= limit {
                self.kill();
                self.busy.store(false, Ordering::SeqCst);
                return Err(self.crashed());
            }
        }

        // The work runs detached: if the caller gives up on this call the
        // task still runs to the end, like a slow remote process would.
        let executor = self.executor.clone();
        let task = task.clone();
        let delay = self.delay;
        let busy = Arc::clone(&self.busy);
        let released = Arc::clone(&self.released);
        let alive = Arc::clone(&self.alive);
        let completed = Arc::clone(&self.completed);
        let running = tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let result = tokio::task::spawn_blocking(move || executor.execute(&task))
                .await
                .map_err(MrError::from)
                .and_then(|r| r);
            let survived = alive.load(Ordering::SeqCst);
            if result.is_ok() && survived {
                completed.fetch_add(1, Ordering::SeqCst);
            }
            busy.store(false, Ordering::SeqCst);
            released.notify_waiters();
            (result, survived)
        });

        match running.await? {
            (_, false) => Err(self.crashed()),
            (result, true) => result,
        }
    }

    async fn shutdown(&self) -> Result<usize> {
        if !self.is_alive() {
            return Err(self.crashed());
        }
        self.settled().await;
        if !self.alive.swap(false, Ordering::SeqCst) {
            return Err(self.crashed());
        }
        Ok(self.completed())
    }
}
