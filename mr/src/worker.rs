//! Worker process side: serves `WorkerRpc` on top of a `LocalWorker`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{future, prelude::*};
use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{self, MrError};
use crate::handle::{LocalWorker, WorkerHandle};
use crate::rpc::{register_with, spawn, TaskFailure, WorkerRpc};
use crate::task::Task;

/// Time left for the last reply to reach the master before the listener is
/// torn down.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

#[derive(Clone)]
struct WorkerServer {
    local: Arc<LocalWorker>,
    stop: Arc<Notify>,
}

impl WorkerRpc for WorkerServer {
    async fn assign_task(self, _: context::Context, task: Task) -> Result<(), TaskFailure> {
        match self.local.assign(&task).await {
            Ok(()) => Ok(()),
            Err(MrError::WorkerBusy(_)) => Err(TaskFailure::Busy),
            Err(MrError::Crashed(_)) => {
                self.stop.notify_one();
                Err(TaskFailure::Crashed)
            }
            Err(err) => {
                warn!(%task, error = %err, "task failed");
                Err(TaskFailure::Execution(err.to_string()))
            }
        }
    }

    async fn shutdown(self, _: context::Context) -> usize {
        let completed = self.local.shutdown().await.unwrap_or_else(|_| self.local.completed());
        self.stop.notify_one();
        completed
    }
}

/// Serve `worker` on `listen`, register with the master at `master`, and run
/// until the master sends `shutdown` (or the worker crashes). Returns the
/// number of tasks completed.
///
/// `listen` must be an address the master can dial back.
pub async fn run_worker(
    master: SocketAddr,
    listen: SocketAddr,
    worker: LocalWorker,
    config: &Config,
) -> error::Result<usize> {
    let mut listener = tarpc::serde_transport::tcp::listen(&listen, Json::default)
        .await
        .map_err(|e| MrError::net(listen, e))?;
    listener.config_mut().max_frame_length(config.max_frame_length);
    let address = listener.local_addr();

    let local = Arc::new(worker);
    let stop = Arc::new(Notify::new());
    let server = WorkerServer {
        local: Arc::clone(&local),
        stop: Arc::clone(&stop),
    };
    let server_future = listener
        .filter_map(|r| future::ready(r.ok()))
        .map(server::BaseChannel::with_defaults)
        .map(move |channel| {
            channel
                .execute(WorkerRpc::serve(server.clone()))
                .for_each(spawn)
        })
        .buffer_unordered(10)
        .for_each(|_| async {});
    let serving = tokio::spawn(server_future);

    if let Err(err) = register_with(master, local.id(), address, config).await {
        serving.abort();
        return Err(err);
    }
    info!(worker = local.id(), %address, "registered with master");

    stop.notified().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    serving.abort();

    let completed = local.completed();
    info!(worker = local.id(), completed, "worker stopped");
    Ok(completed)
}
