//! Wire surface between master and workers: tarpc services over JSON/TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{future, prelude::*};
use tarpc::{
    client, context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{self, MrError};
use crate::handle::{Registrar, WorkerHandle};
use crate::task::Task;

/// Connections the master accepts at once; each worker holds one only while
/// registering.
const MAX_CHANNELS: usize = 128;
/// Deadline used when no call timeout is configured.
const UNBOUNDED_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

/// Why a worker refused or failed a task.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TaskFailure {
    Busy,
    Crashed,
    Execution(String),
}

#[tarpc::service]
pub trait MasterRpc {
    /// Worker `id`, listening on `address`, is ready for tasks.
    async fn register(id: String, address: String) -> Result<(), String>;
}

#[tarpc::service]
pub trait WorkerRpc {
    async fn assign_task(task: Task) -> Result<(), TaskFailure>;
    /// Stop serving; returns the number of tasks completed.
    async fn shutdown() -> usize;
}

/// Handle on a remote worker reached through `WorkerRpcClient`.
pub struct RpcWorker {
    id: String,
    address: String,
    client: WorkerRpcClient,
    call_timeout: Option<Duration>,
}

impl RpcWorker {
    /// Dial worker `id` at `address`. The id is the one the worker logs
    /// under and keys its entry in the job statistics.
    pub async fn connect(id: &str, address: &str, config: &Config) -> error::Result<Self> {
        let mut transport =
            tarpc::serde_transport::tcp::connect(address.to_string(), Json::default);
        transport.config_mut().max_frame_length(config.max_frame_length);
        let transport = transport.await.map_err(|e| MrError::net(address, e))?;

        let client = WorkerRpcClient::new(client::Config::default(), transport).spawn();
        Ok(RpcWorker {
            id: id.to_string(),
            address: address.to_string(),
            client,
            call_timeout: config.call_timeout,
        })
    }

    fn context(&self) -> context::Context {
        let mut ctx = context::current();
        ctx.deadline = Instant::now() + self.call_timeout.unwrap_or(UNBOUNDED_DEADLINE);
        ctx
    }

    fn rpc_error(&self, err: impl std::fmt::Display) -> MrError {
        MrError::Rpc {
            worker: format!("{}@{}", self.id, self.address),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl WorkerHandle for RpcWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn assign(&self, task: &Task) -> error::Result<()> {
        match self.client.assign_task(self.context(), task.clone()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(TaskFailure::Busy)) => Err(MrError::WorkerBusy(self.id.clone())),
            Ok(Err(TaskFailure::Crashed)) => Err(MrError::Crashed(self.id.clone())),
            Ok(Err(TaskFailure::Execution(message))) => Err(MrError::TaskFailed {
                worker: self.id.clone(),
                message,
            }),
            Err(err) => Err(self.rpc_error(err)),
        }
    }

    async fn shutdown(&self) -> error::Result<usize> {
        self.client
            .shutdown(self.context())
            .await
            .map_err(|err| self.rpc_error(err))
    }
}

#[derive(Clone)]
struct MasterServer {
    registrar: Registrar,
    config: Arc<Config>,
}

impl MasterRpc for MasterServer {
    async fn register(self, _: context::Context, id: String, address: String) -> Result<(), String> {
        let worker = match RpcWorker::connect(&id, &address, &self.config).await {
            Ok(worker) => worker,
            Err(err) => {
                warn!(worker = %id, %address, error = %err, "cannot reach registering worker");
                return Err(err.to_string());
            }
        };
        info!(worker = %id, %address, "worker dialled back");
        self.registrar
            .register(Arc::new(worker))
            .map_err(|e| e.to_string())
    }
}

pub(crate) async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Accept worker registrations on `addr` in the background and feed them to
/// `registrar`. Returns the address actually bound.
pub async fn serve_master(
    addr: SocketAddr,
    registrar: Registrar,
    config: Config,
) -> error::Result<SocketAddr> {
    let mut listener = tarpc::serde_transport::tcp::listen(&addr, Json::default)
        .await
        .map_err(|e| MrError::net(addr, e))?;
    listener.config_mut().max_frame_length(config.max_frame_length);
    let local_addr = listener.local_addr();

    let server = MasterServer {
        registrar,
        config: Arc::new(config),
    };
    let server_future = listener
        // Ignore accept errors.
        .filter_map(|r| future::ready(r.ok()))
        .map(server::BaseChannel::with_defaults)
        .map(move |channel| {
            channel
                .execute(MasterRpc::serve(server.clone()))
                .for_each(spawn)
        })
        .buffer_unordered(MAX_CHANNELS)
        .for_each(|_| async {});
    tokio::spawn(server_future);

    info!(%local_addr, "master accepting worker registrations");
    Ok(local_addr)
}

/// Tell the master at `master` that worker `id` is listening on `address`.
pub async fn register_with(
    master: SocketAddr,
    id: &str,
    address: SocketAddr,
    config: &Config,
) -> error::Result<()> {
    let mut transport = tarpc::serde_transport::tcp::connect(master, Json::default);
    transport.config_mut().max_frame_length(config.max_frame_length);
    let transport = transport.await.map_err(|e| MrError::net(master, e))?;

    let client = MasterRpcClient::new(client::Config::default(), transport).spawn();
    client
        .register(context::current(), id.to_string(), address.to_string())
        .await
        .map_err(|e| MrError::Registration(e.to_string()))?
        .map_err(MrError::Registration)
}
