mod apps;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use mr::{Config, Executor, LocalWorker};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::apps::App;

#[derive(Parser, Debug)]
#[command(version, about = "Execute map/reduce tasks for a master", long_about = None)]
struct Args {
    /// Address of the master's registration endpoint.
    #[arg(short, long, default_value = "127.0.0.1:50051")]
    master: SocketAddr,

    /// Address to serve tasks on; must be reachable from the master.
    #[arg(short, long, default_value = "127.0.0.1:0")]
    listen: SocketAddr,

    /// Directory shared with the master for intermediate files.
    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,

    /// Name used in logs on both sides and in the master's statistics.
    /// Defaults to `worker-<pid>`.
    #[arg(long)]
    id: Option<String>,

    #[arg(long, value_enum, default_value_t = App::WordCount)]
    app: App,

    /// Crash after accepting this many tasks.
    #[arg(long)]
    max_tasks: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::default().with_work_dir(&args.work_dir);
    let (map_fn, reduce_fn) = args.app.functions();
    let executor = Executor::new(map_fn, reduce_fn, &args.work_dir);

    let id = args
        .id
        .unwrap_or_else(|| format!("worker-{}", std::process::id()));
    let mut worker = LocalWorker::new(id, executor);
    if let Some(max_tasks) = args.max_tasks {
        worker = worker.fail_after(max_tasks);
    }

    let completed = mr::run_worker(args.master, args.listen, worker, &config).await?;
    info!(completed, "worker finished");
    Ok(())
}
