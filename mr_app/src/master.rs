mod apps;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mr::{Config, Job, Master};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::apps::App;

#[derive(Parser, Debug)]
#[command(version, about = "Run a map/reduce job", long_about = None)]
struct Args {
    /// Name of the job; output goes to `mrtmp.<job>` in the work directory.
    #[arg(short, long, default_value = "mr")]
    job: String,

    /// Number of reduce partitions.
    #[arg(short = 'r', long, default_value_t = 1)]
    reduce: usize,

    /// Address to accept worker registrations on.
    #[arg(short, long, default_value = "127.0.0.1:50051")]
    listen: SocketAddr,

    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,

    /// Run every task in this process instead of on workers.
    #[arg(long)]
    sequential: bool,

    /// Application to run in sequential mode.
    #[arg(long, value_enum, default_value_t = App::WordCount)]
    app: App,

    /// Seconds before an unanswered task call counts as failed; 0 disables.
    #[arg(long, default_value_t = 30)]
    call_timeout_secs: u64,

    /// Input files, one map task each.
    #[arg(required = true)]
    files: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let call_timeout = (args.call_timeout_secs > 0).then(|| Duration::from_secs(args.call_timeout_secs));
    let config = Config::default()
        .with_work_dir(&args.work_dir)
        .with_call_timeout(call_timeout);
    let job = Job::new(args.job, args.files, args.reduce)?;

    let stats = if args.sequential {
        let (map_fn, reduce_fn) = args.app.functions();
        let master = Master::sequential(config, map_fn, reduce_fn);
        let stats = master.run(job.clone()).await?;
        info!(output = %master.output_path(&job).display(), "done");
        stats
    } else {
        let (master, registrar) = Master::distributed(config.clone());
        let addr = mr::serve_master(args.listen, registrar, config).await?;
        info!(%addr, "waiting for workers");
        let master = Arc::new(master);
        master.start(job.clone())?;
        let stats = master.wait().await?;
        info!(output = %master.output_path(&job).display(), "done");
        stats
    };

    for (worker, completed) in stats.iter() {
        println!("{worker}: {completed} tasks");
    }
    Ok(())
}
