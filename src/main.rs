use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln::config::ServiceConfig;
use kiln::service::Service;
use kiln::shutdown::run_until_signal;
use kiln::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Multi-tenant remote code execution service")]
struct Args {
    /// Root directory for per-job workspaces
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Maximum containers running at once
    #[arg(long)]
    max_containers: Option<usize>,

    /// Minimum worker count
    #[arg(long)]
    min_workers: Option<usize>,

    /// Maximum worker count
    #[arg(long)]
    max_workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ServiceConfig::from_env();
    if let Some(root) = args.workspace_root {
        config.workspace_root = root;
    }
    if let Some(max) = args.max_containers {
        config.max_concurrent_containers = max;
    }
    if let Some(min) = args.min_workers {
        config.min_workers = min;
    }
    if let Some(max) = args.max_workers {
        config.max_workers = max.max(config.min_workers);
    }

    tracing::info!(
        workspace_root = %config.workspace_root.display(),
        max_containers = config.max_concurrent_containers,
        workers = ?(config.min_workers, config.max_workers),
        "Starting kiln"
    );

    let store = Arc::new(MemoryStore::new());
    let service = Service::start(config, store).await?;

    run_until_signal(service).await?;
    Ok(())
}
