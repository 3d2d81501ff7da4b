use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::info;

use mend_operator::{
    config::Config,
    dispatch::ToolDispatcher,
    ingest::Ingestor,
    metrics,
    policy::{self, PolicyCache},
    queue::create_queue,
    server::Server,
    store::create_store,
    worker::WorkerPool,
    Result,
};

/// The ingestor (producer) and worker pool (consumer) are independent roles
/// that share only the job queue; run them together or split them across
/// processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Alert webhook server: evaluates policies and enqueues jobs.
    Server,
    /// Worker pool: consumes jobs and executes remediations.
    Worker,
    /// Both roles in one process.
    All,
}

#[derive(Parser)]
#[command(name = "mend-operator", about = "Self-healing alert-to-remediation pipeline")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Role::All)]
    role: Role,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration: {:?}", config);

    metrics::register_metrics();

    // Initialize store
    let store = create_store(&config.database).await?;
    store.init().await?;

    if let Some(path) = &config.policy.seed_path {
        policy::seed_policies(&store, path).await?;
    }

    // Policy snapshot cache + background reloader
    let policies = Arc::new(PolicyCache::new(store.clone()));
    let loaded = policies.refresh().await?;
    info!(policies = loaded, "initial policy snapshot loaded");
    tokio::spawn(
        policies
            .clone()
            .run_reloader(config.policy.refresh_interval()),
    );

    let queue = create_queue(&config.queue).await?;
    let dispatcher = Arc::new(ToolDispatcher::from_config(&config.dispatch)?);

    let mut worker_handles = Vec::new();
    if matches!(cli.role, Role::Worker | Role::All) {
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            store.clone(),
            dispatcher,
            config.worker.clone(),
        ));
        worker_handles = pool.spawn();
    }

    if matches!(cli.role, Role::Server | Role::All) {
        let ingestor = Arc::new(Ingestor::new(
            policies.clone(),
            queue.clone(),
            store.clone(),
            config.worker.max_attempts,
        ));
        let server = Server::new(store, ingestor, policies);

        info!("Starting server on {}", config.server.addr);
        server.start(&config.server.addr).await?;
    } else {
        info!("Running worker role only");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
    }

    for handle in worker_handles {
        handle.abort();
    }

    Ok(())
}
