//! sqlherd Kubernetes Operator
//!
//! Runs the clustering control loop for every MySQLCluster on Kubernetes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sqlherd::agent::GrpcAgentFactory;
use sqlherd::clustering::{ClusterContext, ClusterManager};
use sqlherd::config::{humantime_serde::parse_duration, HerdConfig};
use sqlherd::dbop::SqlOperatorFactory;
use sqlherd::events::KubeEventRecorder;
use sqlherd::shutdown::{ShutdownCoordinator, SignalHandler};
use sqlherd::store::KubeStore;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod controller;
mod error;
mod metrics;

use controller::Controller;
use error::Error;

const CONTROLLER_NAME: &str = "sqlherd-operator";

#[derive(Parser, Debug)]
#[command(name = "sqlherd-operator")]
#[command(about = "Kubernetes Operator for replicated MySQL clusters")]
struct Args {
    /// Namespace to watch (empty for all namespaces)
    #[arg(short, long, default_value = "")]
    namespace: String,

    /// Metrics server port
    #[arg(short, long, default_value = "8080")]
    metrics_port: u16,

    /// Health check port
    #[arg(short = 'H', long, default_value = "8081")]
    health_port: u16,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interval between two evaluations of a cluster, e.g. `30s`
    #[arg(long)]
    check_interval: Option<String>,
}

fn load_config(args: &Args) -> Result<HerdConfig, Error> {
    let mut config = match &args.config {
        Some(path) => HerdConfig::from_file(path)?,
        None => HerdConfig::default(),
    };
    if let Some(interval) = &args.check_interval {
        config.check_interval = parse_duration(interval).map_err(Error::InvalidConfig)?;
    }
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!("Starting sqlherd Kubernetes Operator");
    info!(namespace = %args.namespace, check_interval = ?config.check_interval, "Watching namespace");

    let client = kube::Client::try_default().await?;
    let ctx = ClusterContext::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(SqlOperatorFactory::new()),
        Arc::new(GrpcAgentFactory::new()),
        Arc::new(KubeEventRecorder::new(client.clone(), CONTROLLER_NAME)),
        config,
    );
    let manager = Arc::new(ClusterManager::new(ctx));

    let metrics_handle = tokio::spawn(metrics::run_metrics_server(args.metrics_port));
    let health_handle = tokio::spawn(run_health_server(args.health_port));

    let coordinator = ShutdownCoordinator::new();
    let signals = SignalHandler::new(coordinator.clone());
    tokio::spawn(async move {
        if let Err(e) = signals.run().await {
            error!(error = %e, "Failed to install signal handlers");
        }
    });

    let controller = Controller::new(client, args.namespace.clone(), Arc::clone(&manager));
    let cluster_handle = tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            error!(error = %e, "Cluster controller error");
        }
    });

    info!("All controllers started");

    tokio::select! {
        _ = coordinator.wait_for_shutdown() => info!("Shutdown requested"),
        _ = cluster_handle => info!("Cluster controller stopped"),
        res = metrics_handle => error!(result = ?res, "Metrics server stopped"),
        res = health_handle => error!(result = ?res, "Health server stopped"),
    }

    manager.stop_all().await;
    info!("All clustering processes stopped");
    Ok(())
}

async fn run_health_server(port: u16) -> std::io::Result<()> {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, "Health server started");

    loop {
        let (mut socket, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;

            let response = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nOK";
            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}
