//! lapor-node — service binary for the lapor platform.
//!
//! One subcommand per service. Every service connects to the shared
//! event stream, opens its own store(s), and runs its HTTP surface and
//! background tasks until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use lapor_core::auth::TokenService;
use lapor_core::bus::{self, ConsumerConfig, EventHandler, EventStream};
use lapor_core::config::ServiceConfig;
use lapor_core::events::STREAM_NAME;
use lapor_core::sla::SlaConfig;

use lapor_node::citizen::{self, CitizenStore, StatusFeedConsumer};
use lapor_node::intake::{self, IntakeStore};
use lapor_node::operations::{self, CaseRouter, OperationsStore};
use lapor_node::projection::{ProjectionWorker, ReplicaStore, PROJECTION_GROUP};
use lapor_node::query::{self, QueryStore};
use lapor_node::workflow::{self, WorkflowConsumer, WorkflowStore, SWEEP_PERIOD};

/// Per-request timeout on every HTTP surface.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// How long background tasks get to finish after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "lapor-node")]
#[command(version, about = "Service node for the lapor citizen-reporting platform")]
struct Cli {
    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Citizen-facing service: submissions, upvotes, feeds
    Citizen,
    /// Officer-facing service: inbox, status transitions, case routing
    Operations,
    /// Workflow service: SLA jobs, notifications, breach sweeper
    Workflow,
    /// Projection fan-out worker over the replica set
    Projection,
    /// Read-only query service over the replica set
    Query,
    /// Operator intake service: phoned-in reports and corrections
    Intake,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Citizen => run_citizen().await,
        Commands::Operations => run_operations().await,
        Commands::Workflow => run_workflow().await,
        Commands::Projection => run_projection().await,
        Commands::Query => run_query().await,
        Commands::Intake => run_intake().await,
    }
}

async fn run_citizen() -> Result<()> {
    let config = ServiceConfig::from_env("8080", "citizen-1")?;
    let stream = EventStream::open(&config.bus_path).context("failed to open event stream")?;
    let store = CitizenStore::open(&config.store_path("citizen.db"))
        .context("failed to open citizen store")?;
    let state = citizen::CitizenState {
        store: store.clone(),
        stream: stream.clone(),
        tokens: TokenService::from_env(),
        instance_id: config.instance_id.clone(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let consumer = spawn_consumer(
        stream,
        citizen::REPORTING_GROUP,
        config.instance_id.clone(),
        Arc::new(StatusFeedConsumer::new(store)),
        shutdown.clone(),
    );

    info!(instance = %config.instance_id, "Citizen service starting");
    serve(citizen::router(state), config.server_port, shutdown).await?;
    drain(vec![consumer]).await;
    Ok(())
}

async fn run_operations() -> Result<()> {
    let config = ServiceConfig::from_env("8082", "operations-1")?;
    let stream = EventStream::open(&config.bus_path).context("failed to open event stream")?;
    let store = OperationsStore::open(&config.store_path("operations.db"))
        .context("failed to open operations store")?;
    let state = operations::OperationsState {
        store: store.clone(),
        stream: stream.clone(),
        tokens: TokenService::from_env(),
        instance_id: config.instance_id.clone(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let consumer = spawn_consumer(
        stream,
        operations::OPERATIONS_GROUP,
        config.instance_id.clone(),
        Arc::new(CaseRouter::new(store)),
        shutdown.clone(),
    );

    info!(instance = %config.instance_id, "Operations service starting");
    serve(operations::router(state), config.server_port, shutdown).await?;
    drain(vec![consumer]).await;
    Ok(())
}

async fn run_workflow() -> Result<()> {
    let config = ServiceConfig::from_env("8083", "workflow-1")?;
    let stream = EventStream::open(&config.bus_path).context("failed to open event stream")?;
    let store = WorkflowStore::open(&config.store_path("workflow.db"))
        .context("failed to open workflow store")?;
    let sla = Arc::new(SlaConfig::default());
    let state = workflow::WorkflowState {
        store: store.clone(),
        sla: sla.clone(),
        tokens: TokenService::from_env(),
        instance_id: config.instance_id.clone(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let consumer = spawn_consumer(
        stream.clone(),
        workflow::WORKFLOW_GROUP,
        config.instance_id.clone(),
        Arc::new(WorkflowConsumer::new(store.clone(), sla)),
        shutdown.clone(),
    );
    let sweeper = tokio::spawn(workflow::run_sweeper(
        store,
        stream,
        SWEEP_PERIOD,
        shutdown.clone(),
    ));

    info!(instance = %config.instance_id, "Workflow service starting");
    serve(workflow::router(state), config.server_port, shutdown).await?;
    drain(vec![consumer, sweeper]).await;
    Ok(())
}

async fn run_projection() -> Result<()> {
    let config = ServiceConfig::from_env("0", "projection-1")?;
    let stream = EventStream::open(&config.bus_path).context("failed to open event stream")?;

    let mut replicas = Vec::new();
    for path in config.replica_paths() {
        match ReplicaStore::open(&path) {
            Ok(replica) => {
                info!(path = %path.display(), "Connected to replica");
                replicas.push(replica);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "Skipping replica"),
        }
    }
    let worker = ProjectionWorker::new(replicas)
        .map_err(|e| anyhow::anyhow!("failed to start projection worker: {e}"))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let consumer = spawn_consumer(
        stream,
        PROJECTION_GROUP,
        config.instance_id.clone(),
        Arc::new(worker),
        shutdown.clone(),
    );

    info!(instance = %config.instance_id, "Projection worker starting");
    wait_for_signal().await;
    shutdown.store(true, Ordering::Relaxed);
    drain(vec![consumer]).await;
    Ok(())
}

async fn run_query() -> Result<()> {
    let config = ServiceConfig::from_env("8081", "query-1")?;
    let store = QueryStore::open(&config.replica_paths())
        .context("failed to open any query replica")?;
    let state = query::QueryState {
        store,
        instance_id: config.instance_id.clone(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    info!(instance = %config.instance_id, "Query service starting");
    serve(query::router(state), config.server_port, shutdown).await
}

async fn run_intake() -> Result<()> {
    let config = ServiceConfig::from_env("8084", "intake-1")?;
    let stream = EventStream::open(&config.bus_path).context("failed to open event stream")?;
    let store = IntakeStore::open(&config.store_path("intake.db"))
        .context("failed to open intake store")?;
    let state = intake::IntakeState {
        store,
        stream,
        tokens: TokenService::from_env(),
        instance_id: config.instance_id.clone(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    info!(instance = %config.instance_id, "Intake service starting");
    serve(intake::router(state), config.server_port, shutdown).await
}

/// Spawns a consume loop for `group` with this instance's consumer name.
fn spawn_consumer(
    stream: EventStream,
    group: &'static str,
    consumer_name: String,
    handler: Arc<dyn EventHandler>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = bus::consume(
            stream,
            STREAM_NAME,
            group,
            &consumer_name,
            handler,
            ConsumerConfig::default(),
            shutdown,
        )
        .await
        {
            warn!(group = group, error = %err, "Consumer loop exited with error");
        }
    })
}

/// Serves the router until the shutdown signal, then flips the flag so
/// background tasks wind down too.
async fn serve(router: Router, port: u16, shutdown: Arc<AtomicBool>) -> Result<()> {
    let router = router
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            shutdown.store(true, Ordering::Relaxed);
        })
        .await
        .context("server error")?;

    info!("HTTP server stopped");
    Ok(())
}

async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
    } else {
        info!("Shutdown signal received");
    }
}

/// Waits for background tasks, bounded by the shutdown grace period.
async fn drain(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("Background task did not stop within the grace period");
        }
    }
}
