//! Waitline HTTP server.
//!
//! Runs on the in-memory store unless `DATABASE_URL` is set; uses the mock
//! payment gateway unless `PAYMENT_PROVIDER=stripe`; asks the prediction
//! oracle for estimates only when `ANTHROPIC_API_KEY` is set.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waitline::collaborators::{ConsoleMailer, InMemoryNotifications};
use waitline::estimator::{ClaudeOracle, NoOracle, PredictionOracle};
use waitline::store::{InMemoryStore, PostgresStore, Store};
use waitline::{AppState, Config, Dependencies, build_router, metrics, payment_gateway};
use waitline_core::environment::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Waitline");

    // Metrics
    let metrics_addr: SocketAddr = format!("{}:{}", config.server.metrics_host, config.server.metrics_port)
        .parse()
        .context("invalid metrics address")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    metrics::register_business_metrics();
    info!(address = %metrics_addr, "Prometheus metrics available at /metrics");

    // Store
    let (store, database): (Arc<dyn Store>, _) = match &config.database {
        Some(database) => {
            info!("Connecting to PostgreSQL...");
            let store = PostgresStore::connect(database)
                .await
                .context("failed to connect to PostgreSQL")?;
            let pool = store.pool().clone();
            info!("PostgreSQL connected, migrations applied");
            (Arc::new(store), Some(pool))
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
            (Arc::new(InMemoryStore::new()), None)
        }
    };

    // Oracle
    let oracle: Arc<dyn PredictionOracle> = match ClaudeOracle::from_config(&config.oracle) {
        Some(oracle) => {
            info!(model = %config.oracle.model, "Wait-time oracle enabled");
            Arc::new(oracle)
        }
        None => {
            info!("No oracle API key; wait times use the hybrid model");
            Arc::new(NoOracle)
        }
    };

    info!(provider = ?config.payment.provider, "Payment gateway selected");
    let gateway = payment_gateway::from_config(&config.payment);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let prune_every = Duration::from_secs(config.websocket.room_prune_secs.max(1));

    let state = AppState::new(
        config,
        Dependencies {
            store,
            database,
            gateway,
            oracle,
            mailer: Arc::new(ConsoleMailer),
            notifications: Arc::new(InMemoryNotifications::new()),
            clock: Arc::new(SystemClock),
        },
    );
    let runner = state.engine.runner().clone();
    let pruner = state.broadcaster.spawn_pruner(prune_every);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Let in-flight emails and notifications finish
    if tokio::time::timeout(shutdown_timeout, runner.wait_idle())
        .await
        .is_err()
    {
        warn!(pending = runner.pending(), "Shutdown timeout; abandoning pending deliveries");
    }

    pruner.abort();
    info!("Server shut down");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
