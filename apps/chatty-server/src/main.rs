mod bridge;
mod config;
mod error;
mod gateway;
mod handlers;
mod protocol;
mod retry;
mod store;
mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::{error, info};

use crate::bridge::RedisBus;
use crate::config::{Cli, Config};
use crate::gateway::Gateway;
use crate::handlers::AppState;
use crate::retry::RetryPolicy;
use crate::store::Store;

const STORE_PROBE_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::try_from(cli).context("invalid configuration")?;
    let metrics = telemetry::init(&config)?;

    info!(
        port = config.port,
        environment = %config.environment,
        redis_url = %config.redis_url,
        "starting chatty gateway"
    );

    run(config, metrics).await
}

async fn run(config: Config, metrics: PrometheusHandle) -> Result<()> {
    // Startup order: store, then bus, then the listener. Only these initial
    // connection attempts are fatal; every later link loss is retried.
    let store = match Store::connect(&config.database_url).await {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "initial postgres connection failed");
            std::process::exit(1);
        }
    };
    let store_supervisor = store.spawn_supervisor(STORE_PROBE_INTERVAL, RetryPolicy::default());

    let bus = match RedisBus::open(&config.redis_url, RetryPolicy::default()).await {
        Ok(bus) => bus,
        Err(err) => {
            error!(error = %err, "initial redis connection failed");
            std::process::exit(1);
        }
    };

    let gateway = Gateway::new(bus);
    let ingest = gateway.spawn_bus_ingest();

    let state = Arc::new(AppState {
        gateway,
        metrics,
    });
    let router = handlers::router(state, config.client_origin.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("chatty gateway listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    // Teardown in reverse of startup: listener has drained, now stop the
    // fanout and the store supervision, then drop the links.
    ingest.abort();
    store_supervisor.abort();
    drop(store);
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
