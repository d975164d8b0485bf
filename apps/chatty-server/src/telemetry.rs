use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Install the Prometheus metrics recorder and the tracing subscriber.
/// RUST_LOG wins when set; otherwise production runs at info and everything
/// else at debug.
pub fn init(config: &Config) -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")?;

    let default_filter = if config.is_production() {
        "info"
    } else {
        "chatty_server=debug,info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    Ok(handle)
}
