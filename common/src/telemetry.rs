// Telemetry module for structured logging and metrics

use crate::models::BlockVerdict;
use anyhow::{Context, Result};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log filter for the configured level; `RUST_LOG` wins when set
pub fn log_filter(log_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("Invalid log level '{log_level}'")),
    }
}

/// Install the JSON log subscriber
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(log_level: &str) -> Result<()> {
    let layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_line_number(true)
        .with_filter(log_filter(log_level)?);

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .context("Tracing subscriber already installed")?;

    tracing::info!(log_level, "Logging initialized");
    Ok(())
}

/// Expose the scheduling counters on `0.0.0.0:<port>/metrics`
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let listen = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!("jobs_created_total", "Jobs handed to the engine, by action");
    describe_counter!(
        "authorization_denied_total",
        "Operations rejected by the authorization gate, by action"
    );
    describe_counter!(
        "blockout_evaluations_total",
        "Triggers evaluated against the block calendar, by verdict"
    );

    tracing::info!(%listen, "Metrics exporter listening");
    Ok(())
}

#[inline]
pub fn record_job_created(action: &str) {
    counter!("jobs_created_total", "action" => action.to_string()).increment(1);
}

#[inline]
pub fn record_authorization_denied(action: &str) {
    counter!("authorization_denied_total", "action" => action.to_string()).increment(1);
}

/// Count one blockout evaluation, labelled with its verdict
#[inline]
pub fn record_blockout_evaluation(verdict: BlockVerdict) {
    let verdict = match verdict {
        BlockVerdict::NotBlocked => "not_blocked",
        BlockVerdict::PartiallyBlocked => "partially_blocked",
        BlockVerdict::FullyBlocked => "fully_blocked",
    };
    counter!("blockout_evaluations_total", "verdict" => verdict).increment(1);
}
