// src/observability/mod.rs
//! Tracing and metrics initialisation
//!
//! `RUST_LOG` selects the filter (default `info`); `LOG_FORMAT=json` switches
//! the subscriber to JSON lines.

use crate::utils::errors::{OptimizerError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Install the global tracing subscriber
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = if json_requested(std::env::var("LOG_FORMAT").ok().as_deref()) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| OptimizerError::Observability(e.to_string()))
}

/// Install the Prometheus recorder and return a handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| OptimizerError::Observability(e.to_string()))?;

    metrics::describe_counter!(
        "villager_optimizer_evictions_total",
        "Villagers removed by the chunk limit, labelled by class"
    );
    metrics::describe_counter!(
        "villager_optimizer_cache_misses_total",
        "Status cache lookups that had to build a new view"
    );
    Ok(handle)
}

fn json_requested(format: Option<&str>) -> bool {
    format.map_or(false, |f| f.eq_ignore_ascii_case("json"))
}
