//! Observability setup: structured logging and metrics for the sharding core.
//!
//! The library records through the `metrics` facade only; installing an
//! exporter is left to the embedding process.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,shardex=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

/// Record one logical statement call (`query`, `update`, `execute`, `batch`).
pub fn record_statement_metrics(kind: &'static str, duration_us: u64, success: bool) {
    metrics::counter!("shardex_statements_total", "kind" => kind, "success" => success.to_string())
        .increment(1);
    metrics::histogram!("shardex_statement_duration_us", "kind" => kind).record(duration_us as f64);
}

/// Record how many route units one logical statement fanned out to.
pub fn record_route_fanout(units: usize) {
    metrics::histogram!("shardex_route_units").record(units as f64);
}

/// Record which merge strategy served a query.
pub fn record_merge_strategy(strategy: &'static str) {
    metrics::counter!("shardex_merge_total", "strategy" => strategy).increment(1);
}

/// Record unit-level failures of one logical call.
pub fn record_unit_failures(count: usize) {
    metrics::counter!("shardex_unit_failures_total").increment(count as u64);
}
