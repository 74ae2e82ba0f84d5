use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservation proposals. Labels: outcome (`accepted` or an error label).
pub const PROPOSALS_TOTAL: &str = "courtside_proposals_total";

/// Histogram: propose latency in seconds, lock wait and WAL commit included.
pub const PROPOSE_DURATION_SECONDS: &str = "courtside_propose_duration_seconds";

/// Counter: lifecycle transitions applied. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "courtside_transitions_total";

/// Counter: match join attempts. Labels: outcome (`joined` or an error label).
pub const MATCH_JOINS_TOTAL: &str = "courtside_match_joins_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: courts currently loaded.
pub const RESOURCES_ACTIVE: &str = "courtside_resources_active";

/// Counter: WAL compactions run by the background compactor. Labels: status.
pub const COMPACTIONS_TOTAL: &str = "courtside_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtside_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtside_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
