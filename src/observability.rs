use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: wire requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "consult_requests_total";

/// Histogram: wire request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "consult_request_duration_seconds";

/// Counter: slot checks. Labels: outcome (accepted, no_availability, outside_hours, slot_taken).
pub const SLOT_DECISIONS_TOTAL: &str = "consult_slot_decisions_total";

/// Counter: appointment status changes. Labels: to.
pub const APPOINTMENT_TRANSITIONS_TOTAL: &str = "consult_appointment_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "consult_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "consult_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "consult_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "consult_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "consult_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "consult_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op when `port` is `None`.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
