use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "careslot_bookings_total";

/// Histogram: end-to-end booking latency in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "careslot_booking_duration_seconds";

/// Counter: appointments cancelled to undo a booking whose resource was unavailable.
pub const COMPENSATIONS_TOTAL: &str = "careslot_compensations_total";

/// Counter: reserve attempts rejected because the slot was taken.
pub const DOUBLE_BOOKINGS_TOTAL: &str = "careslot_double_bookings_total";

/// Counter: appointment status transitions. Labels: status.
pub const STATUS_TRANSITIONS_TOTAL: &str = "careslot_status_transitions_total";

/// Counter: resource occupancy transitions. Labels: event.
pub const RESOURCE_TRANSITIONS_TOTAL: &str = "careslot_resource_transitions_total";

/// Counter: critical sections abandoned after waiting too long for the lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "careslot_lock_timeouts_total";

// ── Journal metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "careslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "careslot_wal_flush_batch_size";

/// Counter: completed journal compactions.
pub const COMPACTIONS_TOTAL: &str = "careslot_compactions_total";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Returns false if a global subscriber was already set.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
