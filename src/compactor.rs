use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::service::SchedulingService;

/// Background task that compacts the journal once `threshold` events were
/// appended since the last compaction, checking every `period`.
pub async fn run_compactor(service: Arc<SchedulingService>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appends = service.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match service.compact().await {
            Ok(()) => debug!(appends, "compactor ran"),
            Err(e) => warn!("compaction failed: {e}"),
        }
    }
}

/// Spawn [`run_compactor`] with the service's configured threshold and interval.
pub fn spawn_compactor(service: Arc<SchedulingService>) -> JoinHandle<()> {
    let threshold = service.config().compact_threshold;
    let period = service.config().compact_interval;
    tokio::spawn(run_compactor(service, threshold, period))
}
