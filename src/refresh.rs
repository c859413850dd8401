use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::tenant::CacheState;

/// Background task that periodically reloads the tenant cache until
/// `shutdown` flips to true (or its sender is dropped). A failed reload keeps
/// the previous map and is retried on the next tick.
pub(crate) async fn run_refresher(
    state: Arc<CacheState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match state.reload().await {
                    Ok(count) => debug!("tenant cache refreshed with {count} tenants"),
                    Err(e) => {
                        warn!("tenant cache refresh failed, keeping stale entries: {e}");
                        metrics::counter!(crate::observability::TENANT_CACHE_REFRESH_FAILURES_TOTAL)
                            .increment(1);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("stopped periodic tenant cache refresh");
}
