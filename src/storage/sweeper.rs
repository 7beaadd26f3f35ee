//! Background expiry sweep
//!
//! Lazy expiry hides expired items on read but never frees them. The sweeper takes the
//! store's write lock once per tick and drops everything past its deadline.

use crate::metrics::Metrics;
use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle to a running sweep task. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    cancel: CancellationToken,
}

impl ExpirySweeper {
    /// Spawn the sweep task on the current tokio runtime
    pub fn start(store: Arc<Store>, interval: Duration, metrics: Option<Arc<Metrics>>) -> Self {
        let cancel = CancellationToken::new();
        tokio::spawn(sweep_loop(store, interval, metrics, cancel.clone()));

        info!(interval_ms = interval.as_millis(), "Expiry sweeper started");
        Self { cancel }
    }

    /// Stop the sweep task. Safe to call more than once.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            info!("Expiry sweeper stopped");
        }
    }

    /// Returns true once `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(
    store: Arc<Store>,
    period: Duration,
    metrics: Option<Arc<Metrics>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let removed = store.remove_expired();
        if removed > 0 {
            if let Some(metrics) = &metrics {
                metrics.expired_keys_removed.inc_by(removed as u64);
            }
            debug!(removed, "Expired keys swept");
        }
    }
}
