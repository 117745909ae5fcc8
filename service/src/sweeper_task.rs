//! Background sweep task with graceful shutdown.
//!
//! The sweep runs on a fixed interval, independent of request handling.
//! On shutdown the task finishes its current pass and exits.

use crate::metrics;
use hotspot_core::sweeper::ReconciliationSweeper;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawns the periodic reconciliation sweep.
///
/// The task stops when a message arrives on `shutdown`.
#[must_use]
pub fn spawn_sweeper(
    sweeper: Arc<ReconciliationSweeper>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_pass(&sweeper).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("sweeper stopping");
                    break;
                }
            }
        }
    })
}

async fn run_pass(sweeper: &ReconciliationSweeper) {
    match sweeper.run_once().await {
        Ok(outcome) => {
            metrics::record_sweep(outcome.expired_reservations, outcome.expired_purchases);
            if let Some(drift) = outcome.drift {
                if !drift.is_clean() {
                    tracing::warn!(
                        missing_on_device = drift.missing_on_device.len(),
                        unknown_on_device = drift.unknown_on_device.len(),
                        "store/device drift detected; operator review needed"
                    );
                    metrics::record_drift(&drift);
                }
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "sweep pass failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hotspot_core::capabilities::DeviceProvisioner;
    use hotspot_core::environment::Clock;
    use hotspot_core::memory::{InMemoryPurchaseStore, InMemoryTicketStore};
    use hotspot_core::store::{PurchaseStore, TicketStore};
    use hotspot_testing::mocks::{MockClock, MockProvisioner};

    #[tokio::test]
    async fn sweeper_task_stops_on_shutdown() {
        let sweeper = Arc::new(ReconciliationSweeper::new(
            Arc::new(InMemoryTicketStore::new()) as Arc<dyn TicketStore>,
            Arc::new(InMemoryPurchaseStore::new()) as Arc<dyn PurchaseStore>,
            Arc::new(MockProvisioner::new()) as Arc<dyn DeviceProvisioner>,
            Arc::new(MockClock::default()) as Arc<dyn Clock>,
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = spawn_sweeper(sweeper, Duration::from_millis(10), shutdown_rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
