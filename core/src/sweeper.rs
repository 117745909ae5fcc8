//! Background reconciliation.
//!
//! The sweeper runs periodically and independently of request handling. It
//! recycles lapsed reservations, settles abandoned purchases, and compares
//! the store's sold tickets against the device's active credential list.
//! Drift is reported, never auto-corrected: deleting a device credential
//! for a sold ticket would cut off a paying customer, so mismatches go to
//! an operator instead.

use crate::allocator::InventoryAllocator;
use crate::capabilities::DeviceProvisioner;
use crate::environment::Clock;
use crate::error::{AllocError, StoreError};
use crate::store::{PurchaseStore, TicketStore};
use crate::types::{PurchaseOutcome, TicketState};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Mismatch between the ticket store and the device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Usernames of sold tickets with no active credential on the device
    pub missing_on_device: Vec<String>,
    /// Active device credentials with no ticket record in the store
    pub unknown_on_device: Vec<String>,
}

impl DriftReport {
    /// True when store and device agree.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_on_device.is_empty() && self.unknown_on_device.is_empty()
    }
}

/// Result of one sweep pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Lapsed reservations returned to the pool
    pub expired_reservations: u64,
    /// Abandoned purchases settled as expired
    pub expired_purchases: u64,
    /// Drift findings; `None` when the device was unreachable and the
    /// comparison was skipped
    pub drift: Option<DriftReport>,
}

/// Periodic reconciliation between ticket store, purchases, and device.
pub struct ReconciliationSweeper {
    tickets: Arc<dyn TicketStore>,
    purchases: Arc<dyn PurchaseStore>,
    allocator: InventoryAllocator,
    provisioner: Arc<dyn DeviceProvisioner>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationSweeper {
    /// Creates a sweeper over the given stores and device.
    #[must_use]
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        purchases: Arc<dyn PurchaseStore>,
        provisioner: Arc<dyn DeviceProvisioner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let allocator = InventoryAllocator::new(Arc::clone(&tickets), Arc::clone(&clock));
        Self {
            tickets,
            purchases,
            allocator,
            provisioner,
            clock,
        }
    }

    /// Runs one full sweep: reservation expiry, purchase settlement, drift
    /// detection.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails; an unreachable device only
    /// skips the drift comparison.
    pub async fn run_once(&self) -> Result<SweepOutcome, StoreError> {
        let now = self.clock.now();

        let expired_reservations = self
            .allocator
            .expire_stale(now)
            .await
            .map_err(flatten_alloc)?;

        let expired_purchases = self.expire_abandoned_purchases().await?;

        let drift = self.detect_drift().await?;

        if expired_reservations > 0 || expired_purchases > 0 {
            tracing::info!(
                expired_reservations,
                expired_purchases,
                "sweep recycled stale claims"
            );
        }

        Ok(SweepOutcome {
            expired_reservations,
            expired_purchases,
            drift,
        })
    }

    /// Settles pending purchases whose reservation has been lost.
    async fn expire_abandoned_purchases(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut expired = 0;

        for purchase in self.purchases.list_pending().await? {
            let Some(ticket_id) = purchase.ticket_id else {
                continue;
            };
            let ticket = match self.tickets.get(ticket_id).await {
                Ok(ticket) => ticket,
                Err(StoreError::TicketNotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            if !purchase.reservation_lost(&ticket, now) {
                continue;
            }

            match self
                .purchases
                .compare_and_set_outcome(
                    purchase.id,
                    PurchaseOutcome::Pending,
                    PurchaseOutcome::Expired,
                    None,
                    now,
                )
                .await
            {
                Ok(_) => {
                    tracing::info!(purchase_id = %purchase.id, "abandoned purchase expired");
                    expired += 1;
                }
                // A payment callback settled it first.
                Err(StoreError::StaleOutcome { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(expired)
    }

    /// Compares sold tickets against the device's active credentials.
    async fn detect_drift(&self) -> Result<Option<DriftReport>, StoreError> {
        let active = match self.provisioner.list_active_credentials().await {
            Ok(active) => active,
            Err(err) => {
                tracing::warn!(error = %err, "device unreachable, skipping drift detection");
                return Ok(None);
            }
        };
        let active_set: HashSet<&str> = active.iter().map(String::as_str).collect();

        let sold = self.tickets.list_by_state(TicketState::Sold).await?;
        let mut report = DriftReport::default();

        for ticket in &sold {
            if !active_set.contains(ticket.username.as_str()) {
                tracing::warn!(
                    ticket_id = %ticket.id,
                    username = %ticket.username,
                    "drift: sold ticket has no active credential on the device"
                );
                report.missing_on_device.push(ticket.username.clone());
            }
        }

        for username in &active {
            if self.tickets.find_by_username(username).await?.is_none() {
                tracing::warn!(
                    username = %username,
                    "drift: device credential has no ticket record"
                );
                report.unknown_on_device.push(username.clone());
            }
        }

        Ok(Some(report))
    }
}

/// Collapses allocator errors into store errors for the sweep path; the
/// expiry pass can only fail through the store.
fn flatten_alloc(err: AllocError) -> StoreError {
    match err {
        AllocError::Store(err) => err,
        AllocError::OutOfStock { .. } | AllocError::InvalidState { .. } => {
            StoreError::Backend(err.to_string())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryPurchaseStore, InMemoryTicketStore};
    use crate::store::StateFields;
    use crate::types::{Money, NewTicket, Purchase, PurchaseId, TicketTypeId};
    use chrono::Duration;
    use hotspot_testing::mocks::{MockClock, MockProvisioner};

    struct Fixture {
        tickets: Arc<InMemoryTicketStore>,
        purchases: Arc<InMemoryPurchaseStore>,
        provisioner: Arc<MockProvisioner>,
        clock: Arc<MockClock>,
        sweeper: ReconciliationSweeper,
        type_id: TicketTypeId,
    }

    async fn fixture(usernames: &[&str]) -> Fixture {
        let tickets = Arc::new(InMemoryTicketStore::new());
        let purchases = Arc::new(InMemoryPurchaseStore::new());
        let provisioner = Arc::new(MockProvisioner::new());
        let clock = Arc::new(MockClock::default());

        let ticket_type = tickets
            .find_or_create_type("BASIC", None, None, Money::from_cents(500))
            .await
            .unwrap();
        let rows = usernames
            .iter()
            .map(|u| NewTicket {
                username: (*u).to_string(),
                password: "pw".to_string(),
                type_id: ticket_type.id,
                comment: None,
            })
            .collect();
        tickets.bulk_insert(rows).await.unwrap();

        let sweeper = ReconciliationSweeper::new(
            Arc::clone(&tickets) as Arc<dyn TicketStore>,
            Arc::clone(&purchases) as Arc<dyn PurchaseStore>,
            Arc::clone(&provisioner) as Arc<dyn DeviceProvisioner>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        Fixture {
            tickets,
            purchases,
            provisioner,
            clock,
            sweeper,
            type_id: ticket_type.id,
        }
    }

    async fn sell(fx: &Fixture, username: &str, payment_ref: &str) {
        let ticket = fx.tickets.find_by_username(username).await.unwrap().unwrap();
        let now = fx.clock.now();
        fx.tickets
            .compare_and_set_state(
                ticket.id,
                TicketState::Available,
                TicketState::Reserved,
                StateFields::Reservation {
                    reserved_by: "claimant".to_string(),
                    reserved_at: now,
                    expires_at: now + Duration::minutes(5),
                },
            )
            .await
            .unwrap();
        fx.tickets
            .compare_and_set_state(
                ticket.id,
                TicketState::Reserved,
                TicketState::Sold,
                StateFields::Sale {
                    sold_to: payment_ref.to_string(),
                    sold_at: now,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sweep_expires_reservations_and_their_purchases() {
        let fx = fixture(&["a"]).await;
        let mut purchase = Purchase::new(
            PurchaseId::new(),
            fx.type_id,
            "student-1".to_string(),
            None,
            fx.clock.now(),
        );
        let claimant = purchase.claimant();

        let ticket = fx.tickets.find_by_username("a").await.unwrap().unwrap();
        let now = fx.clock.now();
        fx.tickets
            .compare_and_set_state(
                ticket.id,
                TicketState::Available,
                TicketState::Reserved,
                StateFields::Reservation {
                    reserved_by: claimant,
                    reserved_at: now,
                    expires_at: now + Duration::minutes(5),
                },
            )
            .await
            .unwrap();
        purchase.ticket_id = Some(ticket.id);
        fx.purchases.insert(purchase.clone()).await.unwrap();

        fx.clock.advance(Duration::minutes(6));
        let outcome = fx.sweeper.run_once().await.unwrap();

        assert_eq!(outcome.expired_reservations, 1);
        assert_eq!(outcome.expired_purchases, 1);
        assert_eq!(
            fx.purchases.get(purchase.id).await.unwrap().outcome,
            PurchaseOutcome::Expired
        );
        assert_eq!(
            fx.tickets.get(ticket.id).await.unwrap().state,
            TicketState::Available
        );
    }

    #[tokio::test]
    async fn drift_flags_both_directions() {
        let fx = fixture(&["a", "b"]).await;
        sell(&fx, "a", "pay-1").await;
        sell(&fx, "b", "pay-2").await;

        // "a" is on the device, "b" is missing, "ghost" is unknown.
        fx.provisioner.activate("a");
        fx.provisioner.activate("ghost");

        let outcome = fx.sweeper.run_once().await.unwrap();
        let drift = outcome.drift.unwrap();

        assert_eq!(drift.missing_on_device, vec!["b".to_string()]);
        assert_eq!(drift.unknown_on_device, vec!["ghost".to_string()]);
        assert!(!drift.is_clean());

        // Reporting never mutates: the sold ticket stays sold and the
        // unknown credential stays active.
        assert_eq!(
            fx.tickets
                .find_by_username("b")
                .await
                .unwrap()
                .unwrap()
                .state,
            TicketState::Sold
        );
        assert!(fx.provisioner.active().contains(&"ghost".to_string()));
    }

    #[tokio::test]
    async fn unreachable_device_skips_drift_but_still_expires() {
        let fx = fixture(&["a"]).await;
        fx.provisioner.set_offline(true);

        let ticket = fx.tickets.find_by_username("a").await.unwrap().unwrap();
        let now = fx.clock.now();
        fx.tickets
            .compare_and_set_state(
                ticket.id,
                TicketState::Available,
                TicketState::Reserved,
                StateFields::Reservation {
                    reserved_by: "claimant".to_string(),
                    reserved_at: now,
                    expires_at: now + Duration::minutes(1),
                },
            )
            .await
            .unwrap();

        fx.clock.advance(Duration::minutes(2));
        let outcome = fx.sweeper.run_once().await.unwrap();

        assert_eq!(outcome.expired_reservations, 1);
        assert!(outcome.drift.is_none());
    }

    #[tokio::test]
    async fn clean_sweep_reports_no_drift() {
        let fx = fixture(&["a"]).await;
        sell(&fx, "a", "pay-1").await;
        fx.provisioner.activate("a");

        let outcome = fx.sweeper.run_once().await.unwrap();
        assert!(outcome.drift.unwrap().is_clean());
    }
}
