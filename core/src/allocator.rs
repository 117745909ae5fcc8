//! Concurrency-safe ticket allocation.
//!
//! The allocator never takes a lock of its own: every transition is one
//! compare-and-set against the store, and the reserve path retries down the
//! candidate list when it loses a race on a specific ticket. Oldest-first
//! candidate ordering gives FIFO consumption of a batch under low
//! contention; under high contention allocation stays correct (at most one
//! claimant per ticket) even if strict FIFO order is not preserved.

use crate::environment::Clock;
use crate::error::{AllocError, StoreError};
use crate::store::{StateFields, TicketStore};
use crate::types::{Ticket, TicketId, TicketState, TicketTypeId};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Reserves, confirms, and releases tickets by type.
#[derive(Clone)]
pub struct InventoryAllocator {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
}

impl InventoryAllocator {
    /// Creates an allocator over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Reserves the oldest available ticket of `type_id` for `claimant`.
    ///
    /// Walks the available tickets oldest-first and attempts a
    /// `Available -> Reserved` compare-and-set on each. A CAS loss means a
    /// concurrent reserver won that specific ticket, so the loop moves on
    /// to the next candidate; the loop is bounded by the number of
    /// available tickets.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfStock`] when no available ticket of the
    /// type remains after exhausting all candidates.
    pub async fn reserve(
        &self,
        type_id: TicketTypeId,
        claimant: &str,
        ttl: Duration,
    ) -> Result<Ticket, AllocError> {
        let candidates = self
            .store
            .list_by_type_and_state(type_id, TicketState::Available)
            .await?;

        for candidate in candidates {
            let now = self.clock.now();
            let expires_at = now + ttl;
            match self
                .store
                .compare_and_set_state(
                    candidate.id,
                    TicketState::Available,
                    TicketState::Reserved,
                    StateFields::Reservation {
                        reserved_by: claimant.to_string(),
                        reserved_at: now,
                        expires_at,
                    },
                )
                .await
            {
                Ok(ticket) => {
                    tracing::debug!(
                        ticket_id = %ticket.id,
                        %type_id,
                        claimant,
                        %expires_at,
                        "ticket reserved"
                    );
                    return Ok(ticket);
                }
                // Lost the race on this ticket; try the next-oldest.
                Err(StoreError::StaleState { .. } | StoreError::TicketNotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Err(AllocError::OutOfStock { type_id })
    }

    /// Confirms a reservation, transitioning the ticket to `Sold`.
    ///
    /// Requires the ticket to be currently reserved by `claimant` with an
    /// unexpired reservation: a buyer whose reservation already timed out
    /// (and may have been reassigned) cannot confirm it.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidState`] if the reservation expired,
    /// belongs to a different claimant, or the ticket is not reserved.
    pub async fn confirm(
        &self,
        ticket_id: TicketId,
        claimant: &str,
        payment_ref: &str,
    ) -> Result<Ticket, AllocError> {
        let now = self.clock.now();
        let ticket = self.store.get(ticket_id).await?;
        Self::check_live_reservation(&ticket, claimant, now)?;

        match self
            .store
            .compare_and_set_state(
                ticket_id,
                TicketState::Reserved,
                TicketState::Sold,
                StateFields::Sale {
                    sold_to: payment_ref.to_string(),
                    sold_at: now,
                },
            )
            .await
        {
            Ok(ticket) => {
                tracing::info!(
                    ticket_id = %ticket.id,
                    claimant,
                    payment_ref,
                    "ticket sold"
                );
                Ok(ticket)
            }
            Err(StoreError::StaleState { actual, .. }) => Err(AllocError::InvalidState {
                reason: format!("ticket {ticket_id} moved to {actual} before confirmation"),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Releases a reservation back to the available pool.
    ///
    /// Used on explicit cancellation or payment failure.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidState`] if the ticket is not reserved
    /// by `claimant`.
    pub async fn release(&self, ticket_id: TicketId, claimant: &str) -> Result<Ticket, AllocError> {
        let ticket = self.store.get(ticket_id).await?;
        if ticket.state != TicketState::Reserved || ticket.reserved_by.as_deref() != Some(claimant)
        {
            return Err(AllocError::InvalidState {
                reason: format!(
                    "ticket {ticket_id} is not reserved by {claimant} (state {})",
                    ticket.state
                ),
            });
        }

        match self
            .store
            .compare_and_set_state(
                ticket_id,
                TicketState::Reserved,
                TicketState::Available,
                StateFields::Clear,
            )
            .await
        {
            Ok(ticket) => {
                tracing::debug!(ticket_id = %ticket.id, claimant, "reservation released");
                Ok(ticket)
            }
            Err(StoreError::StaleState { actual, .. }) => Err(AllocError::InvalidState {
                reason: format!("ticket {ticket_id} moved to {actual} before release"),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Releases every reservation whose expiry has passed.
    ///
    /// Tickets that a concurrent confirmation already moved to `Sold` fail
    /// the compare-and-set and are skipped. Returns the number of tickets
    /// returned to the pool.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, AllocError> {
        let reserved = self.store.list_by_state(TicketState::Reserved).await?;
        let mut released = 0;

        for ticket in reserved {
            // Re-read so a reservation renewed since the scan is not
            // clobbered.
            let current = match self.store.get(ticket.id).await {
                Ok(current) => current,
                Err(StoreError::TicketNotFound { .. }) => continue,
                Err(err) => return Err(err.into()),
            };
            if !current.is_reservation_expired(now) {
                continue;
            }

            match self
                .store
                .compare_and_set_state(
                    current.id,
                    TicketState::Reserved,
                    TicketState::Available,
                    StateFields::Clear,
                )
                .await
            {
                Ok(_) => {
                    tracing::info!(
                        ticket_id = %current.id,
                        reserved_by = current.reserved_by.as_deref().unwrap_or(""),
                        "stale reservation expired"
                    );
                    released += 1;
                }
                // A concurrent confirm or release got there first.
                Err(StoreError::StaleState { .. } | StoreError::TicketNotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(released)
    }

    /// Voids an available ticket, removing it from circulation.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidState`] if the ticket is reserved or
    /// sold.
    pub async fn void(&self, ticket_id: TicketId) -> Result<Ticket, AllocError> {
        match self
            .store
            .compare_and_set_state(
                ticket_id,
                TicketState::Available,
                TicketState::Void,
                StateFields::Clear,
            )
            .await
        {
            Ok(ticket) => {
                tracing::info!(ticket_id = %ticket.id, "ticket voided");
                Ok(ticket)
            }
            Err(StoreError::StaleState { actual, .. }) => Err(AllocError::InvalidState {
                reason: format!("ticket {ticket_id} is {actual}, only available tickets can be voided"),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn check_live_reservation(
        ticket: &Ticket,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AllocError> {
        if ticket.state != TicketState::Reserved {
            return Err(AllocError::InvalidState {
                reason: format!("ticket {} is {}, not reserved", ticket.id, ticket.state),
            });
        }
        if ticket.reserved_by.as_deref() != Some(claimant) {
            return Err(AllocError::InvalidState {
                reason: format!("ticket {} is reserved by a different claimant", ticket.id),
            });
        }
        if ticket.is_reservation_expired(now) {
            return Err(AllocError::InvalidState {
                reason: format!("reservation on ticket {} has expired", ticket.id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTicketStore;
    use crate::types::{Money, NewTicket};
    use hotspot_testing::mocks::MockClock;

    async fn seed(store: &Arc<InMemoryTicketStore>, usernames: &[&str]) -> TicketTypeId {
        let ticket_type = store
            .find_or_create_type("BASIC", Some("24h"), None, Money::from_cents(500))
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
        store.bulk_insert(rows).await.unwrap();
        ticket_type.id
    }

    fn allocator(store: &Arc<InMemoryTicketStore>, clock: &Arc<MockClock>) -> InventoryAllocator {
        InventoryAllocator::new(
            Arc::clone(store) as Arc<dyn TicketStore>,
            Arc::clone(clock) as Arc<dyn Clock>,
        )
    }

    #[tokio::test]
    async fn reserve_picks_oldest_available_first() {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let type_id = seed(&store, &["a", "b"]).await;
        let allocator = allocator(&store, &clock);

        let first = allocator
            .reserve(type_id, "buyer-1", Duration::minutes(5))
            .await
            .unwrap();
        let second = allocator
            .reserve(type_id, "buyer-2", Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(first.username, "a");
        assert_eq!(second.username, "b");
    }

    #[tokio::test]
    async fn reserve_fails_out_of_stock_when_exhausted() {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let type_id = seed(&store, &["a"]).await;
        let allocator = allocator(&store, &clock);

        allocator
            .reserve(type_id, "buyer-1", Duration::minutes(5))
            .await
            .unwrap();
        let err = allocator
            .reserve(type_id, "buyer-2", Duration::minutes(5))
            .await
            .unwrap_err();

        assert!(matches!(err, AllocError::OutOfStock { .. }));
    }

    #[tokio::test]
    async fn confirm_requires_same_claimant() {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let type_id = seed(&store, &["a"]).await;
        let allocator = allocator(&store, &clock);

        let ticket = allocator
            .reserve(type_id, "buyer-1", Duration::minutes(5))
            .await
            .unwrap();
        let err = allocator
            .confirm(ticket.id, "buyer-2", "pay-1")
            .await
            .unwrap_err();

        assert!(matches!(err, AllocError::InvalidState { .. }));

        let confirmed = allocator.confirm(ticket.id, "buyer-1", "pay-1").await.unwrap();
        assert_eq!(confirmed.state, TicketState::Sold);
        assert_eq!(confirmed.sold_to.as_deref(), Some("pay-1"));
    }

    #[tokio::test]
    async fn confirm_rejects_expired_reservation() {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let type_id = seed(&store, &["a"]).await;
        let allocator = allocator(&store, &clock);

        let ticket = allocator
            .reserve(type_id, "buyer-1", Duration::minutes(5))
            .await
            .unwrap();
        clock.advance(Duration::minutes(6));

        let err = allocator
            .confirm(ticket.id, "buyer-1", "pay-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AllocError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn release_returns_ticket_to_pool() {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let type_id = seed(&store, &["a"]).await;
        let allocator = allocator(&store, &clock);

        let ticket = allocator
            .reserve(type_id, "buyer-1", Duration::minutes(5))
            .await
            .unwrap();
        let released = allocator.release(ticket.id, "buyer-1").await.unwrap();

        assert_eq!(released.state, TicketState::Available);
        assert!(released.reserved_by.is_none());

        // The same ticket is immediately reservable again.
        let again = allocator
            .reserve(type_id, "buyer-2", Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(again.id, ticket.id);
    }

    #[tokio::test]
    async fn expire_stale_releases_only_lapsed_reservations() {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let type_id = seed(&store, &["a", "b"]).await;
        let allocator = allocator(&store, &clock);

        allocator
            .reserve(type_id, "buyer-1", Duration::minutes(5))
            .await
            .unwrap();
        clock.advance(Duration::minutes(3));
        allocator
            .reserve(type_id, "buyer-2", Duration::minutes(5))
            .await
            .unwrap();

        // Not expired yet.
        let released = allocator.expire_stale(clock.now()).await.unwrap();
        assert_eq!(released, 0);

        // First reservation lapses, second is still live.
        clock.advance(Duration::minutes(3));
        let released = allocator.expire_stale(clock.now()).await.unwrap();
        assert_eq!(released, 1);

        let available = store
            .list_by_type_and_state(type_id, TicketState::Available)
            .await
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].username, "a");
    }

    #[tokio::test]
    async fn expire_stale_skips_concurrently_sold_tickets() {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let type_id = seed(&store, &["a"]).await;
        let allocator = allocator(&store, &clock);

        let ticket = allocator
            .reserve(type_id, "buyer-1", Duration::minutes(5))
            .await
            .unwrap();
        allocator.confirm(ticket.id, "buyer-1", "pay-1").await.unwrap();

        clock.advance(Duration::minutes(10));
        let released = allocator.expire_stale(clock.now()).await.unwrap();

        assert_eq!(released, 0);
        let sold = store.get(ticket.id).await.unwrap();
        assert_eq!(sold.state, TicketState::Sold);
    }

    #[tokio::test]
    async fn void_rejects_reserved_tickets() {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let type_id = seed(&store, &["a", "b"]).await;
        let allocator = allocator(&store, &clock);

        let reserved = allocator
            .reserve(type_id, "buyer-1", Duration::minutes(5))
            .await
            .unwrap();
        let err = allocator.void(reserved.id).await.unwrap_err();
        assert!(matches!(err, AllocError::InvalidState { .. }));

        let available = store
            .list_by_type_and_state(type_id, TicketState::Available)
            .await
            .unwrap();
        let voided = allocator.void(available[0].id).await.unwrap();
        assert_eq!(voided.state, TicketState::Void);
    }
}
