//! In-memory store implementations.
//!
//! Suitable for single-instance deployments and tests. All operations take
//! the table lock, so the compare-and-set primitive is atomic with respect
//! to concurrent callers; multi-instance deployments use the `PostgreSQL`
//! store instead, where atomicity comes from conditional updates.

use crate::error::StoreError;
use crate::store::{PurchaseStore, StateFields, TicketStore};
use crate::types::{
    Money, NewTicket, Purchase, PurchaseId, PurchaseOutcome, Ticket, TicketId, TicketState,
    TicketType, TicketTypeId, TicketTypeUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Applies a state transition's field payload to a ticket.
fn apply_transition(ticket: &mut Ticket, new: TicketState, fields: StateFields) {
    ticket.state = new;
    match fields {
        StateFields::Reservation {
            reserved_by,
            reserved_at,
            expires_at,
        } => {
            ticket.reserved_by = Some(reserved_by);
            ticket.reserved_at = Some(reserved_at);
            ticket.reservation_expires_at = Some(expires_at);
            ticket.sold_to = None;
            ticket.sold_at = None;
        }
        StateFields::Sale { sold_to, sold_at } => {
            ticket.reserved_by = None;
            ticket.reserved_at = None;
            ticket.reservation_expires_at = None;
            ticket.sold_to = Some(sold_to);
            ticket.sold_at = Some(sold_at);
        }
        StateFields::Clear => {
            ticket.reserved_by = None;
            ticket.reserved_at = None;
            ticket.reservation_expires_at = None;
            ticket.sold_to = None;
            ticket.sold_at = None;
        }
    }
}

#[derive(Debug, Default)]
struct TicketTable {
    tickets: HashMap<TicketId, Ticket>,
    by_username: HashMap<String, TicketId>,
    types: HashMap<TicketTypeId, TicketType>,
    next_seq: u64,
}

/// In-memory [`TicketStore`].
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    inner: RwLock<TicketTable>,
}

impl InMemoryTicketStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn get(&self, id: TicketId) -> Result<Ticket, StoreError> {
        let table = self.inner.read().await;
        table
            .tickets
            .get(&id)
            .cloned()
            .ok_or(StoreError::TicketNotFound { id })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Ticket>, StoreError> {
        let table = self.inner.read().await;
        Ok(table
            .by_username
            .get(username)
            .and_then(|id| table.tickets.get(id))
            .cloned())
    }

    async fn list_by_type_and_state(
        &self,
        type_id: TicketTypeId,
        state: TicketState,
    ) -> Result<Vec<Ticket>, StoreError> {
        let table = self.inner.read().await;
        let mut tickets: Vec<Ticket> = table
            .tickets
            .values()
            .filter(|t| t.type_id == type_id && t.state == state)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.import_seq);
        Ok(tickets)
    }

    async fn list_by_state(&self, state: TicketState) -> Result<Vec<Ticket>, StoreError> {
        let table = self.inner.read().await;
        let mut tickets: Vec<Ticket> = table
            .tickets
            .values()
            .filter(|t| t.state == state)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.import_seq);
        Ok(tickets)
    }

    async fn count_by_type_and_state(
        &self,
        type_id: TicketTypeId,
        state: TicketState,
    ) -> Result<u64, StoreError> {
        let table = self.inner.read().await;
        Ok(table
            .tickets
            .values()
            .filter(|t| t.type_id == type_id && t.state == state)
            .count() as u64)
    }

    async fn compare_and_set_state(
        &self,
        id: TicketId,
        expected: TicketState,
        new: TicketState,
        fields: StateFields,
    ) -> Result<Ticket, StoreError> {
        let mut table = self.inner.write().await;
        let ticket = table
            .tickets
            .get_mut(&id)
            .ok_or(StoreError::TicketNotFound { id })?;

        if ticket.state != expected {
            return Err(StoreError::StaleState {
                id,
                expected,
                actual: ticket.state,
            });
        }

        apply_transition(ticket, new, fields);
        Ok(ticket.clone())
    }

    async fn bulk_insert(
        &self,
        tickets: Vec<NewTicket>,
    ) -> Result<Vec<Result<Ticket, StoreError>>, StoreError> {
        let mut table = self.inner.write().await;
        let mut results = Vec::with_capacity(tickets.len());

        for new_ticket in tickets {
            if table.by_username.contains_key(&new_ticket.username) {
                results.push(Err(StoreError::DuplicateUsername {
                    username: new_ticket.username,
                }));
                continue;
            }

            let seq = table.next_seq;
            table.next_seq += 1;

            let ticket = Ticket {
                id: TicketId::new(),
                import_seq: seq,
                username: new_ticket.username.clone(),
                password: new_ticket.password,
                type_id: new_ticket.type_id,
                state: TicketState::Available,
                reserved_by: None,
                reserved_at: None,
                reservation_expires_at: None,
                sold_to: None,
                sold_at: None,
                comment: new_ticket.comment,
            };
            table.by_username.insert(new_ticket.username, ticket.id);
            table.tickets.insert(ticket.id, ticket.clone());
            results.push(Ok(ticket));
        }

        Ok(results)
    }

    async fn get_type(&self, id: TicketTypeId) -> Result<TicketType, StoreError> {
        let table = self.inner.read().await;
        table
            .types
            .get(&id)
            .cloned()
            .ok_or(StoreError::TypeNotFound { id })
    }

    async fn list_types(&self) -> Result<Vec<TicketType>, StoreError> {
        let table = self.inner.read().await;
        let mut types: Vec<TicketType> = table.types.values().cloned().collect();
        types.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(types)
    }

    async fn find_or_create_type(
        &self,
        profile: &str,
        time_limit: Option<&str>,
        data_limit: Option<&str>,
        default_price: Money,
    ) -> Result<TicketType, StoreError> {
        let mut table = self.inner.write().await;
        if let Some(existing) = table
            .types
            .values()
            .find(|t| t.matches(profile, time_limit, data_limit))
        {
            return Ok(existing.clone());
        }

        let ticket_type = TicketType {
            id: TicketTypeId::new(),
            name: profile.to_string(),
            description: None,
            price: default_price,
            profile: profile.to_string(),
            time_limit: time_limit.map(str::to_string),
            data_limit: data_limit.map(str::to_string),
            is_active: true,
            created_at: Utc::now(),
        };
        table.types.insert(ticket_type.id, ticket_type.clone());
        Ok(ticket_type)
    }

    async fn update_type(
        &self,
        id: TicketTypeId,
        update: TicketTypeUpdate,
    ) -> Result<TicketType, StoreError> {
        let mut table = self.inner.write().await;
        let ticket_type = table
            .types
            .get_mut(&id)
            .ok_or(StoreError::TypeNotFound { id })?;

        if let Some(name) = update.name {
            ticket_type.name = name;
        }
        if let Some(description) = update.description {
            ticket_type.description = Some(description);
        }
        if let Some(price) = update.price {
            ticket_type.price = price;
        }
        if let Some(is_active) = update.is_active {
            ticket_type.is_active = is_active;
        }

        Ok(ticket_type.clone())
    }
}

/// In-memory [`PurchaseStore`].
#[derive(Debug, Default)]
pub struct InMemoryPurchaseStore {
    inner: RwLock<HashMap<PurchaseId, Purchase>>,
}

impl InMemoryPurchaseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PurchaseStore for InMemoryPurchaseStore {
    async fn insert(&self, purchase: Purchase) -> Result<(), StoreError> {
        let mut purchases = self.inner.write().await;
        purchases.insert(purchase.id, purchase);
        Ok(())
    }

    async fn get(&self, id: PurchaseId) -> Result<Purchase, StoreError> {
        let purchases = self.inner.read().await;
        purchases
            .get(&id)
            .cloned()
            .ok_or(StoreError::PurchaseNotFound { id })
    }

    async fn bind_ticket(&self, id: PurchaseId, ticket_id: TicketId) -> Result<(), StoreError> {
        let mut purchases = self.inner.write().await;
        let purchase = purchases
            .get_mut(&id)
            .ok_or(StoreError::PurchaseNotFound { id })?;
        purchase.ticket_id = Some(ticket_id);
        Ok(())
    }

    async fn compare_and_set_outcome(
        &self,
        id: PurchaseId,
        expected: PurchaseOutcome,
        new: PurchaseOutcome,
        payment_ref: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<Purchase, StoreError> {
        let mut purchases = self.inner.write().await;
        let purchase = purchases
            .get_mut(&id)
            .ok_or(StoreError::PurchaseNotFound { id })?;

        if purchase.outcome != expected {
            return Err(StoreError::StaleOutcome {
                id,
                expected,
                actual: purchase.outcome.clone(),
            });
        }

        purchase.outcome = new;
        purchase.updated_at = updated_at;
        if payment_ref.is_some() {
            purchase.payment_ref = payment_ref;
        }
        Ok(purchase.clone())
    }

    async fn list_pending(&self) -> Result<Vec<Purchase>, StoreError> {
        let purchases = self.inner.read().await;
        let mut pending: Vec<Purchase> = purchases
            .values()
            .filter(|p| p.outcome == PurchaseOutcome::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn new_ticket(username: &str, type_id: TicketTypeId) -> NewTicket {
        NewTicket {
            username: username.to_string(),
            password: "pw".to_string(),
            type_id,
            comment: None,
        }
    }

    #[tokio::test]
    async fn bulk_insert_assigns_increasing_sequence() {
        let store = InMemoryTicketStore::new();
        let type_id = TicketTypeId::new();

        let results = store
            .bulk_insert(vec![new_ticket("a", type_id), new_ticket("b", type_id)])
            .await
            .unwrap();

        let seqs: Vec<u64> = results
            .iter()
            .map(|r| r.as_ref().unwrap().import_seq)
            .collect();
        assert!(seqs[0] < seqs[1]);
    }

    #[tokio::test]
    async fn bulk_insert_rejects_duplicate_username_within_batch() {
        let store = InMemoryTicketStore::new();
        let type_id = TicketTypeId::new();

        let results = store
            .bulk_insert(vec![new_ticket("a", type_id), new_ticket("a", type_id)])
            .await
            .unwrap();

        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(StoreError::DuplicateUsername { .. })
        ));
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expectation() {
        let store = InMemoryTicketStore::new();
        let type_id = TicketTypeId::new();
        let results = store
            .bulk_insert(vec![new_ticket("a", type_id)])
            .await
            .unwrap();
        let ticket = results[0].as_ref().unwrap().clone();
        let now = Utc::now();

        store
            .compare_and_set_state(
                ticket.id,
                TicketState::Available,
                TicketState::Reserved,
                StateFields::Reservation {
                    reserved_by: "buyer".to_string(),
                    reserved_at: now,
                    expires_at: now + chrono::Duration::minutes(5),
                },
            )
            .await
            .unwrap();

        let err = store
            .compare_and_set_state(
                ticket.id,
                TicketState::Available,
                TicketState::Reserved,
                StateFields::Reservation {
                    reserved_by: "other".to_string(),
                    reserved_at: now,
                    expires_at: now + chrono::Duration::minutes(5),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::StaleState {
                expected: TicketState::Available,
                actual: TicketState::Reserved,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn sale_transition_clears_reservation_fields() {
        let store = InMemoryTicketStore::new();
        let type_id = TicketTypeId::new();
        let results = store
            .bulk_insert(vec![new_ticket("a", type_id)])
            .await
            .unwrap();
        let ticket = results[0].as_ref().unwrap().clone();
        let now = Utc::now();

        store
            .compare_and_set_state(
                ticket.id,
                TicketState::Available,
                TicketState::Reserved,
                StateFields::Reservation {
                    reserved_by: "buyer".to_string(),
                    reserved_at: now,
                    expires_at: now + chrono::Duration::minutes(5),
                },
            )
            .await
            .unwrap();

        let sold = store
            .compare_and_set_state(
                ticket.id,
                TicketState::Reserved,
                TicketState::Sold,
                StateFields::Sale {
                    sold_to: "pay-1".to_string(),
                    sold_at: now,
                },
            )
            .await
            .unwrap();

        assert_eq!(sold.state, TicketState::Sold);
        assert_eq!(sold.sold_to.as_deref(), Some("pay-1"));
        assert!(sold.reserved_by.is_none());
        assert!(sold.reservation_expires_at.is_none());
    }

    #[tokio::test]
    async fn find_or_create_type_reuses_matching_triple() {
        let store = InMemoryTicketStore::new();

        let first = store
            .find_or_create_type("BASIC", Some("24h"), Some("1GB"), Money::from_cents(500))
            .await
            .unwrap();
        let second = store
            .find_or_create_type("BASIC", Some("24h"), Some("1GB"), Money::from_cents(999))
            .await
            .unwrap();
        let other = store
            .find_or_create_type("BASIC", Some("48h"), Some("1GB"), Money::from_cents(500))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.price, Money::from_cents(500));
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn purchase_outcome_cas_is_idempotent_under_race() {
        let store = InMemoryPurchaseStore::new();
        let purchase = Purchase::new(
            PurchaseId::new(),
            TicketTypeId::new(),
            "buyer".to_string(),
            None,
            Utc::now(),
        );
        store.insert(purchase.clone()).await.unwrap();

        let now = Utc::now();
        store
            .compare_and_set_outcome(
                purchase.id,
                PurchaseOutcome::Pending,
                PurchaseOutcome::Confirmed,
                Some("pay-1".to_string()),
                now,
            )
            .await
            .unwrap();

        let err = store
            .compare_and_set_outcome(
                purchase.id,
                PurchaseOutcome::Pending,
                PurchaseOutcome::Confirmed,
                Some("pay-1".to_string()),
                now,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::StaleOutcome { .. }));
    }
}
