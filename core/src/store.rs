//! Storage traits for tickets, ticket types, and purchases.
//!
//! `compare_and_set_state` is the only way ticket state ever changes. Every
//! higher-level transition (reserve, confirm, release, expire, void) is a
//! single CAS, so correctness under concurrent callers reduces to the
//! atomicity of this one primitive. Implementations must make the
//! compare-and-swap atomic with respect to concurrent callers: a database
//! transaction with a conditional update, or a single-writer lock for the
//! in-memory store.
//!
//! Losers of a CAS race observe [`StoreError::StaleState`] and must re-read
//! before retrying; the allocator's candidate loop does exactly that.

use crate::error::StoreError;
use crate::types::{
    Money, NewTicket, Purchase, PurchaseId, PurchaseOutcome, Ticket, TicketId, TicketState,
    TicketType, TicketTypeId, TicketTypeUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Field payload accompanying a ticket state transition.
///
/// Each variant carries exactly the fields the target state is allowed to
/// populate; the store clears the fields of the state being left.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateFields {
    /// Entering `Reserved`: record the claim
    Reservation {
        /// Claim holder
        reserved_by: String,
        /// When the claim was taken
        reserved_at: DateTime<Utc>,
        /// When the claim lapses
        expires_at: DateTime<Utc>,
    },
    /// Entering `Sold`: record the sale
    Sale {
        /// Payment reference
        sold_to: String,
        /// When the sale was confirmed
        sold_at: DateTime<Utc>,
    },
    /// Entering `Available` or `Void`: clear reservation and sale fields
    Clear,
}

/// Durable record of every imported ticket and its lifecycle state.
///
/// The store is the exclusive owner of `Ticket` and `TicketType` records;
/// all mutation funnels through [`TicketStore::compare_and_set_state`].
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Fetches a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TicketNotFound`] if no such ticket exists.
    async fn get(&self, id: TicketId) -> Result<Ticket, StoreError>;

    /// Fetches a ticket by username.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    async fn find_by_username(&self, username: &str) -> Result<Option<Ticket>, StoreError>;

    /// Lists tickets of a type in a given state, ordered by import
    /// sequence, oldest first.
    ///
    /// This ordering is the tie-break for which ticket of a batch gets
    /// sold first.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    async fn list_by_type_and_state(
        &self,
        type_id: TicketTypeId,
        state: TicketState,
    ) -> Result<Vec<Ticket>, StoreError>;

    /// Lists all tickets in a given state, ordered by import sequence.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    async fn list_by_state(&self, state: TicketState) -> Result<Vec<Ticket>, StoreError>;

    /// Counts tickets of a type in a given state.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    async fn count_by_type_and_state(
        &self,
        type_id: TicketTypeId,
        state: TicketState,
    ) -> Result<u64, StoreError>;

    /// Atomically transitions a ticket from `expected` to `new`, applying
    /// `fields`, and returns the updated ticket.
    ///
    /// This is the sole mutation primitive for ticket state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleState`] if the ticket's current state
    /// does not match `expected` (the caller lost a race and must
    /// re-read), or [`StoreError::TicketNotFound`] if the ticket is gone.
    async fn compare_and_set_state(
        &self,
        id: TicketId,
        expected: TicketState,
        new: TicketState,
        fields: StateFields,
    ) -> Result<Ticket, StoreError>;

    /// Inserts a batch of new tickets, returning one result per row in
    /// input order. A failed row (duplicate username) never aborts the
    /// rest of the batch.
    ///
    /// Inserted tickets start in state `Available` and receive
    /// monotonically increasing import sequence numbers.
    ///
    /// # Errors
    ///
    /// Returns error only if the store backend fails as a whole; per-row
    /// failures are reported in the returned vector.
    async fn bulk_insert(
        &self,
        tickets: Vec<NewTicket>,
    ) -> Result<Vec<Result<Ticket, StoreError>>, StoreError>;

    /// Fetches a ticket type by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeNotFound`] if no such type exists.
    async fn get_type(&self, id: TicketTypeId) -> Result<TicketType, StoreError>;

    /// Lists all ticket types.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    async fn list_types(&self) -> Result<Vec<TicketType>, StoreError>;

    /// Resolves the type matching `{profile, time_limit, data_limit}`,
    /// creating it with `default_price` if absent.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    async fn find_or_create_type(
        &self,
        profile: &str,
        time_limit: Option<&str>,
        data_limit: Option<&str>,
        default_price: Money,
    ) -> Result<TicketType, StoreError>;

    /// Applies admin edits to a ticket type and returns the updated type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TypeNotFound`] if no such type exists.
    async fn update_type(
        &self,
        id: TicketTypeId,
        update: TicketTypeUpdate,
    ) -> Result<TicketType, StoreError>;
}

/// Durable record of purchases.
///
/// Outcome changes go through [`PurchaseStore::compare_and_set_outcome`],
/// mirroring the ticket CAS discipline so duplicate payment callbacks race
/// safely across service instances.
#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Inserts a new purchase record.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    async fn insert(&self, purchase: Purchase) -> Result<(), StoreError>;

    /// Fetches a purchase by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PurchaseNotFound`] if no such purchase exists.
    async fn get(&self, id: PurchaseId) -> Result<Purchase, StoreError>;

    /// Binds the reserved ticket to a pending purchase.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PurchaseNotFound`] if no such purchase exists.
    async fn bind_ticket(&self, id: PurchaseId, ticket_id: TicketId) -> Result<(), StoreError>;

    /// Atomically transitions a purchase outcome from `expected` to `new`,
    /// optionally recording the payment reference, and returns the updated
    /// purchase.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleOutcome`] if the current outcome does
    /// not match `expected`.
    async fn compare_and_set_outcome(
        &self,
        id: PurchaseId,
        expected: PurchaseOutcome,
        new: PurchaseOutcome,
        payment_ref: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<Purchase, StoreError>;

    /// Lists purchases still awaiting a payment result.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    async fn list_pending(&self) -> Result<Vec<Purchase>, StoreError>;
}
