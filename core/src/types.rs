//! Domain types for the hotspot voucher inventory.
//!
//! Tickets are pre-generated credential pairs imported in bulk from an
//! external generator and sold exactly once. A ticket's lifecycle state is
//! the single source of truth for inventory: availability counts are always
//! derived from per-ticket state, never kept as separate counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketTypeId(Uuid);

impl TicketTypeId {
    /// Creates a new random `TicketTypeId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketTypeId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketTypeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a purchase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseId(Uuid);

impl PurchaseId {
    /// Creates a new random `PurchaseId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PurchaseId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PurchaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies money by a count with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, count: u64) -> Option<Self> {
        match self.0.checked_mul(count) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies money by a count, saturating at the maximum amount
    #[must_use]
    pub const fn saturating_multiply(self, count: u64) -> Self {
        Self(self.0.saturating_mul(count))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Ticket lifecycle
// ============================================================================

/// Lifecycle state of a ticket.
///
/// Exactly one of the four states holds at any time; the reservation and
/// sale fields on [`Ticket`] are populated only in the matching state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Imported and sellable
    Available,
    /// Claimed by an in-flight purchase, with an expiry
    Reserved,
    /// Sold, with a payment reference
    Sold,
    /// Taken out of circulation by an operator
    Void,
}

impl TicketState {
    /// Stable lowercase name, used for storage and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Sold => "sold",
            Self::Void => "void",
        }
    }

    /// Parses a state from its stable lowercase name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(Self::Available),
            "reserved" => Some(Self::Reserved),
            "sold" => Some(Self::Sold),
            "void" => Some(Self::Void),
            _ => None,
        }
    }

    /// All states, in lifecycle order
    pub const ALL: [Self; 4] = [Self::Available, Self::Reserved, Self::Sold, Self::Void];
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One voucher/credential unit.
///
/// `username` and `password` are the device-provisioning credentials, fixed
/// at import. `import_seq` is the store-assigned import order and is the
/// tie-break for which ticket of a type gets sold first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique ticket identifier
    pub id: TicketId,
    /// Store-assigned import sequence number (oldest first)
    pub import_seq: u64,
    /// Provisioning username, unique across the store
    pub username: String,
    /// Provisioning password
    pub password: String,
    /// Ticket type this credential belongs to
    pub type_id: TicketTypeId,
    /// Current lifecycle state
    pub state: TicketState,
    /// Claim holder while `Reserved`
    pub reserved_by: Option<String>,
    /// When the reservation was taken
    pub reserved_at: Option<DateTime<Utc>>,
    /// When the reservation lapses
    pub reservation_expires_at: Option<DateTime<Utc>>,
    /// Payment reference once `Sold`
    pub sold_to: Option<String>,
    /// When the sale was confirmed
    pub sold_at: Option<DateTime<Utc>>,
    /// Free text carried from import
    pub comment: Option<String>,
}

impl Ticket {
    /// Checks whether this ticket holds a live reservation for `claimant`.
    #[must_use]
    pub fn is_reserved_by(&self, claimant: &str, now: DateTime<Utc>) -> bool {
        self.state == TicketState::Reserved
            && self.reserved_by.as_deref() == Some(claimant)
            && self.reservation_expires_at.is_some_and(|expiry| now < expiry)
    }

    /// Checks whether this ticket's reservation has lapsed.
    #[must_use]
    pub fn is_reservation_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == TicketState::Reserved
            && self.reservation_expires_at.is_some_and(|expiry| now >= expiry)
    }
}

/// A new ticket to be inserted by the importer.
///
/// The store assigns the id and import sequence on insert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    /// Provisioning username
    pub username: String,
    /// Provisioning password
    pub password: String,
    /// Resolved ticket type
    pub type_id: TicketTypeId,
    /// Free text carried from the import row
    pub comment: Option<String>,
}

// ============================================================================
// Ticket types
// ============================================================================

/// A named sellable configuration: router profile plus optional limits.
///
/// Two tickets belong to the same type exactly when their
/// `{profile, time_limit, data_limit}` triple matches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    /// Unique type identifier
    pub id: TicketTypeId,
    /// Display name (defaults to the profile name on auto-creation)
    pub name: String,
    /// Optional admin-facing description
    pub description: Option<String>,
    /// Sale price
    pub price: Money,
    /// Router profile name (e.g. `BASIC`, `PREMIUM`)
    pub profile: String,
    /// Router uptime limit string (e.g. `24h`, `7d`)
    pub time_limit: Option<String>,
    /// Router byte limit string (e.g. `1GB`)
    pub data_limit: Option<String>,
    /// Whether the type can currently be purchased
    pub is_active: bool,
    /// When the type was created
    pub created_at: DateTime<Utc>,
}

impl TicketType {
    /// Checks whether a raw `{profile, time_limit, data_limit}` triple
    /// resolves to this type.
    #[must_use]
    pub fn matches(
        &self,
        profile: &str,
        time_limit: Option<&str>,
        data_limit: Option<&str>,
    ) -> bool {
        self.profile == profile
            && self.time_limit.as_deref() == time_limit
            && self.data_limit.as_deref() == data_limit
    }
}

/// Admin-editable fields of a [`TicketType`].
///
/// `None` leaves the field unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTypeUpdate {
    /// New display name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New price
    pub price: Option<Money>,
    /// Activate or deactivate the type
    pub is_active: Option<bool>,
}

// ============================================================================
// Purchases
// ============================================================================

/// Outcome of a purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// Created and awaiting payment confirmation
    Pending,
    /// Payment confirmed, ticket sold
    Confirmed,
    /// Payment failed, buyer cancelled, or no inventory
    Failed {
        /// Failure reason
        reason: String,
    },
    /// Reservation lapsed before a payment result arrived
    Expired,
}

impl PurchaseOutcome {
    /// Stable lowercase name, used for storage and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed { .. } => "failed",
            Self::Expired => "expired",
        }
    }

    /// Whether the purchase has reached a terminal outcome
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PurchaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buyer-initiated transaction.
///
/// References its ticket by id only; the ticket's current state must be
/// re-checked through the store, never assumed from this record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Unique purchase identifier
    pub id: PurchaseId,
    /// Desired ticket type
    pub type_id: TicketTypeId,
    /// Opaque buyer reference (student id, phone number, ...)
    pub buyer_ref: String,
    /// Optional contact handed to the payment provider
    pub buyer_contact: Option<String>,
    /// Payment reference once confirmed
    pub payment_ref: Option<String>,
    /// Ticket bound by a successful reservation
    pub ticket_id: Option<TicketId>,
    /// Current outcome
    pub outcome: PurchaseOutcome,
    /// When the purchase was created
    pub created_at: DateTime<Utc>,
    /// When the outcome last changed
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// Creates a new pending `Purchase`
    #[must_use]
    pub const fn new(
        id: PurchaseId,
        type_id: TicketTypeId,
        buyer_ref: String,
        buyer_contact: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            type_id,
            buyer_ref,
            buyer_contact,
            payment_ref: None,
            ticket_id: None,
            outcome: PurchaseOutcome::Pending,
            created_at,
            updated_at: created_at,
        }
    }

    /// The claimant string under which this purchase reserves tickets.
    ///
    /// Reservations are scoped to the purchase, not the buyer, so two
    /// concurrent purchases by the same buyer never confuse each other's
    /// claims.
    #[must_use]
    pub fn claimant(&self) -> String {
        self.id.to_string()
    }

    /// Checks whether this pending purchase has lost its claim on `ticket`.
    ///
    /// True when the reservation lapsed, was swept back to the pool, or the
    /// ticket was reassigned to another claimant. A `Sold` ticket is never
    /// "lost": either this purchase's own confirmation is settling, or a
    /// later payment callback will resolve the outcome.
    #[must_use]
    pub fn reservation_lost(&self, ticket: &Ticket, now: DateTime<Utc>) -> bool {
        let claimant = self.claimant();
        match ticket.state {
            TicketState::Available | TicketState::Void => true,
            TicketState::Reserved => {
                ticket.reserved_by.as_deref() != Some(claimant.as_str())
                    || ticket.is_reservation_expired(now)
            }
            TicketState::Sold => false,
        }
    }
}

// ============================================================================
// Import batches
// ============================================================================

/// One raw row of an uploaded ticket batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRow {
    /// Provisioning username
    pub username: String,
    /// Provisioning password
    pub password: String,
    /// Router profile name
    pub profile: String,
    /// Optional uptime limit string
    pub time_limit: Option<String>,
    /// Optional byte limit string
    pub data_limit: Option<String>,
    /// Optional free-text comment
    pub comment: Option<String>,
}

/// Result of importing a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    /// Rows successfully imported
    pub imported: usize,
    /// Rows rejected
    pub failed: usize,
    /// One human-readable message per rejected row, 1-based row numbers
    pub errors: Vec<String>,
}

// ============================================================================
// Inventory statistics
// ============================================================================

/// Per-type inventory counts, all derived from per-ticket state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStats {
    /// The ticket type
    pub type_id: TicketTypeId,
    /// Type display name
    pub name: String,
    /// Sale price per ticket
    pub price: Money,
    /// Tickets currently available
    pub available: u64,
    /// Tickets currently reserved
    pub reserved: u64,
    /// Tickets sold
    pub sold: u64,
    /// Tickets voided
    pub void: u64,
    /// Cumulative revenue (`price` times `sold`)
    pub revenue: Money,
}

impl TypeStats {
    /// Total tickets ever imported for this type
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.available + self.reserved + self.sold + self.void
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_display_formats_cents() {
        assert_eq!(Money::from_cents(1250).to_string(), "$12.50");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
    }

    #[test]
    fn money_checked_multiply_overflows_to_none() {
        assert_eq!(Money::from_cents(u64::MAX).checked_multiply(2), None);
        assert_eq!(
            Money::from_cents(200).checked_multiply(3),
            Some(Money::from_cents(600))
        );
    }

    #[test]
    fn ticket_state_round_trips_through_names() {
        for state in TicketState::ALL {
            assert_eq!(TicketState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TicketState::parse("refunded"), None);
    }

    #[test]
    fn purchase_outcome_terminal_classification() {
        assert!(!PurchaseOutcome::Pending.is_terminal());
        assert!(PurchaseOutcome::Confirmed.is_terminal());
        assert!(
            PurchaseOutcome::Failed {
                reason: "declined".to_string()
            }
            .is_terminal()
        );
        assert!(PurchaseOutcome::Expired.is_terminal());
    }

    #[test]
    fn type_stats_total_sums_all_states() {
        let stats = TypeStats {
            type_id: TicketTypeId::new(),
            name: "BASIC".to_string(),
            price: Money::from_cents(500),
            available: 3,
            reserved: 1,
            sold: 4,
            void: 2,
            revenue: Money::from_cents(2000),
        };
        assert_eq!(stats.total(), 10);
    }
}
