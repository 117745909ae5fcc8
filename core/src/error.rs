//! Error taxonomy for the ticket subsystem.
//!
//! Race losses (`StaleState`) are recovered internally by the allocator's
//! retry loop and never reach callers of the higher-level APIs. Business
//! rule violations (`OutOfStock`, invalid transitions) propagate as typed
//! failures. Infrastructure failures from the device provisioner are
//! reported on the operator channel and never fail a purchase whose payment
//! already succeeded.

use crate::types::{PurchaseId, PurchaseOutcome, TicketId, TicketState, TicketTypeId};
use thiserror::Error;

/// Errors from the ticket and purchase stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No ticket with the given id
    #[error("ticket {id} not found")]
    TicketNotFound {
        /// The missing ticket
        id: TicketId,
    },

    /// No ticket type with the given id
    #[error("ticket type {id} not found")]
    TypeNotFound {
        /// The missing type
        id: TicketTypeId,
    },

    /// No purchase with the given id
    #[error("purchase {id} not found")]
    PurchaseNotFound {
        /// The missing purchase
        id: PurchaseId,
    },

    /// A compare-and-set lost the race: the ticket was not in the expected
    /// state when the swap was attempted
    #[error("ticket {id} state is {actual}, expected {expected}")]
    StaleState {
        /// The contended ticket
        id: TicketId,
        /// State the caller expected
        expected: TicketState,
        /// State actually found
        actual: TicketState,
    },

    /// A purchase-outcome compare-and-set lost the race
    #[error("purchase {id} outcome is {actual}, expected {expected}")]
    StaleOutcome {
        /// The contended purchase
        id: PurchaseId,
        /// Outcome the caller expected
        expected: PurchaseOutcome,
        /// Outcome actually found
        actual: PurchaseOutcome,
    },

    /// Insert rejected because the username is already present
    #[error("username {username:?} already imported")]
    DuplicateUsername {
        /// The conflicting username
        username: String,
    },

    /// Storage backend failure (connection, query, serialization)
    #[error("storage error: {0}")]
    Backend(String),
}

/// Errors from the inventory allocator.
#[derive(Debug, Error)]
pub enum AllocError {
    /// No available ticket of the requested type remains
    #[error("no available ticket of type {type_id}")]
    OutOfStock {
        /// The exhausted type
        type_id: TicketTypeId,
    },

    /// The ticket's current state disallows the requested transition
    #[error("invalid ticket state: {reason}")]
    InvalidState {
        /// What was wrong
        reason: String,
    },

    /// Underlying store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the purchase orchestrator.
#[derive(Debug, Error)]
pub enum PurchaseError {
    /// No inventory for the requested type; the purchase was recorded as
    /// failed
    #[error("no available ticket of type {type_id}")]
    OutOfStock {
        /// The exhausted type
        type_id: TicketTypeId,
    },

    /// The requested type is deactivated
    #[error("ticket type {type_id} is not active")]
    TypeInactive {
        /// The deactivated type
        type_id: TicketTypeId,
    },

    /// The reservation lapsed before the payment result arrived; the buyer
    /// must retry the purchase from scratch
    #[error("reservation expired, please retry purchase")]
    ReservationExpired,

    /// The purchase already reached a terminal outcome that forbids the
    /// requested operation (e.g. cancelling a confirmed sale)
    #[error("purchase {id} is already {outcome}")]
    AlreadySettled {
        /// The purchase
        id: PurchaseId,
        /// Its terminal outcome
        outcome: PurchaseOutcome,
    },

    /// The payment provider rejected the confirmation request
    #[error("payment request failed: {0}")]
    Payment(#[from] PaymentError),

    /// Underlying store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the payment confirmation capability.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The provider could not accept the confirmation request
    #[error("payment provider unavailable: {message}")]
    Unavailable {
        /// Provider-supplied detail
        message: String,
    },
}

/// Errors from the device provisioner capability.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// The device rejected the operation
    #[error("provisioner rejected request: {reason}")]
    Rejected {
        /// Device-supplied detail
        reason: String,
    },

    /// The device did not answer in time
    #[error("provisioner timed out")]
    Timeout,

    /// The device is unreachable
    #[error("provisioner unavailable: {message}")]
    Unavailable {
        /// Transport-level detail
        message: String,
    },
}
