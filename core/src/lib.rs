//! # Hotspot Core
//!
//! Ticket/voucher lifecycle and concurrency-safe inventory for a captive
//! portal hotspot. Pre-generated access tickets are imported in bulk, move
//! through reservation, purchase, and redemption states, and reconcile
//! with the router that actually grants network access.
//!
//! ## Components
//!
//! - [`store`]: durable ticket/purchase storage behind traits; the
//!   compare-and-set primitive is the sole mutation path for ticket state
//! - [`importer`]: tabular batch import with per-row failure reporting
//! - [`allocator`]: reserve/confirm/release with CAS retry, guaranteeing
//!   at most one claimant per ticket without a global lock
//! - [`orchestrator`]: the purchase state machine tying payment outcome to
//!   ticket handover and device provisioning
//! - [`sweeper`]: periodic reservation expiry and store/device drift
//!   detection
//!
//! ## Concurrency model
//!
//! The only shared mutable resource is ticket state. All mutation goes
//! through [`store::TicketStore::compare_and_set_state`]; for a given
//! ticket, transitions are totally ordered by the sequence of successful
//! swaps, and race losers re-read before retrying. No operation holds a
//! store lock while waiting on an external system.

pub mod allocator;
pub mod capabilities;
pub mod environment;
pub mod error;
pub mod importer;
pub mod memory;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod sweeper;
pub mod types;

pub use allocator::InventoryAllocator;
pub use capabilities::{Credential, DeviceProvisioner, PaymentConfirmation, PaymentResult};
pub use environment::{Clock, SystemClock};
pub use error::{AllocError, PaymentError, ProvisionerError, PurchaseError, StoreError};
pub use importer::TicketImporter;
pub use memory::{InMemoryPurchaseStore, InMemoryTicketStore};
pub use orchestrator::{OrchestratorSettings, PurchaseOrchestrator};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use store::{PurchaseStore, StateFields, TicketStore};
pub use sweeper::{DriftReport, ReconciliationSweeper, SweepOutcome};
pub use types::{
    ImportReport, ImportRow, Money, NewTicket, Purchase, PurchaseId, PurchaseOutcome, Ticket,
    TicketId, TicketState, TicketType, TicketTypeId, TicketTypeUpdate, TypeStats,
};
