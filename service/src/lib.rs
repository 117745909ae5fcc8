//! # Hotspot Service
//!
//! Application shell for the hotspot portal: environment-based
//! configuration, store selection and wiring, the facade surfaces the UI
//! calls, the background reconciliation sweep, and business metrics.

pub mod app;
pub mod config;
pub mod dev;
pub mod facade;
pub mod metrics;
pub mod sweeper_task;

pub use app::{AppError, PortalApp};
pub use config::{Config, StoreBackend};
pub use facade::TicketTypeSummary;
pub use sweeper_task::spawn_sweeper;
