//! Application wiring - assembles stores, orchestrator, and sweeper.

use crate::config::{Config, StoreBackend};
use hotspot_core::capabilities::{DeviceProvisioner, PaymentConfirmation};
use hotspot_core::environment::{Clock, SystemClock};
use hotspot_core::error::StoreError;
use hotspot_core::importer::TicketImporter;
use hotspot_core::memory::{InMemoryPurchaseStore, InMemoryTicketStore};
use hotspot_core::orchestrator::{OrchestratorSettings, PurchaseOrchestrator};
use hotspot_core::store::{PurchaseStore, TicketStore};
use hotspot_core::sweeper::ReconciliationSweeper;
use hotspot_postgres::{PgPurchaseStore, PgTicketStore};
use std::sync::Arc;
use thiserror::Error;

/// Application errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Purchase operation failed
    #[error(transparent)]
    Purchase(#[from] hotspot_core::error::PurchaseError),

    /// Allocation failed
    #[error(transparent)]
    Allocation(#[from] hotspot_core::error::AllocError),
}

/// The assembled portal application.
///
/// Owns the stores and the three core components; the facade surfaces in
/// [`crate::facade`] and the background task in [`crate::sweeper_task`]
/// operate through this struct.
pub struct PortalApp {
    config: Config,
    tickets: Arc<dyn TicketStore>,
    purchases: Arc<dyn PurchaseStore>,
    importer: TicketImporter,
    orchestrator: PurchaseOrchestrator,
    sweeper: Arc<ReconciliationSweeper>,
}

impl PortalApp {
    /// Initializes the application per `config`, connecting `PostgreSQL`
    /// and running migrations when selected.
    ///
    /// # Errors
    ///
    /// Returns error if the database connection or migrations fail.
    pub async fn new(
        config: Config,
        payment: Arc<dyn PaymentConfirmation>,
        provisioner: Arc<dyn DeviceProvisioner>,
    ) -> Result<Self, AppError> {
        let (tickets, purchases): (Arc<dyn TicketStore>, Arc<dyn PurchaseStore>) =
            match config.store {
                StoreBackend::Memory => {
                    tracing::info!("using in-memory store");
                    (
                        Arc::new(InMemoryTicketStore::new()),
                        Arc::new(InMemoryPurchaseStore::new()),
                    )
                }
                StoreBackend::Postgres => {
                    tracing::info!(url = %config.database_url, "connecting to PostgreSQL");
                    let pool = Arc::new(hotspot_postgres::connect(&config.database_url).await?);
                    hotspot_postgres::run_migrations(&pool).await?;
                    (
                        Arc::new(PgTicketStore::new(Arc::clone(&pool))),
                        Arc::new(PgPurchaseStore::new(pool)),
                    )
                }
            };

        Ok(Self::assemble(
            config,
            tickets,
            purchases,
            payment,
            provisioner,
            Arc::new(SystemClock),
        ))
    }

    /// Assembles the application over explicit stores and clock.
    ///
    /// Used by tests to inject the in-memory store and a mock clock.
    #[must_use]
    pub fn assemble(
        config: Config,
        tickets: Arc<dyn TicketStore>,
        purchases: Arc<dyn PurchaseStore>,
        payment: Arc<dyn PaymentConfirmation>,
        provisioner: Arc<dyn DeviceProvisioner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let importer = TicketImporter::new(Arc::clone(&tickets), config.default_ticket_price());
        let orchestrator = PurchaseOrchestrator::new(
            Arc::clone(&tickets),
            Arc::clone(&purchases),
            payment,
            Arc::clone(&provisioner),
            Arc::clone(&clock),
            OrchestratorSettings {
                reservation_ttl: config.reservation_ttl(),
                provision_retry: config.provision_retry(),
            },
        );
        let sweeper = Arc::new(ReconciliationSweeper::new(
            Arc::clone(&tickets),
            Arc::clone(&purchases),
            provisioner,
            clock,
        ));

        Self {
            config,
            tickets,
            purchases,
            importer,
            orchestrator,
            sweeper,
        }
    }

    /// The application configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The ticket store.
    #[must_use]
    pub fn tickets(&self) -> &Arc<dyn TicketStore> {
        &self.tickets
    }

    /// The purchase store.
    #[must_use]
    pub fn purchases(&self) -> &Arc<dyn PurchaseStore> {
        &self.purchases
    }

    /// The batch importer.
    #[must_use]
    pub const fn importer(&self) -> &TicketImporter {
        &self.importer
    }

    /// The purchase orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &PurchaseOrchestrator {
        &self.orchestrator
    }

    /// The reconciliation sweeper, shareable with the background task.
    #[must_use]
    pub fn sweeper(&self) -> Arc<ReconciliationSweeper> {
        Arc::clone(&self.sweeper)
    }
}
