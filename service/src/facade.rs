//! Surfaces exposed to the surrounding UI/API layers.
//!
//! These are the operations the pages call: batch import, type listing
//! with live availability, the purchase lifecycle, and admin inventory
//! stats. All counts are derived from per-ticket state at read time.

use crate::app::{AppError, PortalApp};
use crate::metrics;
use hotspot_core::capabilities::PaymentResult;
use hotspot_core::types::{
    ImportReport, ImportRow, Purchase, PurchaseId, TicketState, TicketType, TicketTypeId,
    TypeStats,
};
use serde::{Deserialize, Serialize};

/// A ticket type with its live availability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTypeSummary {
    /// The type
    pub ticket_type: TicketType,
    /// Tickets currently available for sale
    pub available_count: u64,
}

impl PortalApp {
    /// Imports a CSV export from the ticket generator.
    ///
    /// Expects the columns `Username,Password,Profile,Time Limit,Data
    /// Limit,Comment`; a leading header row is skipped. Row-level problems
    /// land in the report, they never abort the batch.
    ///
    /// # Errors
    ///
    /// Returns error only if the store backend fails as a whole.
    pub async fn import_csv(&self, csv_text: &str) -> Result<ImportReport, AppError> {
        let rows = parse_csv(csv_text);
        let report = self.importer().import(rows).await?;
        metrics::record_import(&report);
        Ok(report)
    }

    /// Lists ticket types with their live available counts.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    pub async fn list_ticket_types(&self) -> Result<Vec<TicketTypeSummary>, AppError> {
        let mut summaries = Vec::new();
        for ticket_type in self.tickets().list_types().await? {
            let available_count = self
                .tickets()
                .count_by_type_and_state(ticket_type.id, TicketState::Available)
                .await?;
            summaries.push(TicketTypeSummary {
                ticket_type,
                available_count,
            });
        }
        Ok(summaries)
    }

    /// Starts a purchase for the given type.
    ///
    /// # Errors
    ///
    /// Returns the orchestrator's typed failure: out of stock, inactive
    /// type, or payment request failure.
    pub async fn create_purchase(
        &self,
        type_id: TicketTypeId,
        buyer_ref: String,
        buyer_contact: Option<String>,
    ) -> Result<Purchase, AppError> {
        let purchase = self
            .orchestrator()
            .create_purchase(type_id, buyer_ref, buyer_contact)
            .await?;
        metrics::record_purchase_created();
        Ok(purchase)
    }

    /// Polls a purchase, settling it as expired when its reservation has
    /// lapsed.
    ///
    /// # Errors
    ///
    /// Returns error for unknown purchase ids.
    pub async fn purchase_status(&self, purchase_id: PurchaseId) -> Result<Purchase, AppError> {
        Ok(self.orchestrator().status(purchase_id).await?)
    }

    /// Cancels a purchase before payment confirmation.
    ///
    /// # Errors
    ///
    /// Returns error once the purchase is settled.
    pub async fn cancel_purchase(&self, purchase_id: PurchaseId) -> Result<Purchase, AppError> {
        Ok(self.orchestrator().cancel(purchase_id).await?)
    }

    /// Entry point for the payment provider's result callback.
    ///
    /// Safe under at-least-once delivery; see
    /// [`hotspot_core::orchestrator::PurchaseOrchestrator::handle_payment_result`].
    ///
    /// # Errors
    ///
    /// Returns error when a success result arrives after the reservation
    /// lapsed.
    pub async fn payment_webhook(
        &self,
        purchase_id: PurchaseId,
        result: PaymentResult,
    ) -> Result<Purchase, AppError> {
        let purchase = self
            .orchestrator()
            .handle_payment_result(purchase_id, result)
            .await?;
        metrics::record_purchase_outcome(&purchase.outcome);
        Ok(purchase)
    }

    /// Per-type inventory stats for the admin dashboard.
    ///
    /// Revenue is derived (`price` times sold count), never a stored
    /// counter.
    ///
    /// # Errors
    ///
    /// Returns error if the store backend fails.
    pub async fn inventory_stats(&self) -> Result<Vec<TypeStats>, AppError> {
        let mut stats = Vec::new();
        for ticket_type in self.tickets().list_types().await? {
            let mut counts = [0_u64; 4];
            for (slot, state) in counts.iter_mut().zip(TicketState::ALL) {
                *slot = self
                    .tickets()
                    .count_by_type_and_state(ticket_type.id, state)
                    .await?;
            }
            let [available, reserved, sold, void] = counts;
            stats.push(TypeStats {
                type_id: ticket_type.id,
                name: ticket_type.name,
                price: ticket_type.price,
                available,
                reserved,
                sold,
                void,
                revenue: ticket_type.price.saturating_multiply(sold),
            });
        }
        Ok(stats)
    }
}

/// Parses the generator's CSV export into raw import rows.
///
/// Keeps parsing deliberately simple: the generator emits plain
/// comma-separated lines without quoting, and the trailing comment column
/// swallows any extra commas.
fn parse_csv(text: &str) -> Vec<ImportRow> {
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Header row from the export template.
        if line.to_ascii_lowercase().starts_with("username,") {
            continue;
        }

        let mut fields = line.splitn(6, ',').map(str::trim);
        let username = fields.next().unwrap_or_default().to_string();
        let password = fields.next().unwrap_or_default().to_string();
        let profile = fields.next().unwrap_or_default().to_string();
        let time_limit = fields.next().map(str::to_string);
        let data_limit = fields.next().map(str::to_string);
        let comment = fields.next().map(str::to_string);

        rows.push(ImportRow {
            username,
            password,
            profile,
            time_limit,
            data_limit,
            comment,
        });
    }
    rows
}
