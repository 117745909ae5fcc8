//! Business metrics for the portal.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `hotspot_tickets_imported_total` - Tickets imported successfully
//! - `hotspot_import_rows_failed_total` - Import rows rejected
//! - `hotspot_purchases_total{outcome}` - Purchases by settled outcome
//! - `hotspot_reservations_expired_total` - Reservations recycled by the sweep
//! - `hotspot_drift_entries_total{direction}` - Drift findings per sweep
//!
//! All inventory counts (available/reserved/sold) are derived from the
//! store on read; they are intentionally not mirrored into gauges that
//! could drift from the underlying records.

use hotspot_core::sweeper::DriftReport;
use hotspot_core::types::{ImportReport, PurchaseOutcome};
use metrics::{counter, describe_counter};

/// Initialize and register all business metric descriptions.
///
/// Call once at application startup, before any metrics are recorded.
pub fn register_metrics() {
    describe_counter!(
        "hotspot_tickets_imported_total",
        "Total tickets imported successfully"
    );
    describe_counter!(
        "hotspot_import_rows_failed_total",
        "Total import rows rejected with a row-level error"
    );
    describe_counter!(
        "hotspot_purchases_created_total",
        "Total purchases created"
    );
    describe_counter!(
        "hotspot_purchases_total",
        "Total purchases by settled outcome (confirmed, failed, expired)"
    );
    describe_counter!(
        "hotspot_reservations_expired_total",
        "Total stale reservations returned to the pool by the sweep"
    );
    describe_counter!(
        "hotspot_drift_entries_total",
        "Total store/device drift findings by direction"
    );
}

/// Records an import batch result.
pub fn record_import(report: &ImportReport) {
    counter!("hotspot_tickets_imported_total").increment(report.imported as u64);
    counter!("hotspot_import_rows_failed_total").increment(report.failed as u64);
}

/// Records a purchase creation.
pub fn record_purchase_created() {
    counter!("hotspot_purchases_created_total").increment(1);
}

/// Records a settled purchase outcome.
pub fn record_purchase_outcome(outcome: &PurchaseOutcome) {
    if outcome.is_terminal() {
        counter!("hotspot_purchases_total", "outcome" => outcome.as_str()).increment(1);
    }
}

/// Records the results of one sweep pass.
pub fn record_sweep(expired_reservations: u64, expired_purchases: u64) {
    counter!("hotspot_reservations_expired_total").increment(expired_reservations);
    counter!("hotspot_purchases_total", "outcome" => "expired").increment(expired_purchases);
}

/// Records drift findings.
pub fn record_drift(report: &DriftReport) {
    counter!("hotspot_drift_entries_total", "direction" => "missing_on_device")
        .increment(report.missing_on_device.len() as u64);
    counter!("hotspot_drift_entries_total", "direction" => "unknown_on_device")
        .increment(report.unknown_on_device.len() as u64);
}
