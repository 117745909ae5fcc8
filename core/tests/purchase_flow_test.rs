//! End-to-end purchase flow over the in-memory store.
//!
//! Follows a batch of two tickets from import through two purchases,
//! checking derived availability at every step.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use chrono::Duration;
use hotspot_core::capabilities::{DeviceProvisioner, PaymentConfirmation, PaymentResult};
use hotspot_core::environment::Clock;
use hotspot_core::importer::TicketImporter;
use hotspot_core::memory::{InMemoryPurchaseStore, InMemoryTicketStore};
use hotspot_core::orchestrator::{OrchestratorSettings, PurchaseOrchestrator};
use hotspot_core::store::{PurchaseStore, TicketStore};
use hotspot_core::sweeper::ReconciliationSweeper;
use hotspot_core::types::{ImportRow, Money, PurchaseOutcome, TicketState};
use hotspot_testing::mocks::{MockClock, MockPaymentGateway, MockProvisioner};
use std::sync::Arc;

fn row(username: &str, password: &str, profile: &str) -> ImportRow {
    ImportRow {
        username: username.to_string(),
        password: password.to_string(),
        profile: profile.to_string(),
        time_limit: None,
        data_limit: None,
        comment: None,
    }
}

struct Harness {
    tickets: Arc<InMemoryTicketStore>,
    purchases: Arc<InMemoryPurchaseStore>,
    provisioner: Arc<MockProvisioner>,
    clock: Arc<MockClock>,
    importer: TicketImporter,
    orchestrator: PurchaseOrchestrator,
    sweeper: ReconciliationSweeper,
}

fn harness() -> Harness {
    let tickets = Arc::new(InMemoryTicketStore::new());
    let purchases = Arc::new(InMemoryPurchaseStore::new());
    let payment = Arc::new(MockPaymentGateway::new());
    let provisioner = Arc::new(MockProvisioner::new());
    let clock = Arc::new(MockClock::default());

    let importer = TicketImporter::new(
        Arc::clone(&tickets) as Arc<dyn TicketStore>,
        Money::from_cents(500),
    );
    let orchestrator = PurchaseOrchestrator::new(
        Arc::clone(&tickets) as Arc<dyn TicketStore>,
        Arc::clone(&purchases) as Arc<dyn PurchaseStore>,
        Arc::clone(&payment) as Arc<dyn PaymentConfirmation>,
        Arc::clone(&provisioner) as Arc<dyn DeviceProvisioner>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        OrchestratorSettings {
            reservation_ttl: Duration::minutes(5),
            ..OrchestratorSettings::default()
        },
    );
    let sweeper = ReconciliationSweeper::new(
        Arc::clone(&tickets) as Arc<dyn TicketStore>,
        Arc::clone(&purchases) as Arc<dyn PurchaseStore>,
        Arc::clone(&provisioner) as Arc<dyn DeviceProvisioner>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    Harness {
        tickets,
        purchases,
        provisioner,
        clock,
        importer,
        orchestrator,
        sweeper,
    }
}

#[tokio::test]
async fn import_then_sell_batch_in_order() {
    let h = harness();

    // Import two BASIC tickets.
    let report = h
        .importer
        .import(vec![row("a", "1", "BASIC"), row("b", "2", "BASIC")])
        .await
        .unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.failed, 0);

    let types = h.tickets.list_types().await.unwrap();
    assert_eq!(types.len(), 1);
    let type_id = types[0].id;
    assert_eq!(
        h.tickets
            .count_by_type_and_state(type_id, TicketState::Available)
            .await
            .unwrap(),
        2
    );

    // First purchase reserves the oldest ticket ("a").
    let first = h
        .orchestrator
        .create_purchase(type_id, "buyer-1".to_string(), None)
        .await
        .unwrap();
    let first_ticket = h.tickets.get(first.ticket_id.unwrap()).await.unwrap();
    assert_eq!(first_ticket.username, "a");

    // Payment approval sells it and provisions the credential.
    let confirmed = h
        .orchestrator
        .handle_payment_result(
            first.id,
            PaymentResult::Approved {
                reference: "pay-1".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(confirmed.outcome, PurchaseOutcome::Confirmed);
    assert_eq!(
        h.tickets
            .count_by_type_and_state(type_id, TicketState::Available)
            .await
            .unwrap(),
        1
    );
    assert_eq!(h.provisioner.active(), vec!["a".to_string()]);

    // Second purchase gets the remaining ticket ("b").
    let second = h
        .orchestrator
        .create_purchase(type_id, "buyer-2".to_string(), None)
        .await
        .unwrap();
    let second_ticket = h.tickets.get(second.ticket_id.unwrap()).await.unwrap();
    assert_eq!(second_ticket.username, "b");
}

#[tokio::test]
async fn abandoned_purchase_recycles_through_the_sweeper() {
    let h = harness();
    h.importer
        .import(vec![row("a", "1", "BASIC")])
        .await
        .unwrap();
    let type_id = h.tickets.list_types().await.unwrap()[0].id;

    let purchase = h
        .orchestrator
        .create_purchase(type_id, "buyer-1".to_string(), None)
        .await
        .unwrap();

    // A second buyer is out of stock while the reservation is live.
    let err = h
        .orchestrator
        .create_purchase(type_id, "buyer-2".to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        hotspot_core::error::PurchaseError::OutOfStock { .. }
    ));

    // The cart is abandoned; the sweep recycles it after the TTL.
    h.clock.advance(Duration::minutes(6));
    let outcome = h.sweeper.run_once().await.unwrap();
    assert_eq!(outcome.expired_reservations, 1);
    assert_eq!(outcome.expired_purchases, 1);

    assert_eq!(
        h.purchases.get(purchase.id).await.unwrap().outcome,
        PurchaseOutcome::Expired
    );

    // The recycled ticket sells normally.
    let retry = h
        .orchestrator
        .create_purchase(type_id, "buyer-2".to_string(), None)
        .await
        .unwrap();
    let confirmed = h
        .orchestrator
        .handle_payment_result(
            retry.id,
            PaymentResult::Approved {
                reference: "pay-2".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(confirmed.outcome, PurchaseOutcome::Confirmed);
}
