//! Purchase orchestration.
//!
//! Ties a buyer's purchase request to the inventory allocator, the payment
//! provider, and the device provisioner. Payment confirmation is
//! asynchronous: `create_purchase` reserves a ticket and initiates the
//! payment, then the provider's result arrives later through
//! [`PurchaseOrchestrator::handle_payment_result`]. No store lock is held
//! while waiting.
//!
//! Once payment has succeeded the sale is final: a provisioning failure is
//! escalated to the operator channel, never surfaced to the buyer and never
//! allowed to release the paid ticket.

use crate::allocator::InventoryAllocator;
use crate::capabilities::{Credential, DeviceProvisioner, PaymentConfirmation, PaymentResult};
use crate::environment::Clock;
use crate::error::{AllocError, PurchaseError, StoreError};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::store::{PurchaseStore, TicketStore};
use crate::types::{Purchase, PurchaseId, PurchaseOutcome, Ticket, TicketTypeId};
use chrono::Duration;
use std::sync::Arc;

/// Tunables for the orchestrator.
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// How long a reservation is held while awaiting payment
    pub reservation_ttl: Duration,
    /// Backoff policy for pushing sold credentials to the device
    pub provision_retry: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::minutes(10),
            provision_retry: RetryPolicy::default(),
        }
    }
}

/// Coordinates purchases across allocation, payment, and provisioning.
pub struct PurchaseOrchestrator {
    tickets: Arc<dyn TicketStore>,
    purchases: Arc<dyn PurchaseStore>,
    allocator: InventoryAllocator,
    payment: Arc<dyn PaymentConfirmation>,
    provisioner: Arc<dyn DeviceProvisioner>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

impl PurchaseOrchestrator {
    /// Creates an orchestrator over the given stores and capabilities.
    #[must_use]
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        purchases: Arc<dyn PurchaseStore>,
        payment: Arc<dyn PaymentConfirmation>,
        provisioner: Arc<dyn DeviceProvisioner>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        let allocator = InventoryAllocator::new(Arc::clone(&tickets), Arc::clone(&clock));
        Self {
            tickets,
            purchases,
            allocator,
            payment,
            provisioner,
            clock,
            settings,
        }
    }

    /// The allocator this orchestrator reserves through.
    #[must_use]
    pub const fn allocator(&self) -> &InventoryAllocator {
        &self.allocator
    }

    /// Starts a purchase: records it, reserves a ticket, and asks the
    /// payment provider for confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`PurchaseError::OutOfStock`] when no ticket of the type is
    /// available (the purchase is recorded as failed),
    /// [`PurchaseError::TypeInactive`] for deactivated types, or
    /// [`PurchaseError::Payment`] when the provider rejects the request
    /// (the reservation is released).
    pub async fn create_purchase(
        &self,
        type_id: TicketTypeId,
        buyer_ref: String,
        buyer_contact: Option<String>,
    ) -> Result<Purchase, PurchaseError> {
        let ticket_type = self.tickets.get_type(type_id).await?;
        if !ticket_type.is_active {
            return Err(PurchaseError::TypeInactive { type_id });
        }

        let purchase = Purchase::new(
            PurchaseId::new(),
            type_id,
            buyer_ref,
            buyer_contact,
            self.clock.now(),
        );
        self.purchases.insert(purchase.clone()).await?;
        tracing::info!(purchase_id = %purchase.id, %type_id, "purchase created");

        let ticket = match self
            .allocator
            .reserve(type_id, &purchase.claimant(), self.settings.reservation_ttl)
            .await
        {
            Ok(ticket) => ticket,
            Err(AllocError::OutOfStock { .. }) => {
                self.settle(
                    purchase.id,
                    PurchaseOutcome::Failed {
                        reason: "no inventory".to_string(),
                    },
                    None,
                )
                .await?;
                return Err(PurchaseError::OutOfStock { type_id });
            }
            Err(AllocError::InvalidState { reason }) => {
                return Err(PurchaseError::Store(StoreError::Backend(reason)));
            }
            Err(AllocError::Store(err)) => return Err(err.into()),
        };

        self.purchases.bind_ticket(purchase.id, ticket.id).await?;

        if let Err(err) = self
            .payment
            .request_confirmation(
                purchase.id,
                ticket_type.price,
                purchase.buyer_contact.as_deref(),
            )
            .await
        {
            // The provider never saw the purchase, so the claim can be
            // returned to the pool immediately.
            if let Err(release_err) = self.allocator.release(ticket.id, &purchase.claimant()).await
            {
                tracing::warn!(
                    purchase_id = %purchase.id,
                    error = %release_err,
                    "could not release reservation after failed payment request"
                );
            }
            self.settle(
                purchase.id,
                PurchaseOutcome::Failed {
                    reason: format!("payment request failed: {err}"),
                },
                None,
            )
            .await?;
            return Err(err.into());
        }

        self.purchases.get(purchase.id).await.map_err(Into::into)
    }

    /// Applies a payment result delivered by the provider.
    ///
    /// Tolerates at-least-once delivery: a repeated result for an
    /// already-confirmed purchase is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PurchaseError::ReservationExpired`] when a success result
    /// arrives after the reservation lapsed; the buyer must retry the
    /// purchase and the payment needs operator attention.
    pub async fn handle_payment_result(
        &self,
        purchase_id: PurchaseId,
        result: PaymentResult,
    ) -> Result<Purchase, PurchaseError> {
        let purchase = self.purchases.get(purchase_id).await?;

        match (purchase.outcome.clone(), result) {
            (PurchaseOutcome::Confirmed, PaymentResult::Approved { .. }) => {
                tracing::debug!(%purchase_id, "duplicate payment approval ignored");
                Ok(purchase)
            }
            (
                PurchaseOutcome::Confirmed | PurchaseOutcome::Failed { .. } | PurchaseOutcome::Expired,
                PaymentResult::Declined { .. },
            ) => {
                tracing::debug!(
                    %purchase_id,
                    outcome = %purchase.outcome,
                    "late payment decline ignored"
                );
                Ok(purchase)
            }
            (
                PurchaseOutcome::Failed { .. } | PurchaseOutcome::Expired,
                PaymentResult::Approved { .. },
            ) => {
                tracing::warn!(
                    %purchase_id,
                    outcome = %purchase.outcome,
                    "payment approval for a settled purchase; operator review needed"
                );
                Err(PurchaseError::ReservationExpired)
            }
            (PurchaseOutcome::Pending, PaymentResult::Approved { reference }) => {
                self.confirm_pending(purchase, &reference).await
            }
            (PurchaseOutcome::Pending, PaymentResult::Declined { reason }) => {
                self.fail_pending(purchase, &reason).await
            }
        }
    }

    /// Cancels a purchase before payment confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`PurchaseError::AlreadySettled`] once the purchase has
    /// reached a terminal outcome; a confirmed sale is cancelled through a
    /// refund flow, not here.
    pub async fn cancel(&self, purchase_id: PurchaseId) -> Result<Purchase, PurchaseError> {
        let purchase = self.purchases.get(purchase_id).await?;
        if purchase.outcome.is_terminal() {
            return Err(PurchaseError::AlreadySettled {
                id: purchase_id,
                outcome: purchase.outcome,
            });
        }

        if let Some(ticket_id) = purchase.ticket_id {
            match self.allocator.release(ticket_id, &purchase.claimant()).await {
                Ok(_) | Err(AllocError::InvalidState { .. }) => {}
                Err(AllocError::OutOfStock { .. }) => {}
                Err(AllocError::Store(err)) => return Err(err.into()),
            }
        }

        let updated = self
            .settle(
                purchase_id,
                PurchaseOutcome::Failed {
                    reason: "cancelled by buyer".to_string(),
                },
                None,
            )
            .await?;
        tracing::info!(%purchase_id, "purchase cancelled");
        Ok(updated)
    }

    /// Reads a purchase, settling it as `Expired` if its reservation has
    /// been lost in the meantime.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PurchaseNotFound`] via
    /// [`PurchaseError::Store`] for unknown ids.
    pub async fn status(&self, purchase_id: PurchaseId) -> Result<Purchase, PurchaseError> {
        let purchase = self.purchases.get(purchase_id).await?;
        if purchase.outcome.is_terminal() {
            return Ok(purchase);
        }

        let Some(ticket_id) = purchase.ticket_id else {
            return Ok(purchase);
        };
        let ticket = match self.tickets.get(ticket_id).await {
            Ok(ticket) => ticket,
            Err(StoreError::TicketNotFound { .. }) => return Ok(purchase),
            Err(err) => return Err(err.into()),
        };

        if purchase.reservation_lost(&ticket, self.clock.now()) {
            let updated = self.settle(purchase_id, PurchaseOutcome::Expired, None).await?;
            tracing::info!(%purchase_id, "purchase expired");
            return Ok(updated);
        }

        Ok(purchase)
    }

    async fn confirm_pending(
        &self,
        purchase: Purchase,
        reference: &str,
    ) -> Result<Purchase, PurchaseError> {
        let Some(ticket_id) = purchase.ticket_id else {
            self.settle(purchase.id, PurchaseOutcome::Expired, None).await?;
            return Err(PurchaseError::ReservationExpired);
        };

        let ticket = match self
            .allocator
            .confirm(ticket_id, &purchase.claimant(), reference)
            .await
        {
            Ok(ticket) => ticket,
            Err(AllocError::InvalidState { reason }) => {
                // A concurrent delivery of this same result may have sold
                // the ticket under our payment reference already.
                let current = self.tickets.get(ticket_id).await?;
                if current.state == crate::types::TicketState::Sold
                    && current.sold_to.as_deref() == Some(reference)
                {
                    return self
                        .settle(
                            purchase.id,
                            PurchaseOutcome::Confirmed,
                            Some(reference.to_string()),
                        )
                        .await;
                }

                tracing::warn!(
                    purchase_id = %purchase.id,
                    %ticket_id,
                    reason,
                    "payment approved but reservation no longer confirmable"
                );
                self.settle(purchase.id, PurchaseOutcome::Expired, None).await?;
                return Err(PurchaseError::ReservationExpired);
            }
            Err(AllocError::OutOfStock { type_id }) => {
                return Err(PurchaseError::OutOfStock { type_id });
            }
            Err(AllocError::Store(err)) => return Err(err.into()),
        };

        let updated = match self
            .purchases
            .compare_and_set_outcome(
                purchase.id,
                PurchaseOutcome::Pending,
                PurchaseOutcome::Confirmed,
                Some(reference.to_string()),
                self.clock.now(),
            )
            .await
        {
            Ok(updated) => updated,
            // A concurrent delivery of the same result won the swap; the
            // sale is already settled.
            Err(StoreError::StaleOutcome { .. }) => {
                return self.purchases.get(purchase.id).await.map_err(Into::into);
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            purchase_id = %updated.id,
            ticket_id = %ticket.id,
            payment_ref = reference,
            "purchase confirmed"
        );

        self.provision_sold(&ticket).await;
        Ok(updated)
    }

    async fn fail_pending(
        &self,
        purchase: Purchase,
        reason: &str,
    ) -> Result<Purchase, PurchaseError> {
        if let Some(ticket_id) = purchase.ticket_id {
            match self.allocator.release(ticket_id, &purchase.claimant()).await {
                Ok(_) => {}
                // Already expired or reassigned; nothing to return.
                Err(AllocError::InvalidState { .. } | AllocError::OutOfStock { .. }) => {}
                Err(AllocError::Store(err)) => return Err(err.into()),
            }
        }

        let updated = self
            .settle(
                purchase.id,
                PurchaseOutcome::Failed {
                    reason: format!("payment declined: {reason}"),
                },
                None,
            )
            .await?;
        tracing::info!(purchase_id = %updated.id, reason, "purchase failed");
        Ok(updated)
    }

    /// Pushes a sold credential to the device, retrying with backoff.
    ///
    /// Failures are operator remediation items: the sale stands, the drift
    /// sweep will keep flagging the missing credential until it is fixed.
    async fn provision_sold(&self, ticket: &Ticket) {
        let ticket_type = match self.tickets.get_type(ticket.type_id).await {
            Ok(ticket_type) => ticket_type,
            Err(err) => {
                tracing::error!(
                    ticket_id = %ticket.id,
                    error = %err,
                    "could not load ticket type for provisioning; operator remediation required"
                );
                return;
            }
        };

        let credential = Credential {
            username: ticket.username.clone(),
            password: ticket.password.clone(),
            profile: ticket_type.profile.clone(),
            time_limit: ticket_type.time_limit.clone(),
            data_limit: ticket_type.data_limit.clone(),
            comment: ticket.comment.clone(),
        };

        let provisioner = Arc::clone(&self.provisioner);
        let result = retry_with_backoff(&self.settings.provision_retry, || {
            let provisioner = Arc::clone(&provisioner);
            let credential = credential.clone();
            async move { provisioner.provision_credential(&credential).await }
        })
        .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    ticket_id = %ticket.id,
                    username = %ticket.username,
                    "credential provisioned"
                );
            }
            Err(err) => {
                tracing::error!(
                    ticket_id = %ticket.id,
                    username = %ticket.username,
                    error = %err,
                    "provisioning failed after retries; operator remediation required"
                );
            }
        }
    }

    /// Settles a pending purchase, tolerating a lost race.
    async fn settle(
        &self,
        purchase_id: PurchaseId,
        outcome: PurchaseOutcome,
        payment_ref: Option<String>,
    ) -> Result<Purchase, PurchaseError> {
        match self
            .purchases
            .compare_and_set_outcome(
                purchase_id,
                PurchaseOutcome::Pending,
                outcome,
                payment_ref,
                self.clock.now(),
            )
            .await
        {
            Ok(updated) => Ok(updated),
            Err(StoreError::StaleOutcome { .. }) => {
                self.purchases.get(purchase_id).await.map_err(Into::into)
            }
            Err(err) => Err(err.into()),
        }
    }
}
