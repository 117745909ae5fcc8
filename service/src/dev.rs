//! Development stand-ins for the external capabilities.
//!
//! These keep the service runnable without a router or a payment provider
//! on hand. In production, replace with the real MikroTik client and
//! payment gateway integrations.

use async_trait::async_trait;
use hotspot_core::capabilities::{Credential, DeviceProvisioner, PaymentConfirmation};
use hotspot_core::error::{PaymentError, ProvisionerError};
use hotspot_core::types::{Money, PurchaseId};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Payment gateway stand-in: accepts every confirmation request.
///
/// The asynchronous payment result is delivered by whoever drives the
/// webhook surface (a demo script, or the operator by hand).
#[derive(Debug, Default)]
pub struct DevPaymentGateway;

impl DevPaymentGateway {
    /// Creates the gateway.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentConfirmation for DevPaymentGateway {
    async fn request_confirmation(
        &self,
        purchase_id: PurchaseId,
        amount: Money,
        buyer_contact: Option<&str>,
    ) -> Result<(), PaymentError> {
        tracing::info!(
            %purchase_id,
            amount = amount.cents(),
            buyer_contact = buyer_contact.unwrap_or(""),
            "payment confirmation requested (dev gateway)"
        );
        Ok(())
    }
}

/// Device stand-in: an in-memory credential set.
#[derive(Debug, Default)]
pub struct DevProvisioner {
    active: Mutex<HashSet<String>>,
}

impl DevProvisioner {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceProvisioner for DevProvisioner {
    async fn provision_credential(&self, credential: &Credential) -> Result<(), ProvisionerError> {
        tracing::info!(
            username = %credential.username,
            profile = %credential.profile,
            "credential provisioned (dev device)"
        );
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credential.username.clone());
        Ok(())
    }

    async fn list_active_credentials(&self) -> Result<Vec<String>, ProvisionerError> {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(active.iter().cloned().collect())
    }

    async fn revoke_credential(&self, username: &str) -> Result<(), ProvisionerError> {
        let removed = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(username);
        if !removed {
            return Err(ProvisionerError::Rejected {
                reason: format!("unknown user {username}"),
            });
        }
        tracing::info!(username, "credential revoked (dev device)");
        Ok(())
    }
}
