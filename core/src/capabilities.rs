//! External capability contracts consumed by the core.
//!
//! Both capabilities are abstract: the payment provider and the router are
//! separate systems reached over the network, modeled here as traits so the
//! orchestrator and sweeper stay independent of any concrete protocol.
//! Mock implementations live in `hotspot-testing`.

use crate::error::{PaymentError, ProvisionerError};
use crate::types::{Money, PurchaseId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result delivered by the payment provider's callback.
///
/// Delivery is at-least-once: the orchestrator treats a repeated result for
/// an already-settled purchase as a no-op.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentResult {
    /// Payment went through
    Approved {
        /// Provider transaction reference
        reference: String,
    },
    /// Payment was declined or aborted
    Declined {
        /// Provider-supplied reason
        reason: String,
    },
}

/// Payment confirmation capability.
///
/// `request_confirmation` only initiates the payment; the result arrives
/// later through the orchestrator's callback entry point.
#[async_trait]
pub trait PaymentConfirmation: Send + Sync {
    /// Asks the provider to collect `amount` for `purchase_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the provider cannot accept the request; the
    /// purchase is then failed and its ticket released.
    async fn request_confirmation(
        &self,
        purchase_id: PurchaseId,
        amount: Money,
        buyer_contact: Option<&str>,
    ) -> Result<(), PaymentError>;
}

/// A credential as the router sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Hotspot username
    pub username: String,
    /// Hotspot password
    pub password: String,
    /// Router profile name
    pub profile: String,
    /// Router uptime limit string
    pub time_limit: Option<String>,
    /// Router byte limit string
    pub data_limit: Option<String>,
    /// Free-text comment shown in the router UI
    pub comment: Option<String>,
}

/// Device provisioner capability (the router).
///
/// Failures are reported and retried by the caller with backoff; they
/// never block completion of a ticket sale whose payment succeeded.
#[async_trait]
pub trait DeviceProvisioner: Send + Sync {
    /// Activates a credential on the device.
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the credential or is
    /// unreachable.
    async fn provision_credential(&self, credential: &Credential) -> Result<(), ProvisionerError>;

    /// Lists the usernames currently active on the device.
    ///
    /// # Errors
    ///
    /// Returns error if the device is unreachable.
    async fn list_active_credentials(&self) -> Result<Vec<String>, ProvisionerError>;

    /// Removes a credential from the device.
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the request or is unreachable.
    async fn revoke_credential(&self, username: &str) -> Result<(), ProvisionerError>;
}
