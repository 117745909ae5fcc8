//! # Hotspot Testing
//!
//! Testing utilities for the hotspot portal:
//!
//! - A mutable mock clock so reservation expiry can be driven
//!   deterministically
//! - A recording, fault-injecting mock device provisioner
//! - A recording mock payment gateway (payment results are delivered by
//!   the test through the orchestrator's callback entry point)
//! - Builders for import batches
//!
//! ## Example
//!
//! ```
//! use hotspot_testing::mocks::MockClock;
//! use hotspot_core::environment::Clock;
//! use chrono::Duration;
//!
//! let clock = MockClock::default();
//! let before = clock.now();
//! clock.advance(Duration::minutes(10));
//! assert_eq!(clock.now() - before, Duration::minutes(10));
//! ```

/// Mock implementations of the core capability and environment traits.
pub mod mocks {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use hotspot_core::capabilities::{Credential, DeviceProvisioner, PaymentConfirmation};
    use hotspot_core::environment::Clock;
    use hotspot_core::error::{PaymentError, ProvisionerError};
    use hotspot_core::types::{Money, PurchaseId};
    use std::sync::{Mutex, PoisonError};

    /// Mutable clock for deterministic tests.
    ///
    /// Starts at a fixed instant (2025-01-01 00:00:00 UTC by default) and
    /// only moves when the test advances it.
    #[derive(Debug)]
    pub struct MockClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl MockClock {
        /// Creates a clock pinned to `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Moves the clock forward by `delta`.
        pub fn advance(&self, delta: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }

        /// Pins the clock to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Default for MockClock {
        #[allow(clippy::expect_used)]
        fn default() -> Self {
            Self::new(
                DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                    .expect("hardcoded timestamp should always parse")
                    .with_timezone(&Utc),
            )
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    #[derive(Debug, Default)]
    struct ProvisionerState {
        active: Vec<String>,
        provisioned: Vec<Credential>,
        revoked: Vec<String>,
        fail_next: usize,
        offline: bool,
    }

    /// Recording mock device provisioner.
    ///
    /// Tracks every provisioned credential and the set of active usernames;
    /// failures can be injected per-call (`fail_next`) or wholesale
    /// (`set_offline`).
    #[derive(Debug, Default)]
    pub struct MockProvisioner {
        state: Mutex<ProvisionerState>,
    }

    impl MockProvisioner {
        /// Creates an empty provisioner.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds an active credential, as if provisioned out of band.
        pub fn activate(&self, username: &str) {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.active.push(username.to_string());
        }

        /// Makes the next `count` provisioning calls fail.
        pub fn fail_next(&self, count: usize) {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .fail_next = count;
        }

        /// Toggles full unreachability.
        pub fn set_offline(&self, offline: bool) {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .offline = offline;
        }

        /// Credentials successfully provisioned so far.
        #[must_use]
        pub fn provisioned(&self) -> Vec<Credential> {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .provisioned
                .clone()
        }

        /// Usernames currently active on the mock device.
        #[must_use]
        pub fn active(&self) -> Vec<String> {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .active
                .clone()
        }

        /// Usernames revoked so far.
        #[must_use]
        pub fn revoked(&self) -> Vec<String> {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .revoked
                .clone()
        }
    }

    #[async_trait]
    impl DeviceProvisioner for MockProvisioner {
        async fn provision_credential(
            &self,
            credential: &Credential,
        ) -> Result<(), ProvisionerError> {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.offline {
                return Err(ProvisionerError::Unavailable {
                    message: "mock device offline".to_string(),
                });
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(ProvisionerError::Rejected {
                    reason: "injected failure".to_string(),
                });
            }
            state.active.push(credential.username.clone());
            state.provisioned.push(credential.clone());
            Ok(())
        }

        async fn list_active_credentials(&self) -> Result<Vec<String>, ProvisionerError> {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.offline {
                return Err(ProvisionerError::Unavailable {
                    message: "mock device offline".to_string(),
                });
            }
            Ok(state.active.clone())
        }

        async fn revoke_credential(&self, username: &str) -> Result<(), ProvisionerError> {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.offline {
                return Err(ProvisionerError::Unavailable {
                    message: "mock device offline".to_string(),
                });
            }
            let before = state.active.len();
            state.active.retain(|name| name != username);
            if state.active.len() == before {
                return Err(ProvisionerError::Rejected {
                    reason: format!("unknown user {username}"),
                });
            }
            state.revoked.push(username.to_string());
            Ok(())
        }
    }

    /// One recorded confirmation request.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct ConfirmationRequest {
        /// Purchase the provider was asked to collect for
        pub purchase_id: PurchaseId,
        /// Amount requested
        pub amount: Money,
        /// Contact passed through
        pub buyer_contact: Option<String>,
    }

    #[derive(Debug, Default)]
    struct GatewayState {
        requests: Vec<ConfirmationRequest>,
        fail_next: usize,
    }

    /// Recording mock payment gateway.
    ///
    /// Only records confirmation requests; tests deliver the asynchronous
    /// payment result themselves via the orchestrator.
    #[derive(Debug, Default)]
    pub struct MockPaymentGateway {
        state: Mutex<GatewayState>,
    }

    impl MockPaymentGateway {
        /// Creates a gateway that accepts every request.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `count` confirmation requests fail.
        pub fn fail_next(&self, count: usize) {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .fail_next = count;
        }

        /// Confirmation requests recorded so far.
        #[must_use]
        pub fn requests(&self) -> Vec<ConfirmationRequest> {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .requests
                .clone()
        }
    }

    #[async_trait]
    impl PaymentConfirmation for MockPaymentGateway {
        async fn request_confirmation(
            &self,
            purchase_id: PurchaseId,
            amount: Money,
            buyer_contact: Option<&str>,
        ) -> Result<(), PaymentError> {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(PaymentError::Unavailable {
                    message: "injected gateway failure".to_string(),
                });
            }
            state.requests.push(ConfirmationRequest {
                purchase_id,
                amount,
                buyer_contact: buyer_contact.map(str::to_string),
            });
            Ok(())
        }
    }
}

/// Builders for test data.
pub mod helpers {
    use hotspot_core::types::ImportRow;

    /// Builds an import row with no limits and no comment.
    #[must_use]
    pub fn import_row(username: &str, password: &str, profile: &str) -> ImportRow {
        ImportRow {
            username: username.to_string(),
            password: password.to_string(),
            profile: profile.to_string(),
            time_limit: None,
            data_limit: None,
            comment: None,
        }
    }

    /// Builds a batch of rows for one profile, usernames `u1..uN`.
    #[must_use]
    pub fn import_batch(profile: &str, count: usize) -> Vec<ImportRow> {
        (1..=count)
            .map(|n| import_row(&format!("u{n}"), &format!("p{n}"), profile))
            .collect()
    }
}
