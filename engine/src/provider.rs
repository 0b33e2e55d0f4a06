//! External settlement provider seam.

use async_trait::async_trait;
use custodia_common::{Money, TransactionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from an external settlement provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider could not be reached or timed out; retryable.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the payment outright.
    #[error("Provider rejected payment: {0}")]
    Rejected(String),
}

/// Session opened by a provider for an initiated payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSession {
    /// Provider-side payment identifier.
    pub provider_payment_id: String,
    /// Where the payer should be redirected to complete the payment,
    /// when the provider uses a hosted flow.
    pub redirect_target: Option<String>,
}

/// Verified settlement result delivered through the provider's webhook.
///
/// The engine trusts this result to drive `Processing` to its terminal
/// status; verification of the raw payload happens at the boundary layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCallback {
    /// Our transaction the callback settles (the order id given at
    /// initiation).
    pub order_id: TransactionId,
    /// Whether the provider settled the payment.
    pub success: bool,
    /// Provider-side settlement identifier.
    pub provider_transaction_id: Option<String>,
    /// Provider-side failure description, when failed.
    pub failure_reason: Option<String>,
}

/// An external settlement provider (payment gateway, payout rail).
#[async_trait]
pub trait SettlementProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Open a payment session for the given order.
    async fn initiate(
        &self,
        amount: &Money,
        order_id: TransactionId,
        counterparty_ref: Option<&str>,
    ) -> Result<ProviderSession, ProviderError>;
}

/// Mock settlement provider for testing: records initiations and can be
/// switched into failure mode.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockSettlementProvider {
    name: String,
    fail: std::sync::atomic::AtomicBool,
    initiated: parking_lot::Mutex<Vec<TransactionId>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockSettlementProvider {
    /// Create a new mock provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail: std::sync::atomic::AtomicBool::new(false),
            initiated: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent initiations fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Orders initiated against this provider.
    pub fn initiated(&self) -> Vec<TransactionId> {
        self.initiated.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl SettlementProvider for MockSettlementProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initiate(
        &self,
        _amount: &Money,
        order_id: TransactionId,
        _counterparty_ref: Option<&str>,
    ) -> Result<ProviderSession, ProviderError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ProviderError::Unavailable(format!(
                "{} unreachable",
                self.name
            )));
        }

        self.initiated.lock().push(order_id);
        Ok(ProviderSession {
            provider_payment_id: format!("{}-{}", self.name, order_id),
            redirect_target: None,
        })
    }
}
