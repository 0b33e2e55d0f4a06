//! FX engine error types.

use custodia_common::{Currency, CustodiaError};
use thiserror::Error;

/// Errors that can occur in the currency and fee engine.
#[derive(Debug, Error)]
pub enum FxError {
    /// Currency code absent from the registry.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// The current snapshot has no rate for this currency.
    #[error("No rate available for {0}")]
    RateUnavailable(Currency),

    /// No fee policy configured for this tier/currency combination.
    #[error("No fee policy for {currency} in tier {tier}")]
    NoFeePolicy { tier: String, currency: Currency },

    /// A rate source failed to deliver a snapshot.
    #[error("Rate source error: {0}")]
    SourceError(String),

    /// Malformed amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

impl From<FxError> for CustodiaError {
    fn from(err: FxError) -> Self {
        match err {
            FxError::UnsupportedCurrency(currency) => {
                CustodiaError::UnsupportedCurrency(currency.code().to_string())
            }
            FxError::RateUnavailable(currency) => {
                CustodiaError::UnsupportedCurrency(currency.code().to_string())
            }
            FxError::InvalidAmount(message) => CustodiaError::Validation {
                message,
                field: Some("amount".to_string()),
            },
            other => CustodiaError::Internal(other.to_string()),
        }
    }
}
