//! Error taxonomy for the Custodia wallet core.

use crate::{TransactionId, TransactionStatus, WalletId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for Custodia operations.
#[derive(Error, Debug)]
pub enum CustodiaError {
    /// Malformed or out-of-range input; caller's fault, no side effect.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// A bucket did not hold enough to cover a debit or move.
    #[error("Insufficient {bucket} balance on wallet {wallet_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        wallet_id: WalletId,
        currency: String,
        bucket: &'static str,
        requested: Decimal,
        available: Decimal,
    },

    /// A configured per-transaction or rolling limit would be exceeded.
    #[error("Limit exceeded for wallet {wallet_id}: {reason}")]
    LimitExceeded { wallet_id: WalletId, reason: String },

    /// Wallet exists but is not in a state that allows the operation.
    #[error("Wallet not active: {0}")]
    WalletNotActive(WalletId),

    /// Wallet not found.
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// A wallet of this kind already exists for the account.
    #[error("Wallet already exists for account {account_id}")]
    WalletExists { account_id: String },

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Transaction is already terminal and cannot be cancelled.
    #[error("Transaction not cancellable: {0}")]
    NotCancellable(TransactionId),

    /// Duplicate external reference (idempotency violation).
    #[error("Duplicate external reference: {0}")]
    DuplicateReference(String),

    /// Currency code absent from the registry.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// External settlement provider failed; transient, retryable.
    #[error("Settlement provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Invalid state transition.
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// One-time code was issued too recently to reissue.
    #[error("One-time code cooldown active, retry after {retry_after_secs}s")]
    OtcCooldown { retry_after_secs: i64 },

    /// One-time code has expired.
    #[error("One-time code expired")]
    OtcExpired,

    /// One-time code did not match.
    #[error("One-time code mismatch, {remaining_attempts} attempts remaining")]
    OtcMismatch { remaining_attempts: u32 },

    /// No live one-time code for this key.
    #[error("No one-time code issued for this operation")]
    OtcNotFound,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CustodiaError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CustodiaError::ProviderUnavailable(_))
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CustodiaError::Validation { .. } => "VALIDATION_ERROR",
            CustodiaError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            CustodiaError::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            CustodiaError::WalletNotActive(_) => "WALLET_NOT_ACTIVE",
            CustodiaError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            CustodiaError::WalletExists { .. } => "WALLET_EXISTS",
            CustodiaError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            CustodiaError::NotCancellable(_) => "NOT_CANCELLABLE",
            CustodiaError::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            CustodiaError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            CustodiaError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            CustodiaError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CustodiaError::OtcCooldown { .. } => "OTC_COOLDOWN",
            CustodiaError::OtcExpired => "OTC_EXPIRED",
            CustodiaError::OtcMismatch { .. } => "OTC_MISMATCH",
            CustodiaError::OtcNotFound => "OTC_NOT_FOUND",
            CustodiaError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for Custodia operations.
pub type Result<T> = std::result::Result<T, CustodiaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CustodiaError::ProviderUnavailable("gateway timeout".into()).is_retryable());
        assert!(!CustodiaError::OtcExpired.is_retryable());
        assert!(!CustodiaError::DuplicateReference("ref-1".into()).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        let err = CustodiaError::Validation {
            message: "bad".into(),
            field: None,
        };
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(CustodiaError::OtcExpired.error_code(), "OTC_EXPIRED");
    }
}
