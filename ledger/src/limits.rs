//! Spending limits and limit decisions.

use custodia_common::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configured spending limits for a wallet.
///
/// The per-transaction min/max apply to every currency; the daily and
/// monthly caps are rolling totals of debits per currency over the current
/// UTC day and month.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpendingLimits {
    /// Minimum amount per transaction.
    pub min_per_transaction: Option<Decimal>,
    /// Maximum amount per transaction.
    pub max_per_transaction: Option<Decimal>,
    /// Per-currency cap on debits within the current UTC day.
    pub daily: HashMap<Currency, Decimal>,
    /// Per-currency cap on debits within the current UTC month.
    pub monthly: HashMap<Currency, Decimal>,
}

impl SpendingLimits {
    /// No limits configured.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Set the per-transaction bounds.
    pub fn with_transaction_bounds(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_per_transaction = Some(min);
        self.max_per_transaction = Some(max);
        self
    }

    /// Set the daily cap for a currency.
    pub fn with_daily_cap(mut self, currency: Currency, cap: Decimal) -> Self {
        self.daily.insert(currency, cap);
        self
    }

    /// Set the monthly cap for a currency.
    pub fn with_monthly_cap(mut self, currency: Currency, cap: Decimal) -> Self {
        self.monthly.insert(currency, cap);
        self
    }
}

/// Outcome of a limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitDecision {
    /// Whether the amount is allowed.
    pub allowed: bool,
    /// Why it was denied, when it was.
    pub reason: Option<String>,
}

impl LimitDecision {
    /// An allowing decision.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A denying decision with a reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_builder() {
        let limits = SpendingLimits::unlimited()
            .with_transaction_bounds(dec!(1), dec!(1000))
            .with_daily_cap(Currency::usd(), dec!(5000));

        assert_eq!(limits.min_per_transaction, Some(dec!(1)));
        assert_eq!(limits.max_per_transaction, Some(dec!(1000)));
        assert_eq!(limits.daily.get(&Currency::usd()), Some(&dec!(5000)));
        assert!(limits.monthly.is_empty());
    }

    #[test]
    fn test_decisions() {
        assert!(LimitDecision::allow().allowed);
        let denied = LimitDecision::deny("over daily cap");
        assert!(!denied.allowed);
        assert_eq!(denied.reason.as_deref(), Some("over daily cap"));
    }
}
