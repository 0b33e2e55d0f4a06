//! Static currency metadata and amount validation.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CustodiaError, Result};
use crate::monetary::{Currency, Money};

/// Metadata for a supported currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyInfo {
    /// ISO 4217 code.
    pub code: Currency,
    /// Number of fractional digits amounts are scaled to.
    pub exponent: u32,
    /// Smallest transferable amount.
    pub minimum_unit: Decimal,
    /// Display symbol.
    pub symbol: String,
}

impl CurrencyInfo {
    /// Create currency metadata.
    pub fn new(
        code: Currency,
        exponent: u32,
        minimum_unit: Decimal,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            code,
            exponent,
            minimum_unit,
            symbol: symbol.into(),
        }
    }
}

/// Closed registry of supported currencies.
///
/// Every amount entering the core is validated against this registry; codes
/// not present here are rejected with `UnsupportedCurrency`.
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    currencies: HashMap<Currency, CurrencyInfo>,
}

impl CurrencyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            currencies: HashMap::new(),
        }
    }

    /// Registry with the platform's default currency set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let cent = Decimal::new(1, 2);

        registry.register(CurrencyInfo::new(Currency::usd(), 2, cent, "$"));
        registry.register(CurrencyInfo::new(Currency::eur(), 2, cent, "€"));
        registry.register(CurrencyInfo::new(Currency::gbp(), 2, cent, "£"));
        registry.register(CurrencyInfo::new(Currency::bdt(), 2, cent, "৳"));
        registry.register(CurrencyInfo::new(
            Currency::jpy(),
            0,
            Decimal::ONE,
            "¥",
        ));

        registry
    }

    /// Register a currency.
    pub fn register(&mut self, info: CurrencyInfo) {
        self.currencies.insert(info.code.clone(), info);
    }

    /// Check whether a currency is supported.
    pub fn is_supported(&self, currency: &Currency) -> bool {
        self.currencies.contains_key(currency)
    }

    /// Look up currency metadata.
    pub fn get(&self, currency: &Currency) -> Result<&CurrencyInfo> {
        self.currencies
            .get(currency)
            .ok_or_else(|| CustodiaError::UnsupportedCurrency(currency.code().to_string()))
    }

    /// All supported currency codes.
    pub fn supported_currencies(&self) -> Vec<Currency> {
        self.currencies.keys().cloned().collect()
    }

    /// Round an amount to the currency's exponent, half-up.
    pub fn round(&self, amount: &Money) -> Result<Money> {
        let info = self.get(&amount.currency)?;
        Ok(Money::new(
            amount
                .value
                .round_dp_with_strategy(info.exponent, RoundingStrategy::MidpointAwayFromZero),
            amount.currency.clone(),
        ))
    }

    /// Validate an amount for use in a transaction.
    ///
    /// Rejects unsupported currencies, non-positive values, amounts with more
    /// fractional digits than the currency's exponent, and amounts below the
    /// minimum transferable unit.
    pub fn validate_amount(&self, amount: &Money) -> Result<()> {
        let info = self.get(&amount.currency)?;

        if !amount.is_positive() {
            return Err(CustodiaError::Validation {
                message: "Amount must be positive".to_string(),
                field: Some("amount".to_string()),
            });
        }

        if amount.value.normalize().scale() > info.exponent {
            return Err(CustodiaError::Validation {
                message: format!(
                    "Amount {} has more than {} fractional digits",
                    amount.value, info.exponent
                ),
                field: Some("amount".to_string()),
            });
        }

        if amount.value < info.minimum_unit {
            return Err(CustodiaError::Validation {
                message: format!(
                    "Amount {} is below the minimum unit {} for {}",
                    amount.value, info.minimum_unit, info.code
                ),
                field: Some("amount".to_string()),
            });
        }

        Ok(())
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_registry_contents() {
        let registry = CurrencyRegistry::with_defaults();
        assert!(registry.is_supported(&Currency::usd()));
        assert!(registry.is_supported(&Currency::bdt()));
        assert!(!registry.is_supported(&Currency::new("XAU")));
    }

    #[test]
    fn test_unsupported_currency() {
        let registry = CurrencyRegistry::with_defaults();
        let err = registry.get(&Currency::new("XYZ")).unwrap_err();
        assert!(matches!(err, CustodiaError::UnsupportedCurrency(_)));
    }

    #[test]
    fn test_validate_amount_scale() {
        let registry = CurrencyRegistry::with_defaults();

        let ok = Money::new(dec!(10.25), Currency::usd());
        assert!(registry.validate_amount(&ok).is_ok());

        let too_fine = Money::new(dec!(10.255), Currency::usd());
        assert!(registry.validate_amount(&too_fine).is_err());

        // Trailing zeros beyond the exponent are not a violation.
        let padded = Money::new(dec!(10.2500), Currency::usd());
        assert!(registry.validate_amount(&padded).is_ok());
    }

    #[test]
    fn test_validate_amount_minimum_unit() {
        let registry = CurrencyRegistry::with_defaults();

        let below = Money::new(dec!(0.001), Currency::usd());
        assert!(registry.validate_amount(&below).is_err());

        let jpy_fraction = Money::new(dec!(0.5), Currency::jpy());
        assert!(registry.validate_amount(&jpy_fraction).is_err());
    }

    #[test]
    fn test_validate_amount_rejects_non_positive() {
        let registry = CurrencyRegistry::with_defaults();
        assert!(registry
            .validate_amount(&Money::zero(Currency::usd()))
            .is_err());
        assert!(registry
            .validate_amount(&Money::new(dec!(-5), Currency::usd()))
            .is_err());
    }

    #[test]
    fn test_round_half_up() {
        let registry = CurrencyRegistry::with_defaults();

        let rounded = registry
            .round(&Money::new(dec!(10.005), Currency::usd()))
            .unwrap();
        assert_eq!(rounded.value, dec!(10.01));

        let yen = registry
            .round(&Money::new(dec!(100.5), Currency::jpy()))
            .unwrap();
        assert_eq!(yen.value, dec!(101));
    }
}
