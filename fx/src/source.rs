//! Rate source traits and implementations.

use async_trait::async_trait;
use custodia_common::Currency;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::cache::RateSnapshot;
use crate::error::{FxError, FxResult};

/// A provider of whole-table exchange-rate snapshots against a base
/// currency.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch a full snapshot of rates quoted against the base currency
    /// (units of each currency per one unit of base).
    async fn fetch(&self, base: &Currency) -> FxResult<RateSnapshot>;
}

/// A source backed by a fixed rate table. Used for the hard-coded default
/// rates at the end of the fallback chain.
pub struct StaticRateSource {
    name: String,
    rates: HashMap<Currency, Decimal>,
}

impl StaticRateSource {
    /// Create a static source from `(code, rate)` pairs.
    pub fn new(
        name: impl Into<String>,
        rates: impl IntoIterator<Item = (Currency, Decimal)>,
    ) -> Self {
        Self {
            name: name.into(),
            rates: rates.into_iter().collect(),
        }
    }

    /// The platform's built-in defaults, quoted against USD.
    pub fn builtin_defaults() -> Self {
        let rates = [
            (Currency::usd(), Decimal::ONE),
            (Currency::eur(), Decimal::new(92, 2)),
            (Currency::gbp(), Decimal::new(79, 2)),
            (Currency::bdt(), Decimal::new(11750, 2)),
            (Currency::jpy(), Decimal::new(14950, 2)),
        ];
        Self::new("BUILTIN_DEFAULTS", rates)
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, base: &Currency) -> FxResult<RateSnapshot> {
        if !self.rates.contains_key(base) {
            return Err(FxError::RateUnavailable(base.clone()));
        }
        Ok(RateSnapshot::new(
            base.clone(),
            self.rates.clone(),
            self.name.clone(),
        ))
    }
}

/// Mock rate source for testing: programmable rates and failure injection.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    rates: dashmap::DashMap<Currency, Decimal>,
    fail: std::sync::atomic::AtomicBool,
    fetch_count: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            fail: std::sync::atomic::AtomicBool::new(false),
            fetch_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Set the rate for a currency.
    pub fn set_rate(&self, currency: Currency, rate: Decimal) {
        self.rates.insert(currency, rate);
    }

    /// Make subsequent fetches fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of fetches attempted against this source.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, base: &Currency) -> FxResult<RateSnapshot> {
        self.fetch_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FxError::SourceError(format!("{} unreachable", self.name)));
        }

        let mut rates: HashMap<Currency, Decimal> = self
            .rates
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        rates.entry(base.clone()).or_insert(Decimal::ONE);
        Ok(RateSnapshot::new(base.clone(), rates, self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticRateSource::builtin_defaults();
        let snapshot = source.fetch(&Currency::usd()).await.unwrap();

        assert_eq!(snapshot.base, Currency::usd());
        assert_eq!(snapshot.source, "BUILTIN_DEFAULTS");
        assert_eq!(snapshot.rates[&Currency::eur()], dec!(0.92));
    }

    #[tokio::test]
    async fn test_static_source_unknown_base() {
        let source = StaticRateSource::builtin_defaults();
        let result = source.fetch(&Currency::new("XAU")).await;
        assert!(matches!(result, Err(FxError::RateUnavailable(_))));
    }

    #[tokio::test]
    async fn test_mock_source_failure_injection() {
        let source = MockRateSource::new("mock");
        source.set_rate(Currency::eur(), dec!(0.9));

        assert!(source.fetch(&Currency::usd()).await.is_ok());

        source.set_failing(true);
        assert!(source.fetch(&Currency::usd()).await.is_err());
        assert_eq!(source.fetch_count(), 2);
    }
}
