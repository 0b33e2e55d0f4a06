//! Two-hop currency conversion through the cached rate table.

use custodia_common::{Currency, CurrencyRegistry, Money};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::cache::RateCache;
use crate::error::{FxError, FxResult};

/// Converts amounts between registry currencies using the cached snapshot.
pub struct CurrencyConverter {
    registry: Arc<CurrencyRegistry>,
    cache: Arc<RateCache>,
}

impl CurrencyConverter {
    /// Create a new converter.
    pub fn new(registry: Arc<CurrencyRegistry>, cache: Arc<RateCache>) -> Self {
        Self { registry, cache }
    }

    /// Convert an amount to the target currency.
    ///
    /// Identity when the currencies match; otherwise two hops through the
    /// snapshot's base (`from -> base -> to`), rounded half-up to the
    /// target currency's exponent.
    #[instrument(skip(self), fields(from = %amount.currency, to = %to, value = %amount.value))]
    pub async fn convert(&self, amount: &Money, to: &Currency) -> FxResult<Money> {
        if !self.registry.is_supported(&amount.currency) {
            return Err(FxError::UnsupportedCurrency(amount.currency.clone()));
        }
        if !self.registry.is_supported(to) {
            return Err(FxError::UnsupportedCurrency(to.clone()));
        }

        if &amount.currency == to {
            return Ok(amount.clone());
        }

        let snapshot = self.cache.snapshot().await;
        let from_rate = snapshot
            .rate(&amount.currency)
            .ok_or_else(|| FxError::RateUnavailable(amount.currency.clone()))?;
        let to_rate = snapshot
            .rate(to)
            .ok_or_else(|| FxError::RateUnavailable(to.clone()))?;

        if from_rate.is_zero() {
            return Err(FxError::SourceError(format!(
                "Zero rate for {} in snapshot from {}",
                amount.currency, snapshot.source
            )));
        }

        let in_base = amount.value / from_rate;
        let exponent = self
            .registry
            .get(to)
            .map_err(|_| FxError::UnsupportedCurrency(to.clone()))?
            .exponent;
        let converted = (in_base * to_rate)
            .round_dp_with_strategy(exponent, RoundingStrategy::MidpointAwayFromZero);

        debug!(
            rate_source = %snapshot.source,
            converted = %converted,
            "Conversion computed"
        );
        Ok(Money::new(converted, to.clone()))
    }

    /// Effective rate between two currencies from the current snapshot.
    pub async fn rate_between(&self, from: &Currency, to: &Currency) -> FxResult<Decimal> {
        let snapshot = self.cache.snapshot().await;
        let from_rate = snapshot
            .rate(from)
            .ok_or_else(|| FxError::RateUnavailable(from.clone()))?;
        let to_rate = snapshot
            .rate(to)
            .ok_or_else(|| FxError::RateUnavailable(to.clone()))?;
        if from_rate.is_zero() {
            return Err(FxError::SourceError(format!("Zero rate for {from}")));
        }
        Ok(to_rate / from_rate)
    }
}
