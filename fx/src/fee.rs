//! Tiered transaction fee computation.

use custodia_common::{Currency, CurrencyRegistry, Money};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Fee tier. Closed enumeration; each tier carries its own per-currency
/// rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    Standard,
    Express,
    BillPayment,
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeeTier::Standard => "standard",
            FeeTier::Express => "express",
            FeeTier::BillPayment => "bill_payment",
        };
        write!(f, "{name}")
    }
}

/// Fee policy for one tier/currency combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Proportional rate (fraction of the amount).
    pub rate: Decimal,
    /// Floor applied after the proportional fee.
    pub minimum_fee: Decimal,
    /// Optional ceiling.
    pub maximum_fee: Option<Decimal>,
}

impl TierPolicy {
    /// Create a policy.
    pub fn new(rate: Decimal, minimum_fee: Decimal, maximum_fee: Option<Decimal>) -> Self {
        Self {
            rate,
            minimum_fee,
            maximum_fee,
        }
    }
}

/// A computed fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    /// Fee amount in the transaction currency.
    pub amount: Money,
    /// Rate the fee was derived from.
    pub rate: Decimal,
}

/// Per-tier, per-currency fee tables.
pub struct FeeSchedule {
    registry: Arc<CurrencyRegistry>,
    tables: HashMap<FeeTier, HashMap<Currency, TierPolicy>>,
}

impl FeeSchedule {
    /// Create an empty schedule.
    pub fn new(registry: Arc<CurrencyRegistry>) -> Self {
        Self {
            registry,
            tables: HashMap::new(),
        }
    }

    /// The platform's default schedule.
    pub fn with_defaults(registry: Arc<CurrencyRegistry>) -> Self {
        let mut schedule = Self::new(registry);

        for currency in [
            Currency::usd(),
            Currency::eur(),
            Currency::gbp(),
            Currency::bdt(),
            Currency::jpy(),
        ] {
            schedule.set_policy(
                FeeTier::Standard,
                currency.clone(),
                TierPolicy::new(Decimal::new(15, 3), Decimal::new(25, 2), None),
            );
            schedule.set_policy(
                FeeTier::Express,
                currency.clone(),
                TierPolicy::new(
                    Decimal::new(25, 3),
                    Decimal::new(50, 2),
                    Some(Decimal::from(250)),
                ),
            );
            schedule.set_policy(
                FeeTier::BillPayment,
                currency,
                TierPolicy::new(
                    Decimal::new(5, 3),
                    Decimal::new(10, 2),
                    Some(Decimal::from(50)),
                ),
            );
        }

        schedule
    }

    /// Set the policy for a tier/currency combination.
    pub fn set_policy(&mut self, tier: FeeTier, currency: Currency, policy: TierPolicy) {
        self.tables.entry(tier).or_default().insert(currency, policy);
    }

    /// Compute the fee for an amount.
    ///
    /// `max(amount × rate, minimum_fee)`, clamped to `maximum_fee` when
    /// configured, rounded half-up to the currency's exponent.
    pub fn compute(&self, amount: &Money, tier: FeeTier) -> FxResult<FeeQuote> {
        if !self.registry.is_supported(&amount.currency) {
            return Err(FxError::UnsupportedCurrency(amount.currency.clone()));
        }
        if !amount.is_positive() {
            return Err(FxError::InvalidAmount(format!(
                "Fee basis must be positive, got {}",
                amount.value
            )));
        }

        let policy = self
            .tables
            .get(&tier)
            .and_then(|table| table.get(&amount.currency))
            .ok_or_else(|| FxError::NoFeePolicy {
                tier: tier.to_string(),
                currency: amount.currency.clone(),
            })?;

        let mut fee = (amount.value * policy.rate).max(policy.minimum_fee);
        if let Some(maximum) = policy.maximum_fee {
            fee = fee.min(maximum);
        }

        let exponent = self
            .registry
            .get(&amount.currency)
            .map_err(|_| FxError::UnsupportedCurrency(amount.currency.clone()))?
            .exponent;
        let fee = fee.round_dp_with_strategy(exponent, RoundingStrategy::MidpointAwayFromZero);

        debug!(
            tier = %tier,
            currency = %amount.currency,
            basis = %amount.value,
            fee = %fee,
            "Fee computed"
        );

        Ok(FeeQuote {
            amount: Money::new(fee, amount.currency.clone()),
            rate: policy.rate,
        })
    }
}
