//! Custodia Currency & Fee Engine
//!
//! Exchange-rate caching with a TTL and an ordered fallback chain,
//! two-hop currency conversion through a base currency, and tiered
//! transaction fee computation.

pub mod cache;
pub mod convert;
pub mod error;
pub mod fee;
pub mod source;

pub use cache::{RateCache, RateCacheConfig, RateSnapshot};
pub use convert::CurrencyConverter;
pub use error::{FxError, FxResult};
pub use fee::{FeeQuote, FeeSchedule, FeeTier, TierPolicy};
pub use source::{RateSource, StaticRateSource};

#[cfg(any(test, feature = "test-utils"))]
pub use source::MockRateSource;
