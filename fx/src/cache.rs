//! Exchange-rate snapshot caching with TTL and an ordered fallback chain.

use chrono::{DateTime, Duration, Utc};
use custodia_common::Currency;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::FxResult;
use crate::source::RateSource;

/// A whole-table snapshot of rates against a base currency.
///
/// Snapshots are replaced wholesale on refresh, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSnapshot {
    /// Base currency the table is quoted against.
    pub base: Currency,
    /// Units of each currency per one unit of base.
    pub rates: HashMap<Currency, Decimal>,
    /// Where the snapshot came from.
    pub source: String,
    /// When the snapshot was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl RateSnapshot {
    /// Create a new snapshot stamped with the current time.
    pub fn new(base: Currency, mut rates: HashMap<Currency, Decimal>, source: String) -> Self {
        // The base always quotes at 1 against itself.
        rates.entry(base.clone()).or_insert(Decimal::ONE);
        Self {
            base,
            rates,
            source,
            fetched_at: Utc::now(),
        }
    }

    /// Rate for a currency against the base, if present.
    pub fn rate(&self, currency: &Currency) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }

    /// Check if the snapshot is still within its freshness window.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        Utc::now().signed_duration_since(self.fetched_at) < ttl
    }
}

/// Configuration for the rate cache.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// Base currency all rates are quoted against.
    pub base: Currency,
    /// Snapshot freshness window.
    pub ttl: Duration,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            base: Currency::usd(),
            ttl: custodia_common::time::constants::rate_snapshot_ttl(),
        }
    }
}

/// TTL'd snapshot cache in front of an ordered chain of rate sources.
///
/// Refresh order on a stale snapshot: primary source, then secondary, then
/// the prior (stale) snapshot, then the hard-coded defaults. A fetch failure
/// never reaches the caller; each degradation step is logged. At most one
/// refresh runs at a time and concurrent cache-miss callers share its
/// result.
pub struct RateCache {
    config: RateCacheConfig,
    primary: Arc<dyn RateSource>,
    secondary: Option<Arc<dyn RateSource>>,
    defaults: RateSnapshot,
    snapshot: RwLock<Option<RateSnapshot>>,
    refresh: tokio::sync::Mutex<()>,
}

impl RateCache {
    /// Create a new cache over the given source chain.
    pub fn new(
        config: RateCacheConfig,
        primary: Arc<dyn RateSource>,
        secondary: Option<Arc<dyn RateSource>>,
        defaults: RateSnapshot,
    ) -> Self {
        Self {
            config,
            primary,
            secondary,
            defaults,
            snapshot: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// The base currency of the rate table.
    pub fn base(&self) -> &Currency {
        &self.config.base
    }

    /// Current snapshot, refreshed through the fallback chain when stale.
    /// Never fails: the chain bottoms out at the built-in defaults.
    pub async fn snapshot(&self) -> RateSnapshot {
        if let Some(fresh) = self.fresh_snapshot() {
            debug!(source = %fresh.source, "Rate snapshot cache hit");
            return fresh;
        }

        // Single-flight: the first staleness observer refreshes, everyone
        // else waits here and re-reads what it installed.
        let _guard = self.refresh.lock().await;
        if let Some(fresh) = self.fresh_snapshot() {
            return fresh;
        }
        self.refresh_locked().await
    }

    /// Refresh regardless of the TTL.
    pub async fn force_refresh(&self) -> RateSnapshot {
        let _guard = self.refresh.lock().await;
        self.refresh_locked().await
    }

    fn fresh_snapshot(&self) -> Option<RateSnapshot> {
        let snapshot = self.snapshot.read();
        snapshot
            .as_ref()
            .filter(|s| s.is_fresh(self.config.ttl))
            .cloned()
    }

    async fn refresh_locked(&self) -> RateSnapshot {
        match self.primary.fetch(&self.config.base).await {
            Ok(snapshot) => {
                debug!(source = %snapshot.source, "Rate snapshot refreshed from primary");
                *self.snapshot.write() = Some(snapshot.clone());
                return snapshot;
            }
            Err(e) => {
                warn!(
                    source = self.primary.name(),
                    error = %e,
                    "Primary rate source failed, trying secondary"
                );
            }
        }

        if let Some(secondary) = &self.secondary {
            match secondary.fetch(&self.config.base).await {
                Ok(snapshot) => {
                    debug!(source = %snapshot.source, "Rate snapshot refreshed from secondary");
                    *self.snapshot.write() = Some(snapshot.clone());
                    return snapshot;
                }
                Err(e) => {
                    warn!(
                        source = secondary.name(),
                        error = %e,
                        "Secondary rate source failed"
                    );
                }
            }
        }

        // Both sources down: a stale table beats no table. The stale
        // snapshot is served as-is, not re-stamped, so the next caller
        // retries the sources.
        if let Some(stale) = self.snapshot.read().clone() {
            warn!(
                fetched_at = %stale.fetched_at,
                "Serving stale rate snapshot"
            );
            return stale;
        }

        warn!("No rate snapshot ever fetched, serving built-in defaults");
        self.defaults.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MockRateSource, StaticRateSource};
    use rust_decimal_macros::dec;

    fn defaults() -> RateSnapshot {
        RateSnapshot::new(
            Currency::usd(),
            [(Currency::eur(), dec!(0.90))].into_iter().collect(),
            "DEFAULTS".to_string(),
        )
    }

    fn primary() -> Arc<MockRateSource> {
        let source = Arc::new(MockRateSource::new("primary"));
        source.set_rate(Currency::eur(), dec!(0.92));
        source
    }

    fn secondary() -> Arc<MockRateSource> {
        let source = Arc::new(MockRateSource::new("secondary"));
        source.set_rate(Currency::eur(), dec!(0.91));
        source
    }

    #[tokio::test]
    async fn test_snapshot_from_primary() {
        let cache = RateCache::new(
            RateCacheConfig::default(),
            primary(),
            Some(secondary()),
            defaults(),
        );

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.source, "primary");
        assert_eq!(snapshot.rate(&Currency::eur()), Some(dec!(0.92)));
        assert_eq!(snapshot.rate(&Currency::usd()), Some(dec!(1)));
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_not_refetched() {
        let source = primary();
        let cache = RateCache::new(
            RateCacheConfig::default(),
            source.clone(),
            None,
            defaults(),
        );

        cache.snapshot().await;
        cache.snapshot().await;
        cache.snapshot().await;

        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_to_secondary() {
        let bad_primary = primary();
        bad_primary.set_failing(true);

        let cache = RateCache::new(
            RateCacheConfig::default(),
            bad_primary,
            Some(secondary()),
            defaults(),
        );

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.source, "secondary");
    }

    #[tokio::test]
    async fn test_fallback_to_stale_snapshot() {
        let source = primary();
        let cache = RateCache::new(
            RateCacheConfig {
                base: Currency::usd(),
                ttl: Duration::zero(),
            },
            source.clone(),
            None,
            defaults(),
        );

        // First refresh succeeds and installs a snapshot.
        let first = cache.snapshot().await;
        assert_eq!(first.source, "primary");

        // TTL of zero makes it immediately stale; with the source now down
        // the stale snapshot is served.
        source.set_failing(true);
        let second = cache.snapshot().await;
        assert_eq!(second.source, "primary");
        assert_eq!(second.fetched_at, first.fetched_at);
    }

    #[tokio::test]
    async fn test_fallback_to_defaults() {
        let bad = primary();
        bad.set_failing(true);

        let cache = RateCache::new(RateCacheConfig::default(), bad, None, defaults());

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.source, "DEFAULTS");
        assert_eq!(snapshot.rate(&Currency::eur()), Some(dec!(0.90)));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_ttl() {
        let source = primary();
        let cache = RateCache::new(RateCacheConfig::default(), source.clone(), None, defaults());

        cache.snapshot().await;
        source.set_rate(Currency::eur(), dec!(0.95));
        let refreshed = cache.force_refresh().await;

        assert_eq!(refreshed.rate(&Currency::eur()), Some(dec!(0.95)));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_builtin_defaults_source_roundtrip() {
        let source = Arc::new(StaticRateSource::builtin_defaults());
        let cache = RateCache::new(RateCacheConfig::default(), source, None, defaults());

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.source, "BUILTIN_DEFAULTS");
    }
}
