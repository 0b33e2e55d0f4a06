//! Transaction engine configuration.

use chrono::Duration;
use custodia_common::time;

/// Main engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Require a verified one-time code on cash-outs.
    pub require_code_for_cash_out: bool,
    /// How long a `Processing` cash-out may wait for provider confirmation
    /// before the sweep reverses it.
    pub cash_out_timeout: Duration,
    /// How often the reconciliation sweep runs.
    pub sweep_interval: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            require_code_for_cash_out: false,
            cash_out_timeout: time::constants::cash_out_confirmation_timeout(),
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("CUSTODIA_REQUIRE_CASH_OUT_CODE") {
            config.require_code_for_cash_out = value == "1" || value.eq_ignore_ascii_case("true");
        }

        if let Ok(value) = std::env::var("CUSTODIA_CASH_OUT_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse() {
                config.cash_out_timeout = Duration::seconds(secs);
            }
        }

        if let Ok(value) = std::env::var("CUSTODIA_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = value.parse() {
                config.sweep_interval = std::time::Duration::from_secs(secs);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cash_out_timeout <= Duration::zero() {
            return Err("Cash-out timeout must be positive".to_string());
        }

        if self.sweep_interval.is_zero() {
            return Err("Sweep interval cannot be zero".to_string());
        }

        Ok(())
    }
}
