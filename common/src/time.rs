//! Time utilities and constants for the Custodia wallet core.

use chrono::{DateTime, Datelike, Duration, Utc};

/// Core timing constants.
pub mod constants {
    use super::Duration;

    /// Exchange-rate snapshot freshness window (5 minutes).
    pub fn rate_snapshot_ttl() -> Duration {
        Duration::minutes(5)
    }

    /// One-time code lifetime (5 minutes).
    pub fn otc_ttl() -> Duration {
        Duration::minutes(5)
    }

    /// One-time code reissue cooldown (60 seconds).
    pub fn otc_cooldown() -> Duration {
        Duration::seconds(60)
    }

    /// Provider confirmation timeout for in-flight cash-outs (15 minutes).
    pub fn cash_out_confirmation_timeout() -> Duration {
        Duration::minutes(15)
    }
}

/// A timestamp with timezone (always UTC for Custodia).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check if a timestamp has expired (is in the past).
pub fn is_expired(expiry: Timestamp) -> bool {
    now() > expiry
}

/// Calculate expiry time from now.
pub fn expires_in(duration: Duration) -> Timestamp {
    now() + duration
}

/// Start of the UTC day containing the given timestamp.
pub fn start_of_utc_day(ts: Timestamp) -> Timestamp {
    ts.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(ts)
}

/// Start of the UTC month containing the given timestamp.
pub fn start_of_utc_month(ts: Timestamp) -> Timestamp {
    ts.date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(ts)
}
