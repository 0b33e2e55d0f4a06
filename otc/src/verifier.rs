//! One-time-code issuance and verification.

use chrono::{DateTime, Duration, Utc};
use custodia_common::{time, CustodiaError};
use dashmap::DashMap;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the OTC verifier.
#[derive(Debug, Error)]
pub enum OtcError {
    /// A code for this key was issued too recently.
    #[error("Cooldown active, retry in {retry_after_secs}s")]
    CooldownActive { retry_after_secs: i64 },

    /// No live code for this key.
    #[error("No code issued")]
    NotFound,

    /// The code expired before verification.
    #[error("Code expired")]
    Expired,

    /// Wrong code.
    #[error("Code mismatch, {remaining_attempts} attempts remaining")]
    Mismatch { remaining_attempts: u32 },
}

/// Result type for OTC operations.
pub type OtcResult<T> = Result<T, OtcError>;

impl From<OtcError> for CustodiaError {
    fn from(err: OtcError) -> Self {
        match err {
            OtcError::CooldownActive { retry_after_secs } => {
                CustodiaError::OtcCooldown { retry_after_secs }
            }
            OtcError::NotFound => CustodiaError::OtcNotFound,
            OtcError::Expired => CustodiaError::OtcExpired,
            OtcError::Mismatch { remaining_attempts } => {
                CustodiaError::OtcMismatch { remaining_attempts }
            }
        }
    }
}

/// Configuration for the verifier.
#[derive(Debug, Clone)]
pub struct OtcConfig {
    /// Number of digits in a code.
    pub code_length: usize,
    /// Code lifetime.
    pub ttl: Duration,
    /// Minimum gap between issues for the same key.
    pub cooldown: Duration,
    /// Verification attempts before the record is destroyed.
    pub max_attempts: u32,
    /// How often the GC loop runs.
    pub gc_interval: std::time::Duration,
}

impl Default for OtcConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            ttl: time::constants::otc_ttl(),
            cooldown: time::constants::otc_cooldown(),
            max_attempts: 3,
            gc_interval: std::time::Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
struct OtcRecord {
    code: String,
    expires_at: DateTime<Utc>,
    attempts_used: u32,
}

impl OtcRecord {
    fn is_expired(&self) -> bool {
        time::is_expired(self.expires_at)
    }
}

type OtcKey = (String, String);

/// Keyed one-time-code store.
///
/// State machine per `(identifier, purpose)` key:
/// absent -> issued -> consumed | expired | attempts exhausted.
/// Records are destroyed on success, on expiry, and on exhausting the
/// attempt limit; the issue cooldown survives the record.
pub struct OtcVerifier {
    config: OtcConfig,
    records: DashMap<OtcKey, OtcRecord>,
    last_issued: DashMap<OtcKey, DateTime<Utc>>,
}

impl OtcVerifier {
    /// Create a verifier with default configuration.
    pub fn new() -> Self {
        Self::with_config(OtcConfig::default())
    }

    /// Create a verifier with custom configuration.
    pub fn with_config(config: OtcConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            last_issued: DashMap::new(),
        }
    }

    /// Issue a code for a key. The code is returned for out-of-band
    /// delivery; delivery itself is an external collaborator.
    pub fn issue(&self, identifier: &str, purpose: &str) -> OtcResult<String> {
        let key = (identifier.to_string(), purpose.to_string());

        if let Some(last) = self.last_issued.get(&key) {
            let elapsed = Utc::now().signed_duration_since(*last);
            if elapsed < self.config.cooldown {
                let retry_after_secs = (self.config.cooldown - elapsed).num_seconds().max(1);
                return Err(OtcError::CooldownActive { retry_after_secs });
            }
        }

        let code = self.generate_code();
        let now = Utc::now();
        let record = OtcRecord {
            code: code.clone(),
            expires_at: now + self.config.ttl,
            attempts_used: 0,
        };

        // A reissue replaces any prior live record wholesale.
        self.records.insert(key.clone(), record);
        self.last_issued.insert(key, now);

        info!(identifier, purpose, "One-time code issued");
        Ok(code)
    }

    /// Verify a candidate code.
    ///
    /// A match destroys the record and succeeds; a mismatch burns an
    /// attempt; exhausting the attempt limit destroys the record so later
    /// calls see `NotFound` until a code is reissued.
    pub fn verify(&self, identifier: &str, purpose: &str, candidate: &str) -> OtcResult<()> {
        let key = (identifier.to_string(), purpose.to_string());

        let Some(mut entry) = self.records.get_mut(&key) else {
            return Err(OtcError::NotFound);
        };

        if entry.is_expired() {
            drop(entry);
            self.records.remove(&key);
            debug!(identifier, purpose, "Expired code purged on verify");
            return Err(OtcError::Expired);
        }

        entry.attempts_used += 1;

        if entry.code == candidate {
            drop(entry);
            self.records.remove(&key);
            info!(identifier, purpose, "One-time code consumed");
            return Ok(());
        }

        let exhausted = entry.attempts_used >= self.config.max_attempts;
        let remaining_attempts = self.config.max_attempts - entry.attempts_used;
        drop(entry);

        if exhausted {
            self.records.remove(&key);
            warn!(identifier, purpose, "One-time code attempts exhausted");
        }

        Err(OtcError::Mismatch { remaining_attempts })
    }

    /// Whether a live (unexpired) code exists for a key.
    pub fn has_live_code(&self, identifier: &str, purpose: &str) -> bool {
        let key = (identifier.to_string(), purpose.to_string());
        self.records
            .get(&key)
            .map(|record| !record.is_expired())
            .unwrap_or(false)
    }

    /// Drop expired records and stale cooldown markers.
    pub fn evict_expired(&self) {
        self.records.retain(|_, record| !record.is_expired());

        let cooldown = self.config.cooldown;
        self.last_issued
            .retain(|_, issued| Utc::now().signed_duration_since(*issued) < cooldown);
    }

    /// Number of live records.
    pub fn live_records(&self) -> usize {
        self.records.iter().filter(|r| !r.is_expired()).count()
    }

    /// Run the garbage-collection loop.
    pub async fn run_gc_loop(&self) {
        loop {
            tokio::time::sleep(self.config.gc_interval).await;
            self.evict_expired();
        }
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.config.code_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

impl Default for OtcVerifier {
    fn default() -> Self {
        Self::new()
    }
}
