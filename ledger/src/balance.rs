//! Bucketed balance state per currency.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three balance buckets a wallet holds per currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Spendable balance.
    Available,
    /// Held for an in-flight transaction.
    Pending,
    /// Administratively frozen.
    Frozen,
}

impl Bucket {
    /// Stable name used in journal entries and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Available => "available",
            Bucket::Pending => "pending",
            Bucket::Frozen => "frozen",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Balance of a single currency within a wallet.
///
/// Invariant: every bucket is non-negative. Total value only changes through
/// boundary-crossing credits and debits; bucket moves conserve the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketBalance {
    /// Spendable balance.
    pub available: Decimal,
    /// Held for in-flight transactions.
    pub pending: Decimal,
    /// Administratively frozen.
    pub frozen: Decimal,
}

impl BucketBalance {
    /// A zero balance.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Read one bucket.
    pub fn get(&self, bucket: Bucket) -> Decimal {
        match bucket {
            Bucket::Available => self.available,
            Bucket::Pending => self.pending,
            Bucket::Frozen => self.frozen,
        }
    }

    pub(crate) fn get_mut(&mut self, bucket: Bucket) -> &mut Decimal {
        match bucket {
            Bucket::Available => &mut self.available,
            Bucket::Pending => &mut self.pending,
            Bucket::Frozen => &mut self.frozen,
        }
    }

    /// Total value across all buckets.
    pub fn total(&self) -> Decimal {
        self.available + self.pending + self.frozen
    }

    /// Check whether all buckets are zero.
    pub fn is_zero(&self) -> bool {
        self.available.is_zero() && self.pending.is_zero() && self.frozen.is_zero()
    }
}
