//! Per-wallet journal of balance changes.

use chrono::{DateTime, Utc};
use custodia_common::{Currency, TransactionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::balance::Bucket;

/// What a journal entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Value entered the wallet from outside.
    Credit { bucket: Bucket },
    /// Value left the wallet.
    Debit { bucket: Bucket },
    /// Value moved between buckets; wallet total unchanged.
    Move { from: Bucket, to: Bucket },
}

/// A single journaled balance change. Entries are append-only and feed both
/// the audit trail and the rolling spending-limit windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// Transaction that caused this change, when driven by one.
    pub transaction_id: Option<TransactionId>,
    /// Currency affected.
    pub currency: Currency,
    /// Amount moved (always positive).
    pub amount: Decimal,
    /// Kind of change.
    pub kind: EntryKind,
    /// Whether this entry undoes an earlier held debit.
    pub reversal: bool,
    /// Available-bucket balance after this entry.
    pub available_after: Decimal,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Record a credit.
    pub fn credit(
        currency: Currency,
        amount: Decimal,
        bucket: Bucket,
        transaction_id: Option<TransactionId>,
        reversal: bool,
        available_after: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            currency,
            amount,
            kind: EntryKind::Credit { bucket },
            reversal,
            available_after,
            created_at: Utc::now(),
        }
    }

    /// Record a debit.
    pub fn debit(
        currency: Currency,
        amount: Decimal,
        bucket: Bucket,
        transaction_id: Option<TransactionId>,
        available_after: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            currency,
            amount,
            kind: EntryKind::Debit { bucket },
            reversal: false,
            available_after,
            created_at: Utc::now(),
        }
    }

    /// Record a bucket move.
    pub fn bucket_move(
        currency: Currency,
        amount: Decimal,
        from: Bucket,
        to: Bucket,
        transaction_id: Option<TransactionId>,
        available_after: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            currency,
            amount,
            kind: EntryKind::Move { from, to },
            reversal: false,
            available_after,
            created_at: Utc::now(),
        }
    }

    /// Signed effect on the wallet's total value for this currency.
    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            EntryKind::Credit { .. } => self.amount,
            EntryKind::Debit { .. } => -self.amount,
            EntryKind::Move { .. } => Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signed_amounts() {
        let credit = LedgerEntry::credit(
            Currency::usd(),
            dec!(50),
            Bucket::Available,
            None,
            false,
            dec!(50),
        );
        let debit = LedgerEntry::debit(Currency::usd(), dec!(20), Bucket::Available, None, dec!(30));
        let mv = LedgerEntry::bucket_move(
            Currency::usd(),
            dec!(10),
            Bucket::Available,
            Bucket::Frozen,
            None,
            dec!(20),
        );

        assert_eq!(credit.signed_amount(), dec!(50));
        assert_eq!(debit.signed_amount(), dec!(-20));
        assert_eq!(mv.signed_amount(), dec!(0));
    }
}
