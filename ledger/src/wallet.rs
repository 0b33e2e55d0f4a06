//! Wallet definitions and in-place balance mutation.

use chrono::{DateTime, Utc};
use custodia_common::{AccountId, Currency, CustodiaError, Result, TransactionId, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::balance::{Bucket, BucketBalance};
use crate::journal::LedgerEntry;
use crate::limits::SpendingLimits;

/// Kind of wallet. One wallet per kind per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    Personal,
    Agent,
    Merchant,
    /// Platform-owned wallets such as the fee-collection wallet.
    System,
}

/// Wallet status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    /// Wallet can send and receive.
    Active,
    /// Deactivated alongside a closed account; no movements.
    Inactive,
    /// Administratively frozen; no debits.
    Frozen,
    /// Suspended pending investigation; no debits.
    Suspended,
}

/// A custodial wallet: bucketed balances per currency, spending limits, and
/// an append-only journal of every change.
///
/// Buckets are only mutated through the ledger engine, which holds this
/// wallet's lock for the duration of each operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier.
    pub id: WalletId,
    /// Owning account.
    pub account_id: AccountId,
    /// Wallet kind.
    pub kind: WalletKind,
    /// Current status.
    pub status: WalletStatus,
    /// Configured spending limits.
    pub limits: SpendingLimits,
    pub(crate) balances: HashMap<Currency, BucketBalance>,
    pub(crate) journal: Vec<LedgerEntry>,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
    /// When the wallet was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a new active wallet with zero balances.
    pub fn new(account_id: AccountId, kind: WalletKind, limits: SpendingLimits) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            account_id,
            kind,
            status: WalletStatus::Active,
            limits,
            balances: HashMap::new(),
            journal: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the wallet can be debited.
    pub fn can_transact(&self) -> bool {
        self.status == WalletStatus::Active
    }

    /// Balance for one currency (zero if never touched).
    pub fn balance(&self, currency: &Currency) -> BucketBalance {
        self.balances.get(currency).copied().unwrap_or_default()
    }

    /// All currency balances.
    pub fn balances(&self) -> &HashMap<Currency, BucketBalance> {
        &self.balances
    }

    /// The journal of every balance change on this wallet.
    pub fn journal(&self) -> &[LedgerEntry] {
        &self.journal
    }

    /// Check whether every bucket of every currency is zero.
    pub fn is_empty(&self) -> bool {
        self.balances.values().all(|b| b.is_zero())
    }

    pub(crate) fn apply_move(
        &mut self,
        currency: &Currency,
        amount: Decimal,
        from: Bucket,
        to: Bucket,
        reference: Option<TransactionId>,
    ) -> Result<()> {
        let balance = self.balances.entry(currency.clone()).or_default();
        let held = balance.get(from);
        if held < amount {
            return Err(CustodiaError::InsufficientBalance {
                wallet_id: self.id,
                currency: currency.code().to_string(),
                bucket: from.as_str(),
                requested: amount,
                available: held,
            });
        }

        *balance.get_mut(from) -= amount;
        *balance.get_mut(to) += amount;
        let available_after = balance.available;

        self.journal.push(LedgerEntry::bucket_move(
            currency.clone(),
            amount,
            from,
            to,
            reference,
            available_after,
        ));
        self.updated_at = Utc::now();
        Ok(())
    }

    pub(crate) fn apply_credit(
        &mut self,
        currency: &Currency,
        amount: Decimal,
        bucket: Bucket,
        reference: Option<TransactionId>,
        reversal: bool,
    ) {
        let balance = self.balances.entry(currency.clone()).or_default();
        *balance.get_mut(bucket) += amount;
        let available_after = balance.available;

        self.journal.push(LedgerEntry::credit(
            currency.clone(),
            amount,
            bucket,
            reference,
            reversal,
            available_after,
        ));
        self.updated_at = Utc::now();
    }

    pub(crate) fn apply_debit(
        &mut self,
        currency: &Currency,
        amount: Decimal,
        bucket: Bucket,
        reference: Option<TransactionId>,
    ) -> Result<()> {
        if !self.can_transact() {
            return Err(CustodiaError::WalletNotActive(self.id));
        }

        let balance = self.balances.entry(currency.clone()).or_default();
        let held = balance.get(bucket);
        if held < amount {
            return Err(CustodiaError::InsufficientBalance {
                wallet_id: self.id,
                currency: currency.code().to_string(),
                bucket: bucket.as_str(),
                requested: amount,
                available: held,
            });
        }

        *balance.get_mut(bucket) -= amount;
        let available_after = balance.available;

        self.journal.push(LedgerEntry::debit(
            currency.clone(),
            amount,
            bucket,
            reference,
            available_after,
        ));
        self.updated_at = Utc::now();
        Ok(())
    }
}
