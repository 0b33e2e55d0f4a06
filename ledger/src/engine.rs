//! The wallet ledger engine.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use custodia_common::{
    time, AccountId, Currency, CurrencyRegistry, CustodiaError, Money, Result, TransactionId,
    WalletId,
};

use crate::balance::{Bucket, BucketBalance};
use crate::journal::EntryKind;
use crate::limits::{LimitDecision, SpendingLimits};
use crate::wallet::{Wallet, WalletKind, WalletStatus};

/// The wallet ledger owns all wallet state and serializes mutations
/// per wallet: each wallet sits behind its own mutex, and cross-wallet
/// transfers acquire both mutexes in ascending wallet-id order.
pub struct WalletLedger {
    registry: Arc<CurrencyRegistry>,
    wallets: DashMap<WalletId, Arc<Mutex<Wallet>>>,
    by_owner: DashMap<(AccountId, WalletKind), WalletId>,
}

impl WalletLedger {
    /// Create a new ledger.
    pub fn new(registry: Arc<CurrencyRegistry>) -> Self {
        Self {
            registry,
            wallets: DashMap::new(),
            by_owner: DashMap::new(),
        }
    }

    /// Create a wallet for an account. At most one wallet per kind per
    /// account; wallets are never deleted afterwards.
    #[instrument(skip(self, limits))]
    pub fn create_wallet(
        &self,
        account_id: AccountId,
        kind: WalletKind,
        limits: SpendingLimits,
    ) -> Result<WalletId> {
        if !account_id.is_valid() {
            return Err(CustodiaError::Validation {
                message: format!("Invalid account id: {account_id}"),
                field: Some("account_id".to_string()),
            });
        }

        let owner_key = (account_id.clone(), kind);
        match self.by_owner.entry(owner_key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CustodiaError::WalletExists {
                account_id: account_id.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let wallet = Wallet::new(account_id, kind, limits);
                let wallet_id = wallet.id;
                slot.insert(wallet_id);
                self.wallets.insert(wallet_id, Arc::new(Mutex::new(wallet)));
                info!(wallet_id = %wallet_id, ?kind, "Wallet created");
                Ok(wallet_id)
            }
        }
    }

    /// Find a wallet by owner and kind.
    pub fn find_wallet(&self, account_id: &AccountId, kind: WalletKind) -> Option<WalletId> {
        self.by_owner
            .get(&(account_id.clone(), kind))
            .map(|entry| *entry)
    }

    /// Spendable balance for one currency.
    pub fn get_available(&self, wallet_id: WalletId, currency: &Currency) -> Result<Decimal> {
        self.ensure_supported(currency)?;
        let handle = self.handle(wallet_id)?;
        let wallet = handle.lock();
        Ok(wallet.balance(currency).available)
    }

    /// All currency balances of a wallet.
    pub fn balances(&self, wallet_id: WalletId) -> Result<HashMap<Currency, BucketBalance>> {
        let handle = self.handle(wallet_id)?;
        let wallet = handle.lock();
        Ok(wallet.balances().clone())
    }

    /// A point-in-time copy of the wallet record.
    pub fn snapshot(&self, wallet_id: WalletId) -> Result<Wallet> {
        let handle = self.handle(wallet_id)?;
        let wallet = handle.lock();
        Ok(wallet.clone())
    }

    /// Check that a debit of `amount` from the available bucket would
    /// succeed right now.
    pub fn can_debit(
        &self,
        wallet_id: WalletId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<bool> {
        self.ensure_supported(currency)?;
        let handle = self.handle(wallet_id)?;
        let wallet = handle.lock();
        Ok(wallet.can_transact() && wallet.balance(currency).available >= amount)
    }

    /// Move `amount` between two buckets of the same wallet. This is the
    /// only intra-wallet primitive; freezes, holds, confirmations and
    /// releases are all one `move_between` call.
    #[instrument(skip(self))]
    pub fn move_between(
        &self,
        wallet_id: WalletId,
        currency: &Currency,
        amount: Decimal,
        from: Bucket,
        to: Bucket,
        reference: Option<TransactionId>,
    ) -> Result<()> {
        self.ensure_positive(amount)?;
        self.ensure_supported(currency)?;
        if from == to {
            return Err(CustodiaError::Validation {
                message: "Source and destination bucket are the same".to_string(),
                field: Some("to_bucket".to_string()),
            });
        }

        let handle = self.handle(wallet_id)?;
        let mut wallet = handle.lock();
        wallet.apply_move(currency, amount, from, to, reference)?;

        debug!(
            wallet_id = %wallet_id,
            currency = %currency,
            amount = %amount,
            from = %from,
            to = %to,
            "Bucket move applied"
        );
        Ok(())
    }

    /// Credit a wallet from outside its boundary (the paired debit lives on
    /// another wallet or with an external counterparty).
    #[instrument(skip(self))]
    pub fn credit(
        &self,
        wallet_id: WalletId,
        currency: &Currency,
        amount: Decimal,
        bucket: Bucket,
        reference: Option<TransactionId>,
    ) -> Result<()> {
        self.ensure_positive(amount)?;
        self.ensure_supported(currency)?;

        let handle = self.handle(wallet_id)?;
        let mut wallet = handle.lock();
        wallet.apply_credit(currency, amount, bucket, reference, false);

        info!(
            wallet_id = %wallet_id,
            currency = %currency,
            amount = %amount,
            bucket = %bucket,
            "Wallet credited"
        );
        Ok(())
    }

    /// Credit that undoes an earlier held debit. Journaled as a reversal so
    /// the rolling limit windows give the headroom back.
    #[instrument(skip(self))]
    pub fn credit_reversal(
        &self,
        wallet_id: WalletId,
        currency: &Currency,
        amount: Decimal,
        bucket: Bucket,
        reference: Option<TransactionId>,
    ) -> Result<()> {
        self.ensure_positive(amount)?;
        self.ensure_supported(currency)?;

        let handle = self.handle(wallet_id)?;
        let mut wallet = handle.lock();
        wallet.apply_credit(currency, amount, bucket, reference, true);

        info!(
            wallet_id = %wallet_id,
            currency = %currency,
            amount = %amount,
            "Held debit reversed"
        );
        Ok(())
    }

    /// Debit a wallet across its boundary. Requires Active status and
    /// sufficient funds in the bucket; a failed debit mutates nothing.
    #[instrument(skip(self))]
    pub fn debit(
        &self,
        wallet_id: WalletId,
        currency: &Currency,
        amount: Decimal,
        bucket: Bucket,
        reference: Option<TransactionId>,
    ) -> Result<()> {
        self.ensure_positive(amount)?;
        self.ensure_supported(currency)?;

        let handle = self.handle(wallet_id)?;
        let mut wallet = handle.lock();
        wallet.apply_debit(currency, amount, bucket, reference)?;

        info!(
            wallet_id = %wallet_id,
            currency = %currency,
            amount = %amount,
            bucket = %bucket,
            "Wallet debited"
        );
        Ok(())
    }

    /// Debit one wallet and credit another as a single atomic unit.
    ///
    /// Both wallet locks are taken in ascending wallet-id order; either both
    /// sides apply or neither does.
    #[instrument(skip(self))]
    pub fn transfer_between(
        &self,
        from_wallet: WalletId,
        to_wallet: WalletId,
        debit_amount: &Money,
        credit_amount: &Money,
        reference: Option<TransactionId>,
    ) -> Result<()> {
        self.ensure_positive(debit_amount.value)?;
        self.ensure_positive(credit_amount.value)?;
        self.ensure_supported(&debit_amount.currency)?;
        self.ensure_supported(&credit_amount.currency)?;
        if from_wallet == to_wallet {
            return Err(CustodiaError::Validation {
                message: "Sender and receiver wallet are the same".to_string(),
                field: Some("to_wallet".to_string()),
            });
        }

        let from_handle = self.handle(from_wallet)?;
        let to_handle = self.handle(to_wallet)?;

        // Ascending-id acquisition keeps concurrent transfers deadlock-free.
        let (mut sender, mut receiver) = if from_wallet < to_wallet {
            let sender = from_handle.lock();
            let receiver = to_handle.lock();
            (sender, receiver)
        } else {
            let receiver = to_handle.lock();
            let sender = from_handle.lock();
            (sender, receiver)
        };

        sender.apply_debit(
            &debit_amount.currency,
            debit_amount.value,
            Bucket::Available,
            reference,
        )?;
        receiver.apply_credit(
            &credit_amount.currency,
            credit_amount.value,
            Bucket::Available,
            reference,
            false,
        );

        info!(
            from_wallet = %from_wallet,
            to_wallet = %to_wallet,
            debit = %debit_amount,
            credit = %credit_amount,
            "Cross-wallet transfer applied"
        );
        Ok(())
    }

    /// Evaluate the per-transaction bounds and the rolling daily/monthly
    /// debit totals against the wallet's configured limits.
    ///
    /// Totals are read under the wallet lock, so the window snapshot is
    /// consistent; held (not yet settled) debits count against the caps.
    pub fn check_limits(
        &self,
        wallet_id: WalletId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<LimitDecision> {
        self.ensure_supported(currency)?;
        let handle = self.handle(wallet_id)?;
        let wallet = handle.lock();

        if let Some(min) = wallet.limits.min_per_transaction {
            if amount < min {
                return Ok(LimitDecision::deny(format!(
                    "Amount {amount} below per-transaction minimum {min}"
                )));
            }
        }
        if let Some(max) = wallet.limits.max_per_transaction {
            if amount > max {
                return Ok(LimitDecision::deny(format!(
                    "Amount {amount} above per-transaction maximum {max}"
                )));
            }
        }

        if let Some(cap) = wallet.limits.daily.get(currency) {
            let used = Self::debited_since(&wallet, currency, time::start_of_utc_day(time::now()));
            if used + amount > *cap {
                return Ok(LimitDecision::deny(format!(
                    "Daily cap {cap} would be exceeded: {used} used"
                )));
            }
        }
        if let Some(cap) = wallet.limits.monthly.get(currency) {
            let used =
                Self::debited_since(&wallet, currency, time::start_of_utc_month(time::now()));
            if used + amount > *cap {
                return Ok(LimitDecision::deny(format!(
                    "Monthly cap {cap} would be exceeded: {used} used"
                )));
            }
        }

        Ok(LimitDecision::allow())
    }

    /// Change a wallet's status (administrative freeze, suspend, restore).
    pub fn set_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<()> {
        let handle = self.handle(wallet_id)?;
        let mut wallet = handle.lock();
        wallet.status = status;
        wallet.updated_at = time::now();
        info!(wallet_id = %wallet_id, ?status, "Wallet status changed");
        Ok(())
    }

    /// Deactivate a wallet when its owning account closes. Only legal once
    /// every bucket of every currency is zero; the record is kept.
    pub fn deactivate(&self, wallet_id: WalletId) -> Result<()> {
        let handle = self.handle(wallet_id)?;
        let mut wallet = handle.lock();
        if !wallet.is_empty() {
            return Err(CustodiaError::Validation {
                message: "Wallet still holds a balance".to_string(),
                field: None,
            });
        }
        wallet.status = WalletStatus::Inactive;
        wallet.updated_at = time::now();
        info!(wallet_id = %wallet_id, "Wallet deactivated");
        Ok(())
    }

    fn handle(&self, wallet_id: WalletId) -> Result<Arc<Mutex<Wallet>>> {
        self.wallets
            .get(&wallet_id)
            .map(|entry| entry.clone())
            .ok_or(CustodiaError::WalletNotFound(wallet_id))
    }

    fn ensure_supported(&self, currency: &Currency) -> Result<()> {
        if self.registry.is_supported(currency) {
            Ok(())
        } else {
            Err(CustodiaError::UnsupportedCurrency(
                currency.code().to_string(),
            ))
        }
    }

    fn ensure_positive(&self, amount: Decimal) -> Result<()> {
        if amount > Decimal::ZERO {
            Ok(())
        } else {
            Err(CustodiaError::Validation {
                message: "Amount must be positive".to_string(),
                field: Some("amount".to_string()),
            })
        }
    }

    /// Net debits (debits minus reversal credits) for a currency since the
    /// window start. Never negative.
    fn debited_since(wallet: &Wallet, currency: &Currency, since: time::Timestamp) -> Decimal {
        let mut total = Decimal::ZERO;
        for entry in wallet.journal() {
            if entry.created_at < since || &entry.currency != currency {
                continue;
            }
            match entry.kind {
                EntryKind::Debit { .. } => total += entry.amount,
                EntryKind::Credit { .. } if entry.reversal => total -= entry.amount,
                _ => {}
            }
        }
        total.max(Decimal::ZERO)
    }
}
