//! Core transaction engine implementation.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, instrument, warn};

use custodia_common::{
    AccountId, Currency, CurrencyRegistry, CustodiaError, Fee, Money, Party, Result, Transaction,
    TransactionCategory, TransactionId, TransactionKind, TransactionStatus, WalletId,
};
use custodia_fx::{CurrencyConverter, FeeSchedule, FeeTier};
use custodia_ledger::{Bucket, BucketBalance, SpendingLimits, WalletKind, WalletLedger};
use custodia_otc::OtcVerifier;

use crate::config::EngineConfig;
use crate::notify::{Notification, Notifier};
use crate::provider::{ProviderCallback, SettlementProvider};

/// Account that owns the platform's fee-collection wallet.
const FEE_COLLECTION_ACCOUNT: &str = "system_fee_collection";

/// Purpose key under which cash-out one-time codes are issued.
pub const CASH_OUT_OTC_PURPOSE: &str = "cash_out";

/// Minimal view of a transaction returned by mutating operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionView {
    /// Transaction identifier.
    pub transaction_id: TransactionId,
    /// Status after the operation.
    pub status: TransactionStatus,
}

impl TransactionView {
    fn of(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            status: tx.status,
        }
    }
}

/// Request to credit a wallet from an external source.
#[derive(Debug, Clone)]
pub struct CashInRequest {
    /// Paying side, when known (agent, bank); defaults to external.
    pub sender: Option<Party>,
    /// Receiving side; must carry a wallet.
    pub receiver: Party,
    /// Principal amount.
    pub amount: Money,
    /// Cash-in category; selects automated versus manual settlement.
    pub category: TransactionCategory,
    /// Idempotency key toward the provider.
    pub external_reference: Option<String>,
    /// Counterparty reference forwarded to the provider (MSISDN, IBAN).
    pub counterparty_ref: Option<String>,
    /// Caller note.
    pub note: Option<String>,
}

/// Request to pay a wallet balance out through an external rail.
#[derive(Debug, Clone)]
pub struct CashOutRequest {
    /// Paying side; must carry a wallet.
    pub sender: Party,
    /// Principal amount.
    pub amount: Money,
    /// Cash-out (or bill-payment) category.
    pub category: TransactionCategory,
    /// Idempotency key toward the provider.
    pub external_reference: Option<String>,
    /// Where the payout goes on the provider side.
    pub counterparty_ref: String,
    /// One-time code, when the engine is configured to require one.
    pub code: Option<String>,
    /// Caller note.
    pub note: Option<String>,
}

/// Request to move value between two wallets, possibly across currencies.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Paying side; must carry a wallet.
    pub sender: Party,
    /// Receiving side; must carry a wallet.
    pub receiver: Party,
    /// Principal amount in the sender's currency.
    pub amount: Money,
    /// Currency the receiver is credited in; defaults to the send currency.
    pub receive_currency: Option<Currency>,
    /// Transfer category.
    pub category: TransactionCategory,
    /// Idempotency key, when the caller supplies one.
    pub external_reference: Option<String>,
    /// Caller note.
    pub note: Option<String>,
}

/// A typed creation request, dispatched to the matching flow.
#[derive(Debug, Clone)]
pub enum CreateTransaction {
    CashIn(CashInRequest),
    CashOut(CashOutRequest),
    Transfer(TransferRequest),
}

/// The transaction engine. Owns the transaction store and drives the wallet
/// ledger, fee schedule, converter, OTC verifier, and settlement provider.
pub struct TransactionEngine {
    config: EngineConfig,
    registry: Arc<CurrencyRegistry>,
    ledger: Arc<WalletLedger>,
    fees: Arc<FeeSchedule>,
    converter: Arc<CurrencyConverter>,
    otc: Arc<OtcVerifier>,
    provider: Arc<dyn SettlementProvider>,
    notifier: Arc<dyn Notifier>,
    fee_wallet: WalletId,
    pub(crate) transactions: DashMap<TransactionId, Transaction>,
    by_reference: DashMap<String, TransactionId>,
}

impl TransactionEngine {
    /// Create a new engine. Locates or creates the platform's
    /// fee-collection wallet on the ledger.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        registry: Arc<CurrencyRegistry>,
        ledger: Arc<WalletLedger>,
        fees: Arc<FeeSchedule>,
        converter: Arc<CurrencyConverter>,
        otc: Arc<OtcVerifier>,
        provider: Arc<dyn SettlementProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let fee_account = AccountId::new(FEE_COLLECTION_ACCOUNT);
        let fee_wallet = match ledger.find_wallet(&fee_account, WalletKind::System) {
            Some(id) => id,
            None => ledger.create_wallet(fee_account, WalletKind::System, SpendingLimits::unlimited())?,
        };

        Ok(Self {
            config,
            registry,
            ledger,
            fees,
            converter,
            otc,
            provider,
            notifier,
            fee_wallet,
            transactions: DashMap::new(),
            by_reference: DashMap::new(),
        })
    }

    /// The platform fee-collection wallet.
    pub fn fee_wallet(&self) -> WalletId {
        self.fee_wallet
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dispatch a typed creation request.
    pub async fn create_transaction(&self, request: CreateTransaction) -> Result<TransactionView> {
        match request {
            CreateTransaction::CashIn(request) => self.cash_in(request).await,
            CreateTransaction::CashOut(request) => self.cash_out(request).await,
            CreateTransaction::Transfer(request) => self.transfer(request).await,
        }
    }

    /// Get a transaction by ID.
    pub fn get_transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.transactions
            .get(&id)
            .map(|tx| tx.clone())
            .ok_or(CustodiaError::TransactionNotFound(id))
    }

    /// All transactions currently in a given status.
    pub fn find_by_status(&self, status: TransactionStatus) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|tx| tx.status == status)
            .map(|tx| tx.clone())
            .collect()
    }

    /// Balances of a wallet, per currency.
    pub fn get_balance(&self, wallet_id: WalletId) -> Result<HashMap<Currency, BucketBalance>> {
        self.ledger.balances(wallet_id)
    }

    /// Issue a one-time code gating a cash-out for this account.
    pub fn issue_cash_out_code(&self, account_id: &AccountId) -> Result<String> {
        Ok(self
            .otc
            .issue(account_id.as_str(), CASH_OUT_OTC_PURPOSE)?)
    }

    /// Credit a wallet from an external source.
    ///
    /// Automated categories go `Pending -> Processing` and settle through
    /// the provider callback; manual categories park in
    /// `PendingVerification` with no balance effect until reviewed.
    #[instrument(skip(self, request), fields(category = ?request.category))]
    pub async fn cash_in(&self, request: CashInRequest) -> Result<TransactionView> {
        if !request.category.is_cash_in() {
            return Err(CustodiaError::Validation {
                message: format!("{:?} is not a cash-in category", request.category),
                field: Some("category".to_string()),
            });
        }
        self.registry.validate_amount(&request.amount)?;

        let receiver_wallet = Self::wallet_of(&request.receiver, "receiver")?;
        self.ledger.snapshot(receiver_wallet)?;

        // Manual submissions carry no fee; the administrator credits the
        // full amount on approval.
        let fee = if request.category.is_automated() {
            let quote = self
                .fees
                .compute(&request.amount, Self::fee_tier(request.category))?;
            if quote.amount.value >= request.amount.value {
                return Err(CustodiaError::Validation {
                    message: "Fee would exceed the cash-in amount".to_string(),
                    field: Some("amount".to_string()),
                });
            }
            Some(Fee::new(quote.amount, quote.rate))
        } else {
            None
        };

        let automated = request.category.is_automated();
        let initial = if automated {
            TransactionStatus::Pending
        } else {
            TransactionStatus::PendingVerification
        };

        let mut tx = Transaction::new(
            Self::kind_for(request.category),
            request.category,
            request.sender.clone().or_else(|| Some(Party::external())),
            Some(request.receiver.clone()),
            request.amount.clone(),
            initial,
        );
        if let Some(fee) = fee {
            tx = tx.with_fee(fee);
        }
        if let Some(reference) = &request.external_reference {
            tx = tx.with_external_reference(reference);
        }
        tx.metadata.note = request.note.clone();

        let id = self.store_new(tx)?;

        if !automated {
            info!(transaction_id = %id, "Manual cash-in awaiting review");
            return Ok(TransactionView {
                transaction_id: id,
                status: TransactionStatus::PendingVerification,
            });
        }

        match self
            .provider
            .initiate(&request.amount, id, request.counterparty_ref.as_deref())
            .await
        {
            Ok(session) => {
                let view = self.with_transaction(id, |tx| {
                    tx.metadata.provider_payment_id = Some(session.provider_payment_id.clone());
                    tx.transition_to(TransactionStatus::Processing)?;
                    Ok(TransactionView::of(tx))
                })?;
                info!(transaction_id = %id, "Cash-in handed to provider");
                Ok(view)
            }
            Err(e) => {
                // Funds were never held, so failing the record is the whole
                // cleanup.
                let _ = self.with_transaction(id, |tx| {
                    tx.fail(e.to_string())?;
                    Ok(())
                });
                self.notify_resolution(id).await;
                warn!(transaction_id = %id, error = %e, "Cash-in initiation failed");
                Err(CustodiaError::ProviderUnavailable(e.to_string()))
            }
        }
    }

    /// Pay a wallet balance out through an external rail.
    ///
    /// Holds `amount + fee` out of the sender's available bucket before the
    /// provider is contacted; the hold is reversed on any failure.
    #[instrument(skip(self, request), fields(category = ?request.category))]
    pub async fn cash_out(&self, request: CashOutRequest) -> Result<TransactionView> {
        let bill_payment = request.category == TransactionCategory::BillPayment;
        if !request.category.is_cash_out() && !bill_payment {
            return Err(CustodiaError::Validation {
                message: format!("{:?} is not a cash-out category", request.category),
                field: Some("category".to_string()),
            });
        }
        self.registry.validate_amount(&request.amount)?;

        let wallet = Self::wallet_of(&request.sender, "sender")?;

        if self.config.require_code_for_cash_out {
            let code = request.code.as_deref().ok_or_else(|| CustodiaError::Validation {
                message: "A one-time code is required for cash-outs".to_string(),
                field: Some("code".to_string()),
            })?;
            let identifier = request
                .sender
                .account_id
                .as_ref()
                .map(|account| account.as_str().to_string())
                .unwrap_or_else(|| wallet.to_string());
            self.otc.verify(&identifier, CASH_OUT_OTC_PURPOSE, code)?;
        }

        let quote = self
            .fees
            .compute(&request.amount, Self::fee_tier(request.category))?;
        let charged = request.amount.value + quote.amount.value;
        let currency = request.amount.currency.clone();

        let snapshot = self.ledger.snapshot(wallet)?;
        if !snapshot.can_transact() {
            return Err(CustodiaError::WalletNotActive(wallet));
        }

        let decision = self.ledger.check_limits(wallet, &currency, charged)?;
        if !decision.allowed {
            return Err(CustodiaError::LimitExceeded {
                wallet_id: wallet,
                reason: decision.reason.unwrap_or_else(|| "limit exceeded".to_string()),
            });
        }

        if !self.ledger.can_debit(wallet, &currency, charged)? {
            let available = self.ledger.get_available(wallet, &currency)?;
            return Err(CustodiaError::InsufficientBalance {
                wallet_id: wallet,
                currency: currency.code().to_string(),
                bucket: Bucket::Available.as_str(),
                requested: charged,
                available,
            });
        }

        let mut tx = Transaction::new(
            Self::kind_for(request.category),
            request.category,
            Some(request.sender.clone()),
            Some(Party::external()),
            request.amount.clone(),
            TransactionStatus::Pending,
        )
        .with_fee(Fee::new(quote.amount.clone(), quote.rate));
        if let Some(reference) = &request.external_reference {
            tx = tx.with_external_reference(reference);
        }
        tx.metadata.note = request.note.clone();

        let id = self.store_new(tx)?;

        if let Err(e) = self
            .ledger
            .debit(wallet, &currency, charged, Bucket::Available, Some(id))
        {
            let _ = self.with_transaction(id, |tx| {
                tx.fail(e.to_string())?;
                Ok(())
            });
            return Err(e);
        }
        self.with_transaction(id, |tx| {
            tx.transition_to(TransactionStatus::Processing)?;
            Ok(())
        })?;

        match self
            .provider
            .initiate(&request.amount, id, Some(request.counterparty_ref.as_str()))
            .await
        {
            Ok(session) => {
                let view = self.with_transaction(id, |tx| {
                    tx.metadata.provider_payment_id = Some(session.provider_payment_id.clone());
                    Ok(TransactionView::of(tx))
                })?;
                info!(transaction_id = %id, charged = %charged, "Cash-out in flight");
                Ok(view)
            }
            Err(e) => {
                // The hold is already in place; run the standard failure
                // path so it is reversed exactly once.
                self.settle_failure(id, &format!("Initiation failed: {e}"))?;
                self.notify_resolution(id).await;
                warn!(transaction_id = %id, error = %e, "Cash-out initiation failed, hold reversed");
                Err(CustodiaError::ProviderUnavailable(e.to_string()))
            }
        }
    }

    /// Move value between two wallets, converting when the receive currency
    /// differs. Both sides settle as one atomic unit; the transaction
    /// completes synchronously.
    #[instrument(skip(self, request), fields(category = ?request.category))]
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransactionView> {
        if !request.category.is_transfer() {
            return Err(CustodiaError::Validation {
                message: format!("{:?} is not a transfer category", request.category),
                field: Some("category".to_string()),
            });
        }
        self.registry.validate_amount(&request.amount)?;

        let sender_wallet = Self::wallet_of(&request.sender, "sender")?;
        let receiver_wallet = Self::wallet_of(&request.receiver, "receiver")?;

        let quote = self
            .fees
            .compute(&request.amount, Self::fee_tier(request.category))?;
        let charged = Money::new(
            request.amount.value + quote.amount.value,
            request.amount.currency.clone(),
        );

        let decision =
            self.ledger
                .check_limits(sender_wallet, &charged.currency, charged.value)?;
        if !decision.allowed {
            return Err(CustodiaError::LimitExceeded {
                wallet_id: sender_wallet,
                reason: decision.reason.unwrap_or_else(|| "limit exceeded".to_string()),
            });
        }

        let target = request
            .receive_currency
            .clone()
            .unwrap_or_else(|| request.amount.currency.clone());
        let converted = self.converter.convert(&request.amount, &target).await?;

        let mut tx = Transaction::new(
            Self::kind_for(request.category),
            request.category,
            Some(request.sender.clone()),
            Some(request.receiver.clone()),
            request.amount.clone(),
            TransactionStatus::Pending,
        )
        .with_fee(Fee::new(quote.amount.clone(), quote.rate));
        if let Some(reference) = &request.external_reference {
            tx = tx.with_external_reference(reference);
        }
        tx.metadata.note = request.note.clone();

        let id = self.store_new(tx)?;

        if let Err(e) = self.ledger.transfer_between(
            sender_wallet,
            receiver_wallet,
            &charged,
            &converted,
            Some(id),
        ) {
            let _ = self.with_transaction(id, |tx| {
                tx.fail(e.to_string())?;
                Ok(())
            });
            return Err(e);
        }

        if let Err(e) = self.collect_fee_for(id) {
            // Unwind the main movement before surfacing the error.
            if let Err(undo) = self.ledger.transfer_between(
                receiver_wallet,
                sender_wallet,
                &converted,
                &charged,
                Some(id),
            ) {
                error!(
                    transaction_id = %id,
                    error = %undo,
                    "Transfer unwind failed; manual reconciliation required"
                );
            }
            let _ = self.with_transaction(id, |tx| {
                tx.metadata.requires_reconciliation = true;
                tx.fail(e.to_string())?;
                Ok(())
            });
            return Err(e);
        }

        let view = self.with_transaction(id, |tx| {
            tx.transition_to(TransactionStatus::Processing)?;
            tx.transition_to(TransactionStatus::Completed)?;
            Ok(TransactionView::of(tx))
        })?;
        info!(transaction_id = %id, converted = %converted, "Transfer completed");
        self.notify_resolution(id).await;
        Ok(view)
    }

    /// Mirror a completed transaction in the opposite direction.
    #[instrument(skip(self, note))]
    pub async fn refund(
        &self,
        original_id: TransactionId,
        note: Option<String>,
    ) -> Result<TransactionView> {
        let original = self.get_transaction(original_id)?;
        if original.status != TransactionStatus::Completed {
            return Err(CustodiaError::Validation {
                message: "Only completed transactions can be refunded".to_string(),
                field: Some("original_transaction_id".to_string()),
            });
        }

        let sender = original.receiver.clone().unwrap_or_else(Party::external);
        let receiver = original.sender.clone().unwrap_or_else(Party::external);
        let from_wallet = sender.wallet_id;
        let to_wallet = receiver.wallet_id;
        if from_wallet.is_none() && to_wallet.is_none() {
            return Err(CustodiaError::Validation {
                message: "Refund would have no ledger effect".to_string(),
                field: None,
            });
        }

        let mut tx = Transaction::new(
            TransactionKind::Refund,
            original.category,
            Some(sender),
            Some(receiver),
            original.amount.clone(),
            TransactionStatus::Pending,
        );
        tx.metadata.original_transaction_id = Some(original_id);
        tx.metadata.note = note;

        let id = self.store_new(tx)?;
        let amount = original.amount.clone();

        let result = match (from_wallet, to_wallet) {
            (Some(from), Some(to)) => {
                self.ledger
                    .transfer_between(from, to, &amount, &amount, Some(id))
            }
            (Some(from), None) => self.ledger.debit(
                from,
                &amount.currency,
                amount.value,
                Bucket::Available,
                Some(id),
            ),
            (None, Some(to)) => self.ledger.credit(
                to,
                &amount.currency,
                amount.value,
                Bucket::Available,
                Some(id),
            ),
            (None, None) => unreachable!("guarded above"),
        };
        if let Err(e) = result {
            let _ = self.with_transaction(id, |tx| {
                tx.fail(e.to_string())?;
                Ok(())
            });
            return Err(e);
        }

        let view = self.with_transaction(id, |tx| {
            tx.transition_to(TransactionStatus::Processing)?;
            tx.transition_to(TransactionStatus::Completed)?;
            Ok(TransactionView::of(tx))
        })?;
        info!(transaction_id = %id, original = %original_id, "Refund completed");
        self.notify_resolution(id).await;
        Ok(view)
    }

    /// Settlement webhook entry point. The verified provider result drives
    /// `Processing` to its terminal status; redelivered callbacks for
    /// already-terminal transactions are answered idempotently.
    #[instrument(skip(self, callback), fields(transaction_id = %callback.order_id))]
    pub async fn confirm_settlement(&self, callback: ProviderCallback) -> Result<TransactionView> {
        let id = callback.order_id;
        let current = self.get_transaction(id)?;

        if current.status.is_final() {
            info!(status = ?current.status, "Redelivered settlement callback ignored");
            return Ok(TransactionView::of(&current));
        }
        if current.status != TransactionStatus::Processing {
            return Err(CustodiaError::Validation {
                message: format!("Transaction is {:?}, not awaiting settlement", current.status),
                field: Some("order_id".to_string()),
            });
        }

        let view = if callback.success {
            self.settle_success(id, callback.provider_transaction_id.clone())?
        } else {
            let reason = callback
                .failure_reason
                .clone()
                .unwrap_or_else(|| "Provider reported failure".to_string());
            self.settle_failure(id, &reason)?
        };
        self.notify_resolution(id).await;
        Ok(view)
    }

    /// Approve a transaction parked in `PendingVerification`.
    #[instrument(skip(self))]
    pub async fn approve(&self, id: TransactionId, reviewer: AccountId) -> Result<TransactionView> {
        let view = self.with_transaction(id, |tx| {
            if tx.status != TransactionStatus::PendingVerification {
                return Err(CustodiaError::InvalidTransition {
                    from: tx.status,
                    to: TransactionStatus::Completed,
                });
            }
            if tx.kind != TransactionKind::CashIn {
                return Err(CustodiaError::Validation {
                    message: "Only cash-ins can be approved".to_string(),
                    field: None,
                });
            }

            let wallet = tx
                .receiver
                .as_ref()
                .and_then(|party| party.wallet_id)
                .ok_or_else(|| {
                    CustodiaError::Internal("Approval target has no wallet".to_string())
                })?;
            let net = tx.net_amount();
            self.ledger.credit(
                wallet,
                &net.currency,
                net.value,
                Bucket::Available,
                Some(tx.id),
            )?;
            self.collect_fee(tx)?;

            tx.metadata.reviewed_by = Some(reviewer.clone());
            tx.transition_to(TransactionStatus::Completed)?;
            Ok(TransactionView::of(tx))
        })?;
        info!(transaction_id = %id, "Manual transaction approved");
        self.notify_resolution(id).await;
        Ok(view)
    }

    /// Reject a transaction parked in `PendingVerification`. No balance
    /// effect.
    #[instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        id: TransactionId,
        reviewer: AccountId,
        reason: impl Into<String>,
    ) -> Result<TransactionView> {
        let reason = reason.into();
        let view = self.with_transaction(id, |tx| {
            if tx.status != TransactionStatus::PendingVerification {
                return Err(CustodiaError::InvalidTransition {
                    from: tx.status,
                    to: TransactionStatus::Failed,
                });
            }
            tx.metadata.reviewed_by = Some(reviewer.clone());
            tx.metadata.review_reason = Some(reason.clone());
            tx.fail(reason.clone())?;
            Ok(TransactionView::of(tx))
        })?;
        info!(transaction_id = %id, "Manual transaction rejected");
        self.notify_resolution(id).await;
        Ok(view)
    }

    /// Cancel a transaction that has not yet settled. A `Processing`
    /// cash-out has its held funds returned.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        id: TransactionId,
        reason: impl Into<String>,
    ) -> Result<TransactionView> {
        let reason = reason.into();
        let view = self.with_transaction(id, |tx| {
            if tx.status.is_final() {
                return Err(CustodiaError::NotCancellable(id));
            }

            if tx.status == TransactionStatus::Processing
                && matches!(tx.kind, TransactionKind::CashOut | TransactionKind::Payment)
            {
                Self::reverse_hold(&self.ledger, tx)?;
            }

            tx.transition_to(TransactionStatus::Cancelled)?;
            tx.metadata.review_reason = Some(reason.clone());
            Ok(TransactionView::of(tx))
        })?;
        info!(transaction_id = %id, "Transaction cancelled");
        self.notify_resolution(id).await;
        Ok(view)
    }

    /// Annotate a completed transaction as charged back. Triggered
    /// externally; fund recovery is an out-of-band process.
    #[instrument(skip(self, reason))]
    pub async fn mark_chargeback(
        &self,
        id: TransactionId,
        reason: impl Into<String>,
    ) -> Result<TransactionView> {
        self.annotate_post_settlement(id, TransactionStatus::Chargeback, reason.into())
            .await
    }

    /// Annotate a completed transaction as disputed.
    #[instrument(skip(self, reason))]
    pub async fn mark_disputed(
        &self,
        id: TransactionId,
        reason: impl Into<String>,
    ) -> Result<TransactionView> {
        self.annotate_post_settlement(id, TransactionStatus::Disputed, reason.into())
            .await
    }

    // --- Internal helpers ---

    async fn annotate_post_settlement(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        reason: String,
    ) -> Result<TransactionView> {
        let view = self.with_transaction(id, |tx| {
            tx.transition_to(status)?;
            tx.metadata.review_reason = Some(reason.clone());
            Ok(TransactionView::of(tx))
        })?;
        warn!(transaction_id = %id, status = ?status, "Post-settlement annotation");
        self.notify_resolution(id).await;
        Ok(view)
    }

    /// Apply a successful settlement while holding the transaction entry.
    pub(crate) fn settle_success(
        &self,
        id: TransactionId,
        provider_transaction_id: Option<String>,
    ) -> Result<TransactionView> {
        self.with_transaction(id, |tx| {
            if tx.status != TransactionStatus::Processing {
                return Err(CustodiaError::InvalidTransition {
                    from: tx.status,
                    to: TransactionStatus::Completed,
                });
            }

            match tx.kind {
                TransactionKind::CashIn | TransactionKind::TopUp => {
                    let wallet = tx
                        .receiver
                        .as_ref()
                        .and_then(|party| party.wallet_id)
                        .ok_or_else(|| {
                            CustodiaError::Internal("Cash-in has no receiving wallet".to_string())
                        })?;
                    let net = tx.net_amount();
                    if let Err(e) = self.ledger.credit(
                        wallet,
                        &net.currency,
                        net.value,
                        Bucket::Available,
                        Some(tx.id),
                    ) {
                        tx.metadata.requires_reconciliation = true;
                        error!(
                            transaction_id = %tx.id,
                            error = %e,
                            "Settlement credit failed; manual reconciliation required"
                        );
                        return Err(e);
                    }
                    self.collect_fee(tx)?;
                }
                TransactionKind::CashOut | TransactionKind::Payment => {
                    // The principal already left at creation; settling only
                    // realizes the fee.
                    self.collect_fee(tx)?;
                }
                _ => {}
            }

            tx.metadata.provider_transaction_id = provider_transaction_id.clone();
            tx.transition_to(TransactionStatus::Completed)?;
            Ok(TransactionView::of(tx))
        })
    }

    /// Apply a failed settlement, reversing any held debit exactly once.
    pub(crate) fn settle_failure(&self, id: TransactionId, reason: &str) -> Result<TransactionView> {
        self.with_transaction(id, |tx| {
            if tx.status != TransactionStatus::Processing {
                return Err(CustodiaError::InvalidTransition {
                    from: tx.status,
                    to: TransactionStatus::Failed,
                });
            }

            if matches!(tx.kind, TransactionKind::CashOut | TransactionKind::Payment) {
                Self::reverse_hold(&self.ledger, tx)?;
            }

            tx.fail(reason)?;
            Ok(TransactionView::of(tx))
        })
    }

    /// Return a cash-out's held `amount + fee` to the sender. Runs strictly
    /// before the terminal transition, so a retried failure path can never
    /// credit twice.
    fn reverse_hold(ledger: &WalletLedger, tx: &mut Transaction) -> Result<()> {
        let wallet = tx
            .sender
            .as_ref()
            .and_then(|party| party.wallet_id)
            .ok_or_else(|| CustodiaError::Internal("Cash-out has no sending wallet".to_string()))?;
        let charged = tx.charged_amount();

        if let Err(e) = ledger.credit_reversal(
            wallet,
            &charged.currency,
            charged.value,
            Bucket::Available,
            Some(tx.id),
        ) {
            tx.metadata.requires_reconciliation = true;
            error!(
                transaction_id = %tx.id,
                error = %e,
                "Reversal failed; escalating to manual reconciliation"
            );
            return Err(CustodiaError::Internal(format!("Reversal failed: {e}")));
        }
        Ok(())
    }

    fn collect_fee(&self, tx: &Transaction) -> Result<()> {
        if let Some(fee) = &tx.fee {
            if fee.amount.is_positive() {
                self.ledger.credit(
                    self.fee_wallet,
                    &fee.amount.currency,
                    fee.amount.value,
                    Bucket::Available,
                    Some(tx.id),
                )?;
            }
        }
        Ok(())
    }

    fn collect_fee_for(&self, id: TransactionId) -> Result<()> {
        let tx = self.get_transaction(id)?;
        self.collect_fee(&tx)
    }

    /// Store a new transaction and claim its external reference. On a
    /// duplicate reference the record is removed again and nothing leaks.
    fn store_new(&self, tx: Transaction) -> Result<TransactionId> {
        let id = tx.id;
        let reference = tx.external_reference.clone();
        self.transactions.insert(id, tx);

        if let Some(reference) = reference {
            if let Err(e) = self.claim_reference(&reference, id) {
                self.transactions.remove(&id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Map an external reference to a transaction. A reference may be
    /// reused only once its previous holder has failed or been cancelled.
    fn claim_reference(&self, reference: &str, id: TransactionId) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.by_reference.entry(reference.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = *entry.get();
                let blocked = self
                    .transactions
                    .get(&existing)
                    .map(|tx| {
                        !matches!(
                            tx.status,
                            TransactionStatus::Failed | TransactionStatus::Cancelled
                        )
                    })
                    .unwrap_or(false);

                if blocked {
                    return Err(CustodiaError::DuplicateReference(reference.to_string()));
                }
                entry.insert(id);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    fn with_transaction<R>(
        &self,
        id: TransactionId,
        f: impl FnOnce(&mut Transaction) -> Result<R>,
    ) -> Result<R> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or(CustodiaError::TransactionNotFound(id))?;
        f(entry.value_mut())
    }

    pub(crate) async fn notify_resolution(&self, id: TransactionId) {
        if let Ok(tx) = self.get_transaction(id) {
            let notification = Notification::for_transaction(&tx);
            if let Err(e) = self.notifier.notify(notification).await {
                warn!(transaction_id = %id, error = %e, "Notification dispatch failed");
            }
        }
    }

    fn wallet_of(party: &Party, side: &str) -> Result<WalletId> {
        party.wallet_id.ok_or_else(|| CustodiaError::Validation {
            message: format!("A {side} wallet is required"),
            field: Some(format!("{side}.wallet_id")),
        })
    }

    fn fee_tier(category: TransactionCategory) -> FeeTier {
        match category {
            TransactionCategory::BillPayment => FeeTier::BillPayment,
            _ => FeeTier::Standard,
        }
    }

    fn kind_for(category: TransactionCategory) -> TransactionKind {
        if category.is_cash_in() {
            TransactionKind::CashIn
        } else if category.is_cash_out() {
            TransactionKind::CashOut
        } else if category.is_transfer() {
            TransactionKind::Transfer
        } else if category == TransactionCategory::BillPayment {
            TransactionKind::Payment
        } else {
            TransactionKind::Adjustment
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::provider::MockSettlementProvider;
    use custodia_fx::{MockRateSource, RateCache, RateCacheConfig, RateSnapshot, TierPolicy};
    use custodia_otc::{OtcConfig, OtcVerifier};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Harness {
        engine: TransactionEngine,
        ledger: Arc<WalletLedger>,
        provider: Arc<MockSettlementProvider>,
        notifier: Arc<RecordingNotifier>,
        otc: Arc<OtcVerifier>,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            let registry = Arc::new(CurrencyRegistry::with_defaults());
            let ledger = Arc::new(WalletLedger::new(registry.clone()));

            // Flat fees keep the arithmetic in scenarios obvious:
            // 2 USD / 5 BDT per transaction regardless of size.
            let mut fees = FeeSchedule::with_defaults(registry.clone());
            fees.set_policy(
                FeeTier::Standard,
                Currency::usd(),
                TierPolicy::new(Decimal::ZERO, dec!(2), None),
            );
            fees.set_policy(
                FeeTier::Standard,
                Currency::bdt(),
                TierPolicy::new(Decimal::ZERO, dec!(5), None),
            );

            let source = Arc::new(MockRateSource::new("test"));
            source.set_rate(Currency::eur(), dec!(0.92));
            source.set_rate(Currency::bdt(), dec!(117.50));
            let cache = Arc::new(RateCache::new(
                RateCacheConfig::default(),
                source,
                None,
                RateSnapshot::new(
                    Currency::usd(),
                    std::collections::HashMap::new(),
                    "DEFAULTS".to_string(),
                ),
            ));
            let converter = Arc::new(CurrencyConverter::new(registry.clone(), cache));

            let otc = Arc::new(OtcVerifier::with_config(OtcConfig {
                cooldown: chrono::Duration::zero(),
                ..OtcConfig::default()
            }));
            let provider = Arc::new(MockSettlementProvider::new("mockpay"));
            let notifier = Arc::new(RecordingNotifier::new());

            let engine = TransactionEngine::new(
                config,
                registry,
                ledger.clone(),
                Arc::new(fees),
                converter,
                otc.clone(),
                provider.clone(),
                notifier.clone(),
            )
            .unwrap();

            Self {
                engine,
                ledger,
                provider,
                notifier,
                otc,
            }
        }

        fn wallet(&self, account: &str, funded_usd: Decimal) -> WalletId {
            let id = self
                .ledger
                .create_wallet(
                    AccountId::new(account),
                    WalletKind::Personal,
                    SpendingLimits::unlimited(),
                )
                .unwrap();
            if funded_usd > Decimal::ZERO {
                self.ledger
                    .credit(id, &Currency::usd(), funded_usd, Bucket::Available, None)
                    .unwrap();
            }
            id
        }

        fn available(&self, wallet: WalletId, currency: &Currency) -> Decimal {
            self.ledger.get_available(wallet, currency).unwrap()
        }

        fn fee_collected(&self, currency: &Currency) -> Decimal {
            self.available(self.engine.fee_wallet(), currency)
        }
    }

    fn cash_out_request(wallet: WalletId, value: Decimal) -> CashOutRequest {
        CashOutRequest {
            sender: Party::internal(AccountId::new("acct_w"), wallet),
            amount: Money::new(value, Currency::usd()),
            category: TransactionCategory::ProviderCashOut,
            external_reference: None,
            counterparty_ref: "msisdn:0170000000".to_string(),
            code: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_cash_out_success_keeps_hold() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h.engine.cash_out(cash_out_request(wallet, dec!(30))).await.unwrap();
        assert_eq!(view.status, TransactionStatus::Processing);
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(68));

        let settled = h
            .engine
            .confirm_settlement(ProviderCallback {
                order_id: view.transaction_id,
                success: true,
                provider_transaction_id: Some("prov-1".to_string()),
                failure_reason: None,
            })
            .await
            .unwrap();

        assert_eq!(settled.status, TransactionStatus::Completed);
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(68));
        assert_eq!(h.fee_collected(&Currency::usd()), dec!(2));

        let tx = h.engine.get_transaction(view.transaction_id).unwrap();
        assert_eq!(
            tx.metadata.provider_transaction_id.as_deref(),
            Some("prov-1")
        );
        assert!(tx.timing.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cash_out_provider_failure_reverses_hold() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h.engine.cash_out(cash_out_request(wallet, dec!(30))).await.unwrap();
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(68));

        let settled = h
            .engine
            .confirm_settlement(ProviderCallback {
                order_id: view.transaction_id,
                success: false,
                provider_transaction_id: None,
                failure_reason: Some("payout rail rejected".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(settled.status, TransactionStatus::Failed);
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(100));
        assert_eq!(h.fee_collected(&Currency::usd()), dec!(0));

        let tx = h.engine.get_transaction(view.transaction_id).unwrap();
        assert_eq!(
            tx.metadata.failure_reason.as_deref(),
            Some("payout rail rejected")
        );
    }

    #[tokio::test]
    async fn test_redelivered_callback_is_idempotent() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h.engine.cash_out(cash_out_request(wallet, dec!(30))).await.unwrap();
        let callback = ProviderCallback {
            order_id: view.transaction_id,
            success: false,
            provider_transaction_id: None,
            failure_reason: None,
        };

        h.engine.confirm_settlement(callback.clone()).await.unwrap();
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(100));

        // The retried callback must not credit the reversal again.
        let again = h.engine.confirm_settlement(callback).await.unwrap();
        assert_eq!(again.status, TransactionStatus::Failed);
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(100));
    }

    #[tokio::test]
    async fn test_cash_out_initiation_failure() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));
        h.provider.set_failing(true);

        let err = h
            .engine
            .cash_out(cash_out_request(wallet, dec!(30)))
            .await
            .unwrap_err();

        assert!(matches!(err, CustodiaError::ProviderUnavailable(_)));
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(100));
        assert_eq!(
            h.engine.find_by_status(TransactionStatus::Failed).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_cash_out_insufficient_balance() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(10));

        let err = h
            .engine
            .cash_out(cash_out_request(wallet, dec!(30)))
            .await
            .unwrap_err();

        assert!(matches!(err, CustodiaError::InsufficientBalance { .. }));
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(10));
        assert!(h.engine.find_by_status(TransactionStatus::Failed).is_empty());
    }

    #[tokio::test]
    async fn test_cash_out_respects_limits() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h
            .ledger
            .create_wallet(
                AccountId::new("acct_limited"),
                WalletKind::Personal,
                SpendingLimits::unlimited().with_daily_cap(Currency::usd(), dec!(20)),
            )
            .unwrap();
        h.ledger
            .credit(wallet, &Currency::usd(), dec!(100), Bucket::Available, None)
            .unwrap();

        let err = h
            .engine
            .cash_out(cash_out_request(wallet, dec!(30)))
            .await
            .unwrap_err();

        assert!(matches!(err, CustodiaError::LimitExceeded { .. }));
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(100));
    }

    #[tokio::test]
    async fn test_cash_out_otc_gate() {
        let h = Harness::new(EngineConfig {
            require_code_for_cash_out: true,
            ..EngineConfig::default()
        });
        let wallet = h.wallet("acct_w", dec!(100));

        // Missing code.
        let err = h
            .engine
            .cash_out(cash_out_request(wallet, dec!(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodiaError::Validation { .. }));

        // Wrong code.
        let code = h
            .engine
            .issue_cash_out_code(&AccountId::new("acct_w"))
            .unwrap();
        let mut request = cash_out_request(wallet, dec!(30));
        request.code = Some("000000".to_string());
        let err = h.engine.cash_out(request).await.unwrap_err();
        assert!(matches!(err, CustodiaError::OtcMismatch { .. }));

        // Correct code (reissued; the mismatch burned an attempt but the
        // record is still live).
        let mut request = cash_out_request(wallet, dec!(30));
        request.code = Some(code);
        let view = h.engine.cash_out(request).await.unwrap();
        assert_eq!(view.status, TransactionStatus::Processing);

        // The code was consumed.
        assert!(!h.otc.has_live_code("acct_w", CASH_OUT_OTC_PURPOSE));
    }

    #[tokio::test]
    async fn test_auto_cash_in_settles_net_of_fee() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_r", dec!(0));

        let view = h
            .engine
            .cash_in(CashInRequest {
                sender: None,
                receiver: Party::internal(AccountId::new("acct_r"), wallet),
                amount: Money::new(dec!(100), Currency::usd()),
                category: TransactionCategory::AutoMerchantCashIn,
                external_reference: Some("prov-ref-1".to_string()),
                counterparty_ref: Some("msisdn:0171111111".to_string()),
                note: None,
            })
            .await
            .unwrap();
        assert_eq!(view.status, TransactionStatus::Processing);
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(0));

        let settled = h
            .engine
            .confirm_settlement(ProviderCallback {
                order_id: view.transaction_id,
                success: true,
                provider_transaction_id: Some("prov-tx-9".to_string()),
                failure_reason: None,
            })
            .await
            .unwrap();

        assert_eq!(settled.status, TransactionStatus::Completed);
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(98));
        assert_eq!(h.fee_collected(&Currency::usd()), dec!(2));
    }

    #[tokio::test]
    async fn test_auto_cash_in_failure_has_no_balance_effect() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_r", dec!(0));

        let view = h
            .engine
            .cash_in(CashInRequest {
                sender: None,
                receiver: Party::internal(AccountId::new("acct_r"), wallet),
                amount: Money::new(dec!(100), Currency::usd()),
                category: TransactionCategory::AutoPersonalCashIn,
                external_reference: None,
                counterparty_ref: None,
                note: None,
            })
            .await
            .unwrap();

        h.engine
            .confirm_settlement(ProviderCallback {
                order_id: view.transaction_id,
                success: false,
                provider_transaction_id: None,
                failure_reason: Some("payer abandoned".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(h.available(wallet, &Currency::usd()), dec!(0));
        assert_eq!(h.fee_collected(&Currency::usd()), dec!(0));
    }

    #[tokio::test]
    async fn test_manual_cash_in_reject_then_approve() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_r", dec!(0));
        let receiver = Party::internal(AccountId::new("acct_r"), wallet);

        let request = CashInRequest {
            sender: None,
            receiver: receiver.clone(),
            amount: Money::new(dec!(500), Currency::bdt()),
            category: TransactionCategory::ManualCashIn,
            external_reference: None,
            counterparty_ref: None,
            note: Some("branch deposit slip 4411".to_string()),
        };

        // Rejected submission: no balance change.
        let view = h.engine.cash_in(request.clone()).await.unwrap();
        assert_eq!(view.status, TransactionStatus::PendingVerification);
        assert_eq!(h.available(wallet, &Currency::bdt()), dec!(0));

        let rejected = h
            .engine
            .reject(view.transaction_id, AccountId::new("admin_1"), "slip unreadable")
            .await
            .unwrap();
        assert_eq!(rejected.status, TransactionStatus::Failed);
        assert_eq!(h.available(wallet, &Currency::bdt()), dec!(0));

        // Approved submission: full amount lands.
        let view = h.engine.cash_in(request).await.unwrap();
        let approved = h
            .engine
            .approve(view.transaction_id, AccountId::new("admin_1"))
            .await
            .unwrap();

        assert_eq!(approved.status, TransactionStatus::Completed);
        assert_eq!(h.available(wallet, &Currency::bdt()), dec!(500));

        let tx = h.engine.get_transaction(view.transaction_id).unwrap();
        assert_eq!(
            tx.metadata.reviewed_by,
            Some(AccountId::new("admin_1"))
        );
    }

    #[tokio::test]
    async fn test_approve_requires_pending_verification() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h.engine.cash_out(cash_out_request(wallet, dec!(30))).await.unwrap();
        let err = h
            .engine
            .approve(view.transaction_id, AccountId::new("admin_1"))
            .await
            .unwrap_err();

        assert!(matches!(err, CustodiaError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_r", dec!(0));
        let receiver = Party::internal(AccountId::new("acct_r"), wallet);

        let request = CashInRequest {
            sender: None,
            receiver,
            amount: Money::new(dec!(50), Currency::usd()),
            category: TransactionCategory::ManualCashIn,
            external_reference: Some("dup-ref".to_string()),
            counterparty_ref: None,
            note: None,
        };

        let first = h.engine.cash_in(request.clone()).await.unwrap();

        let err = h.engine.cash_in(request.clone()).await.unwrap_err();
        assert!(matches!(err, CustodiaError::DuplicateReference(_)));

        // Once the holder fails, the reference is usable again.
        h.engine
            .reject(first.transaction_id, AccountId::new("admin_1"), "dup test")
            .await
            .unwrap();
        assert!(h.engine.cash_in(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_processing_cash_out_returns_hold() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h.engine.cash_out(cash_out_request(wallet, dec!(30))).await.unwrap();
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(68));

        let cancelled = h
            .engine
            .cancel(view.transaction_id, "user changed their mind")
            .await
            .unwrap();

        assert_eq!(cancelled.status, TransactionStatus::Cancelled);
        assert_eq!(h.available(wallet, &Currency::usd()), dec!(100));
    }

    #[tokio::test]
    async fn test_cancel_terminal_fails() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h.engine.cash_out(cash_out_request(wallet, dec!(30))).await.unwrap();
        h.engine
            .confirm_settlement(ProviderCallback {
                order_id: view.transaction_id,
                success: true,
                provider_transaction_id: None,
                failure_reason: None,
            })
            .await
            .unwrap();

        let err = h
            .engine
            .cancel(view.transaction_id, "too late")
            .await
            .unwrap_err();
        assert!(matches!(err, CustodiaError::NotCancellable(_)));
    }

    #[tokio::test]
    async fn test_transfer_same_currency() {
        let h = Harness::new(EngineConfig::default());
        let sender = h.wallet("acct_a", dec!(100));
        let receiver = h.wallet("acct_b", dec!(0));

        let view = h
            .engine
            .transfer(TransferRequest {
                sender: Party::internal(AccountId::new("acct_a"), sender),
                receiver: Party::internal(AccountId::new("acct_b"), receiver),
                amount: Money::new(dec!(30), Currency::usd()),
                receive_currency: None,
                category: TransactionCategory::WalletTransfer,
                external_reference: None,
                note: None,
            })
            .await
            .unwrap();

        assert_eq!(view.status, TransactionStatus::Completed);
        assert_eq!(h.available(sender, &Currency::usd()), dec!(68));
        assert_eq!(h.available(receiver, &Currency::usd()), dec!(30));
        assert_eq!(h.fee_collected(&Currency::usd()), dec!(2));
    }

    #[tokio::test]
    async fn test_transfer_cross_currency() {
        let h = Harness::new(EngineConfig::default());
        let sender = h.wallet("acct_a", dec!(100));
        let receiver = h.wallet("acct_b", dec!(0));

        h.engine
            .transfer(TransferRequest {
                sender: Party::internal(AccountId::new("acct_a"), sender),
                receiver: Party::internal(AccountId::new("acct_b"), receiver),
                amount: Money::new(dec!(10), Currency::usd()),
                receive_currency: Some(Currency::bdt()),
                category: TransactionCategory::WalletTransfer,
                external_reference: None,
                note: None,
            })
            .await
            .unwrap();

        // 10 USD at 117.50 BDT/USD.
        assert_eq!(h.available(receiver, &Currency::bdt()), dec!(1175.00));
        assert_eq!(h.available(sender, &Currency::usd()), dec!(88));
    }

    #[tokio::test]
    async fn test_transfer_rolls_back_when_receiver_unknown() {
        let h = Harness::new(EngineConfig::default());
        let sender = h.wallet("acct_a", dec!(100));
        let ghost = WalletId::new();

        let err = h
            .engine
            .transfer(TransferRequest {
                sender: Party::internal(AccountId::new("acct_a"), sender),
                receiver: Party::wallet(ghost),
                amount: Money::new(dec!(30), Currency::usd()),
                receive_currency: None,
                category: TransactionCategory::WalletTransfer,
                external_reference: None,
                note: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CustodiaError::WalletNotFound(_)));
        assert_eq!(h.available(sender, &Currency::usd()), dec!(100));
    }

    #[tokio::test]
    async fn test_refund_mirrors_completed_transfer() {
        let h = Harness::new(EngineConfig::default());
        let sender = h.wallet("acct_a", dec!(100));
        let receiver = h.wallet("acct_b", dec!(0));

        let view = h
            .engine
            .transfer(TransferRequest {
                sender: Party::internal(AccountId::new("acct_a"), sender),
                receiver: Party::internal(AccountId::new("acct_b"), receiver),
                amount: Money::new(dec!(30), Currency::usd()),
                receive_currency: None,
                category: TransactionCategory::WalletTransfer,
                external_reference: None,
                note: None,
            })
            .await
            .unwrap();

        let refund = h
            .engine
            .refund(view.transaction_id, Some("merchant goodwill".to_string()))
            .await
            .unwrap();
        assert_eq!(refund.status, TransactionStatus::Completed);

        // Principal returned; the fee stays collected.
        assert_eq!(h.available(sender, &Currency::usd()), dec!(98));
        assert_eq!(h.available(receiver, &Currency::usd()), dec!(0));

        let tx = h.engine.get_transaction(refund.transaction_id).unwrap();
        assert_eq!(tx.kind, TransactionKind::Refund);
        assert_eq!(
            tx.metadata.original_transaction_id,
            Some(view.transaction_id)
        );
    }

    #[tokio::test]
    async fn test_refund_requires_completed_original() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h.engine.cash_out(cash_out_request(wallet, dec!(30))).await.unwrap();
        let err = h.engine.refund(view.transaction_id, None).await.unwrap_err();
        assert!(matches!(err, CustodiaError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_chargeback_annotation() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h.engine.cash_out(cash_out_request(wallet, dec!(30))).await.unwrap();
        h.engine
            .confirm_settlement(ProviderCallback {
                order_id: view.transaction_id,
                success: true,
                provider_transaction_id: None,
                failure_reason: None,
            })
            .await
            .unwrap();

        let marked = h
            .engine
            .mark_chargeback(view.transaction_id, "issuer dispute 8821")
            .await
            .unwrap();
        assert_eq!(marked.status, TransactionStatus::Chargeback);

        // Chargeback is only legal from Completed.
        let fresh = h.engine.cash_out(cash_out_request(wallet, dec!(10))).await.unwrap();
        let err = h
            .engine
            .mark_chargeback(fresh.transaction_id, "too early")
            .await
            .unwrap_err();
        assert!(matches!(err, CustodiaError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_notifications_dispatched_and_nonfatal() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_r", dec!(0));
        let receiver = Party::internal(AccountId::new("acct_r"), wallet);

        let request = CashInRequest {
            sender: None,
            receiver,
            amount: Money::new(dec!(500), Currency::bdt()),
            category: TransactionCategory::ManualCashIn,
            external_reference: None,
            counterparty_ref: None,
            note: None,
        };

        let view = h.engine.cash_in(request.clone()).await.unwrap();
        h.engine
            .approve(view.transaction_id, AccountId::new("admin_1"))
            .await
            .unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TransactionStatus::Completed);

        // A broken delivery channel never unwinds the ledger.
        h.notifier.set_failing(true);
        let view = h.engine.cash_in(request).await.unwrap();
        let approved = h
            .engine
            .approve(view.transaction_id, AccountId::new("admin_1"))
            .await
            .unwrap();
        assert_eq!(approved.status, TransactionStatus::Completed);
        assert_eq!(h.available(wallet, &Currency::bdt()), dec!(1000));
    }

    #[tokio::test]
    async fn test_create_transaction_dispatch() {
        let h = Harness::new(EngineConfig::default());
        let wallet = h.wallet("acct_w", dec!(100));

        let view = h
            .engine
            .create_transaction(CreateTransaction::CashOut(cash_out_request(
                wallet,
                dec!(30),
            )))
            .await
            .unwrap();

        let tx = h.engine.get_transaction(view.transaction_id).unwrap();
        assert_eq!(tx.kind, TransactionKind::CashOut);
        assert_eq!(tx.category, TransactionCategory::ProviderCashOut);
    }
}
