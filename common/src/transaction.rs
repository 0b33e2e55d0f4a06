//! Transaction model and status state machine.

use crate::{AccountId, Fee, Money, TransactionId, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction status representing the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, not yet handed to a settlement path.
    Pending,
    /// In flight with an external settlement provider.
    Processing,
    /// Awaiting manual administrator approval.
    PendingVerification,
    /// Settled; funds movement is final.
    Completed,
    /// Did not settle; any held funds were released.
    Failed,
    /// Withdrawn by the caller or a timeout before settlement.
    Cancelled,
    /// Reversed post-settlement by an external chargeback.
    Chargeback,
    /// Contested post-settlement; under external dispute.
    Disputed,
}

impl TransactionStatus {
    /// Check if this is a final state.
    ///
    /// `Completed` counts as final for cancellation purposes even though the
    /// post-hoc chargeback/dispute annotations may still follow it.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Chargeback
                | TransactionStatus::Disputed
        )
    }

    /// Check if the transaction is still in flight.
    pub fn is_in_progress(&self) -> bool {
        !self.is_final()
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[
                TransactionStatus::Processing,
                TransactionStatus::PendingVerification,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::Processing => &[
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::PendingVerification => &[
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::Completed => &[
                TransactionStatus::Chargeback,
                TransactionStatus::Disputed,
            ],
            TransactionStatus::Failed => &[],
            TransactionStatus::Cancelled => &[],
            TransactionStatus::Chargeback => &[],
            TransactionStatus::Disputed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Kind of value movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    CashIn,
    CashOut,
    Transfer,
    TopUp,
    Payment,
    Commission,
    Refund,
    Fee,
    Penalty,
    Adjustment,
}

/// Closed sub-classification used for reporting and for selecting the
/// approval policy and fee tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    AutoMerchantCashIn,
    AutoPersonalCashIn,
    ManualCashIn,
    AgentCashIn,
    BankCashIn,
    ProviderCashOut,
    BankCashOut,
    WalletTransfer,
    BankTransfer,
    BillPayment,
    BalanceAdjustment,
}

impl TransactionCategory {
    /// Whether settlement is driven by an external provider callback
    /// (automated) rather than an administrator decision (manual).
    pub fn is_automated(&self) -> bool {
        !matches!(
            self,
            TransactionCategory::ManualCashIn
                | TransactionCategory::AgentCashIn
                | TransactionCategory::BankCashIn
        )
    }

    /// Whether this category classifies a cash-in.
    pub fn is_cash_in(&self) -> bool {
        matches!(
            self,
            TransactionCategory::AutoMerchantCashIn
                | TransactionCategory::AutoPersonalCashIn
                | TransactionCategory::ManualCashIn
                | TransactionCategory::AgentCashIn
                | TransactionCategory::BankCashIn
        )
    }

    /// Whether this category classifies a cash-out.
    pub fn is_cash_out(&self) -> bool {
        matches!(
            self,
            TransactionCategory::ProviderCashOut | TransactionCategory::BankCashOut
        )
    }

    /// Whether this category classifies an internal transfer.
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            TransactionCategory::WalletTransfer | TransactionCategory::BankTransfer
        )
    }
}

/// One side of a transaction. Either field may be absent to represent an
/// external counterparty such as a bank or a payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Account holder, when internal.
    pub account_id: Option<AccountId>,
    /// Wallet, when the movement touches a ledger balance.
    pub wallet_id: Option<WalletId>,
}

impl Party {
    /// An internal party with both account and wallet.
    pub fn internal(account_id: AccountId, wallet_id: WalletId) -> Self {
        Self {
            account_id: Some(account_id),
            wallet_id: Some(wallet_id),
        }
    }

    /// A party identified only by wallet.
    pub fn wallet(wallet_id: WalletId) -> Self {
        Self {
            account_id: None,
            wallet_id: Some(wallet_id),
        }
    }

    /// An external counterparty with no ledger presence.
    pub fn external() -> Self {
        Self {
            account_id: None,
            wallet_id: None,
        }
    }
}

/// Bounded, schema-validated metadata attached to a transaction.
///
/// Fields here are the only mutation surface besides status and timestamps;
/// the amount is immutable after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// Free-text note from the caller.
    pub note: Option<String>,
    /// Why the transaction failed, when it did.
    pub failure_reason: Option<String>,
    /// Provider-side payment session identifier.
    pub provider_payment_id: Option<String>,
    /// Provider-side settlement identifier from the confirmation callback.
    pub provider_transaction_id: Option<String>,
    /// The transaction a refund or chargeback reverses.
    pub original_transaction_id: Option<TransactionId>,
    /// Administrator who approved or rejected a manual transaction.
    pub reviewed_by: Option<AccountId>,
    /// Reason recorded with an approval, rejection, or cancellation.
    pub review_reason: Option<String>,
    /// Set when an automated reversal failed and the transaction needs
    /// manual reconciliation.
    pub requires_reconciliation: bool,
}

/// Timing metrics for a transaction. Each field is set exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTiming {
    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
    /// When it entered `Processing` or `PendingVerification`.
    pub processed_at: Option<DateTime<Utc>>,
    /// When it entered `Completed` or `Failed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// When it was cancelled, if it was.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TransactionTiming {
    /// Create new timing with current timestamp as creation time.
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// Total duration from creation to resolution in milliseconds.
    pub fn total_duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|completed| (completed - self.created_at).num_milliseconds())
    }
}

impl Default for TransactionTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// A value movement record. Never deleted; terminal records are immutable
/// apart from chargeback/dispute annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// Idempotency key toward an external provider, when present.
    pub external_reference: Option<String>,
    /// Sending side; `None` for purely inbound external movements.
    pub sender: Option<Party>,
    /// Receiving side; `None` for purely outbound external movements.
    pub receiver: Option<Party>,
    /// Principal amount. Immutable after creation.
    pub amount: Money,
    /// Fee charged to the payer of record; absent for internal adjustments.
    pub fee: Option<Fee>,
    /// Kind of value movement.
    pub kind: TransactionKind,
    /// Closed sub-classification.
    pub category: TransactionCategory,
    /// Current lifecycle status.
    pub status: TransactionStatus,
    /// Timing metrics.
    pub timing: TransactionTiming,
    /// Bounded metadata.
    pub metadata: TransactionMetadata,
}

impl Transaction {
    /// Create a new transaction in the given initial status.
    ///
    /// Only `Pending` and `PendingVerification` are legal entry states.
    pub fn new(
        kind: TransactionKind,
        category: TransactionCategory,
        sender: Option<Party>,
        receiver: Option<Party>,
        amount: Money,
        initial_status: TransactionStatus,
    ) -> Self {
        debug_assert!(matches!(
            initial_status,
            TransactionStatus::Pending | TransactionStatus::PendingVerification
        ));

        let mut timing = TransactionTiming::new();
        if initial_status == TransactionStatus::PendingVerification {
            timing.processed_at = Some(timing.created_at);
        }

        Self {
            id: TransactionId::new(),
            external_reference: None,
            sender,
            receiver,
            amount,
            fee: None,
            kind,
            category,
            status: initial_status,
            timing,
            metadata: TransactionMetadata::default(),
        }
    }

    /// Attach an external reference.
    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    /// Attach a fee.
    pub fn with_fee(mut self, fee: Fee) -> Self {
        self.fee = Some(fee);
        self
    }

    /// Transition to a new status, updating timestamps.
    ///
    /// All status writes go through here; timestamps are set only on their
    /// first qualifying transition.
    pub fn transition_to(
        &mut self,
        new_status: TransactionStatus,
    ) -> std::result::Result<(), InvalidTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        self.status = new_status;

        let now = Utc::now();
        match new_status {
            TransactionStatus::Processing | TransactionStatus::PendingVerification => {
                if self.timing.processed_at.is_none() {
                    self.timing.processed_at = Some(now);
                }
            }
            TransactionStatus::Completed | TransactionStatus::Failed => {
                if self.timing.completed_at.is_none() {
                    self.timing.completed_at = Some(now);
                }
            }
            TransactionStatus::Cancelled => {
                if self.timing.cancelled_at.is_none() {
                    self.timing.cancelled_at = Some(now);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Mark the transaction failed with a reason.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
    ) -> std::result::Result<(), InvalidTransition> {
        self.transition_to(TransactionStatus::Failed)?;
        self.metadata.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Total amount the payer of record is charged (principal plus fee).
    pub fn charged_amount(&self) -> Money {
        match &self.fee {
            Some(fee) if fee.amount.currency == self.amount.currency => Money::new(
                self.amount.value + fee.amount.value,
                self.amount.currency.clone(),
            ),
            _ => self.amount.clone(),
        }
    }

    /// Amount credited to the receiver after the fee is netted out.
    pub fn net_amount(&self) -> Money {
        match &self.fee {
            Some(fee) if fee.amount.currency == self.amount.currency => Money::new(
                self.amount.value - fee.amount.value,
                self.amount.currency.clone(),
            ),
            _ => self.amount.clone(),
        }
    }
}

/// Error when attempting an invalid state transition.
#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid state transition from {:?} to {:?}",
            self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}

impl From<InvalidTransition> for crate::CustodiaError {
    fn from(t: InvalidTransition) -> Self {
        crate::CustodiaError::InvalidTransition {
            from: t.from,
            to: t.to,
        }
    }
}
