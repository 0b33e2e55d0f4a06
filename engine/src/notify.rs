//! Fire-and-forget notification dispatch.

use async_trait::async_trait;
use custodia_common::{AccountId, Money, Transaction, TransactionId, TransactionStatus};
use tracing::info;

/// Notification about a resolved transaction, handed to the delivery
/// collaborator (email/SMS/push live outside the core).
#[derive(Debug, Clone)]
pub struct Notification {
    /// The transaction that resolved.
    pub transaction_id: TransactionId,
    /// Its status at dispatch time.
    pub status: TransactionStatus,
    /// Principal amount.
    pub amount: Money,
    /// The account holder to inform, when one is known.
    pub account_id: Option<AccountId>,
}

impl Notification {
    /// Build a notification for a transaction, addressed to the affected
    /// internal party (sender first, then receiver).
    pub fn for_transaction(tx: &Transaction) -> Self {
        let account_id = tx
            .sender
            .as_ref()
            .and_then(|p| p.account_id.clone())
            .or_else(|| tx.receiver.as_ref().and_then(|p| p.account_id.clone()));

        Self {
            transaction_id: tx.id,
            status: tx.status,
            amount: tx.amount.clone(),
            account_id,
        }
    }
}

/// Notification dispatch seam. Delivery failures are reported back as plain
/// strings; the engine logs them and never unwinds a ledger mutation.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Dispatch a notification.
    async fn notify(&self, notification: Notification) -> Result<(), String>;
}

/// Notifier that only logs. Default for deployments where delivery is wired
/// up outside the core.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), String> {
        info!(
            transaction_id = %notification.transaction_id,
            status = ?notification.status,
            amount = %notification.amount,
            "Transaction resolved"
        );
        Ok(())
    }
}

/// Notifier that records everything it is asked to send.
#[cfg(any(test, feature = "test-utils"))]
pub struct RecordingNotifier {
    sent: parking_lot::Mutex<Vec<Notification>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingNotifier {
    /// Create a new recording notifier.
    pub fn new() -> Self {
        Self {
            sent: parking_lot::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make subsequent dispatches fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Everything dispatched so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), String> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err("delivery channel down".to_string());
        }
        self.sent.lock().push(notification);
        Ok(())
    }
}
