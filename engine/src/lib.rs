//! Custodia Transaction Engine
//!
//! Orchestrates the lifecycle of every value movement: creates transaction
//! records, attaches fees, drives the wallet ledger, and walks each record
//! through its status state machine. Settlement confirmations arrive through
//! an explicit provider-callback entry point; stale in-flight cash-outs are
//! reconciled by a background sweep.

pub mod config;
pub mod engine;
pub mod notify;
pub mod provider;
pub mod sweep;

pub use config::EngineConfig;
pub use engine::{
    CashInRequest, CashOutRequest, CreateTransaction, TransactionEngine, TransactionView,
    TransferRequest, CASH_OUT_OTC_PURPOSE,
};
pub use notify::{LogNotifier, Notification, Notifier};
pub use provider::{ProviderCallback, ProviderError, ProviderSession, SettlementProvider};

#[cfg(any(test, feature = "test-utils"))]
pub use notify::RecordingNotifier;
#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockSettlementProvider;
