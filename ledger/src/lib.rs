//! Custodia Wallet Ledger
//!
//! Per-account multi-currency balance state with available/pending/frozen
//! buckets, atomic bucket moves, spending limits, and a per-wallet journal.
//! Every mutation on a wallet is serialized behind that wallet's lock;
//! cross-wallet transfers take both locks in ascending wallet-id order.

pub mod balance;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod wallet;

pub use balance::{Bucket, BucketBalance};
pub use engine::WalletLedger;
pub use journal::{EntryKind, LedgerEntry};
pub use limits::{LimitDecision, SpendingLimits};
pub use wallet::{Wallet, WalletKind, WalletStatus};
