//! Reconciliation sweep for stale in-flight cash-outs.
//!
//! A `Processing` cash-out holds the sender's funds while the external
//! payout is in flight. If the provider never confirms, the hold must not
//! linger: the sweep reverses anything older than the configured timeout.
//! The webhook and the sweep are two independent triggers into the same
//! state machine, so whichever fires first wins and the other becomes a
//! no-op.

use custodia_common::{time, TransactionId, TransactionKind, TransactionStatus};
use tracing::{info, warn};

use crate::engine::TransactionEngine;

impl TransactionEngine {
    /// `Processing` cash-outs whose confirmation window has elapsed.
    /// Transactions already escalated to manual reconciliation are skipped.
    pub fn stale_processing_cash_outs(&self) -> Vec<TransactionId> {
        let cutoff = time::now() - self.config().cash_out_timeout;

        self.transactions
            .iter()
            .filter(|tx| {
                tx.status == TransactionStatus::Processing
                    && matches!(tx.kind, TransactionKind::CashOut | TransactionKind::Payment)
                    && !tx.metadata.requires_reconciliation
                    && tx
                        .timing
                        .processed_at
                        .map(|at| at <= cutoff)
                        .unwrap_or(false)
            })
            .map(|tx| tx.id)
            .collect()
    }

    /// Reverse every stale cash-out. Returns how many were reconciled.
    pub async fn reconcile_stale_cash_outs(&self) -> usize {
        let stale = self.stale_processing_cash_outs();
        let mut reconciled = 0;

        for id in stale {
            match self.settle_failure(id, "Provider confirmation timeout") {
                Ok(_) => {
                    reconciled += 1;
                    self.notify_resolution(id).await;
                }
                Err(e) => {
                    warn!(
                        transaction_id = %id,
                        error = %e,
                        "Sweep could not reconcile cash-out"
                    );
                }
            }
        }

        if reconciled > 0 {
            info!(reconciled, "Reconciliation sweep reversed stale cash-outs");
        }
        reconciled
    }

    /// Run the reconciliation sweep on its configured interval.
    pub async fn run_sweep_loop(&self) {
        loop {
            tokio::time::sleep(self.config().sweep_interval).await;
            self.reconcile_stale_cash_outs().await;
        }
    }
}
