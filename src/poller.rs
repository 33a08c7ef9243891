// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Confirmation Poller
//!
//! Background task that settles broadcast withdrawals from their on-chain
//! receipts, so a `PENDING` withdrawal resolves even when no gateway
//! transfer event ever arrives.
//!
//! Every `poll_interval` the poller lists pending withdrawals that carry a
//! transaction hash and asks the chain for a receipt. A successful receipt
//! completes the entry; a reverted one fails it and credits the amount
//! back. Transactions without a receipt are left for the next sweep.
//!
//! Settlement goes through [`SettlementEngine::reconcile_withdrawal`], so a
//! webhook racing the poller cannot apply the same outcome twice.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::TxKind;
use crate::settlement::{SettlementEngine, TransferOutcome};

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub confirmed: usize,
    pub failed: usize,
    pub still_pending: usize,
}

pub struct ConfirmationPoller {
    engine: SettlementEngine,
    poll_interval: Duration,
}

impl ConfirmationPoller {
    pub fn new(engine: SettlementEngine, poll_interval: Duration) -> Self {
        Self {
            engine,
            poll_interval,
        }
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Confirmation poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Confirmation poller shutting down");
                return;
            }

            let summary = self.poll_once().await;
            if summary.confirmed + summary.failed > 0 {
                info!(
                    confirmed = summary.confirmed,
                    failed = summary.failed,
                    pending = summary.still_pending,
                    "Confirmation sweep settled withdrawals"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Confirmation poller shutting down");
                    return;
                }
            }
        }
    }

    /// One sweep over pending withdrawals.
    pub async fn poll_once(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        let pending = match self
            .engine
            .storage()
            .ledger
            .pending_with_reference(TxKind::Withdrawal)
        {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Confirmation poller: failed to list pending withdrawals");
                return summary;
            }
        };

        for record in pending {
            let (Some(chain), Some(tx_hash)) = (record.chain, record.reference.as_deref()) else {
                continue;
            };

            let receipt = match self.engine.chain().receipt(chain, tx_hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) => {
                    summary.still_pending += 1;
                    continue;
                }
                Err(e) => {
                    warn!(tx_hash = %tx_hash, chain = %chain, error = %e, "Confirmation poller: receipt lookup failed");
                    summary.still_pending += 1;
                    continue;
                }
            };

            let outcome = if receipt.success {
                TransferOutcome::Confirmed
            } else {
                TransferOutcome::Failed("transaction reverted".into())
            };
            let confirmed = receipt.success;

            match self.engine.reconcile_withdrawal(&record, outcome) {
                Ok(settled) if settled.was_applied() => {
                    debug!(
                        transaction_id = %record.id,
                        tx_hash = %tx_hash,
                        block = receipt.block_number,
                        success = confirmed,
                        "Withdrawal settled from receipt"
                    );
                    if confirmed {
                        summary.confirmed += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(transaction_id = %record.id, error = %e, "Confirmation poller: failed to settle withdrawal");
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chain, Currency, TxStatus};
    use crate::settlement::WithdrawalRequest;
    use crate::testing::Harness;
    use rust_decimal::dec;

    async fn withdraw(h: &Harness, amount: rust_decimal::Decimal) -> String {
        h.engine
            .withdraw(
                "u1",
                WithdrawalRequest {
                    currency: Currency::Usdc,
                    chain: Chain::Ethereum,
                    amount,
                    destination: "0x3333333333333333333333333333333333333333".into(),
                    two_factor_code: None,
                },
            )
            .await
            .unwrap()
            .tx_hash
    }

    fn poller(h: &Harness) -> ConfirmationPoller {
        ConfirmationPoller::new(h.engine.clone(), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn receipts_settle_pending_withdrawals() {
        let h = Harness::new();
        h.verified_user("u1").await;
        h.fund("u1", Currency::Usdc, dec!(100));

        let ok = withdraw(&h, dec!(30)).await;
        let reverted = withdraw(&h, dec!(20)).await;
        let _unmined = withdraw(&h, dec!(10)).await;
        assert_eq!(h.balance("u1", Currency::Usdc), dec!(40));

        h.chain.confirm(&ok, true);
        h.chain.confirm(&reverted, false);

        let summary = poller(&h).poll_once().await;
        assert_eq!(
            summary,
            SweepSummary {
                confirmed: 1,
                failed: 1,
                still_pending: 1,
            }
        );
        assert_eq!(h.balance("u1", Currency::Usdc), dec!(60));

        let ledger = &h.engine.storage().ledger;
        assert_eq!(
            ledger.find_by_reference(&ok).unwrap().unwrap().status,
            TxStatus::Completed
        );
        assert_eq!(
            ledger.find_by_reference(&reverted).unwrap().unwrap().status,
            TxStatus::Failed
        );

        // Settled entries drop out of the next sweep
        let summary = poller(&h).poll_once().await;
        assert_eq!(summary.confirmed + summary.failed, 0);
        assert_eq!(summary.still_pending, 1);
        assert_eq!(h.balance("u1", Currency::Usdc), dec!(60));
    }

    #[tokio::test]
    async fn poller_and_webhook_do_not_double_credit() {
        let h = Harness::new();
        h.verified_user("u1").await;
        h.fund("u1", Currency::Usdc, dec!(50));
        let hash = withdraw(&h, dec!(50)).await;

        h.engine
            .reconcile_transfer(&hash, TransferOutcome::Failed("reversed".into()))
            .unwrap();
        h.chain.confirm(&hash, false);

        let summary = poller(&h).poll_once().await;
        assert_eq!(summary, SweepSummary::default());
        assert_eq!(h.balance("u1", Currency::Usdc), dec!(50));
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let h = Harness::new();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(poller(&h).run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
