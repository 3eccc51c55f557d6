//! Finality tracking for SUBMITTED swaps.
//!
//! The privacy-chain leg polls the wallet CLI for the broadcast result; the
//! EVM leg is normally finalized by the withdraw-event confirmer and only
//! swept here once the cooldown expires. A tx that stays unindexed past the
//! cooldown is requeued; an explicit on-chain rejection is terminal and
//! forces a sequence resync, since it may indicate allocator desync.

use chrono::Utc;
use eyre::Result;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub mod withdraw;

pub use withdraw::WithdrawConfirmer;

use crate::db::{self, SwapStatus};
use crate::eth::EthClient;
use crate::metrics;
use crate::pairing::{NETWORK_ETH, NETWORK_SCRT};
use crate::scrt::cli::{ScrtCli, TxOutcome};

/// What to do with a SUBMITTED swap given its queried outcome and age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalityAction {
    Confirm,
    Fail,
    /// Still pending: leave the swap untouched and ask again later
    Wait,
    /// Gone from the chain's view past the cooldown: requeue
    Requeue,
}

/// Pure finality decision.
pub fn finality_action(outcome: &TxOutcome, age_secs: i64, cooldown_secs: i64) -> FinalityAction {
    match outcome {
        TxOutcome::Success { .. } => FinalityAction::Confirm,
        TxOutcome::Error { .. } => FinalityAction::Fail,
        TxOutcome::NotFound if age_secs < cooldown_secs => FinalityAction::Wait,
        TxOutcome::NotFound => FinalityAction::Requeue,
    }
}

pub struct ConfirmationTracker {
    db: PgPool,
    cli: ScrtCli,
    eth: Arc<EthClient>,
    multisig_address: String,
    cooldown_secs: i64,
    poll_interval: Duration,
}

impl ConfirmationTracker {
    pub fn new(
        db: PgPool,
        cli: ScrtCli,
        eth: Arc<EthClient>,
        multisig_address: String,
        cooldown_secs: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            cli,
            eth,
            multisig_address,
            cooldown_secs,
            poll_interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            cooldown_secs = self.cooldown_secs,
            "Confirmation tracker starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.check_scrt_submitted().await {
                error!(error = %e, "Privacy-chain finality scan failed");
            }
            if let Err(e) = self.sweep_stale_eth_submitted().await {
                error!(error = %e, "EVM stale-submission sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Confirmation tracker stopped");
        Ok(())
    }

    async fn check_scrt_submitted(&self) -> Result<()> {
        let swaps =
            db::get_swaps_by_status_for_destination(&self.db, SwapStatus::Submitted, NETWORK_SCRT)
                .await?;

        for swap in swaps {
            let Some(tx_hash) = swap.destination_tx_hash.clone() else {
                // Submitted without a hash cannot be resolved; requeue it.
                warn!(swap_id = swap.id, "Submitted swap has no tx hash, requeueing");
                db::update_swap_status(&self.db, swap.id, SwapStatus::Submitted, SwapStatus::Retry)
                    .await?;
                continue;
            };

            let outcome = match self.cli.query_tx(&tx_hash).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Wallet/node trouble is transient; the swap stays put.
                    warn!(swap_id = swap.id, error = %e, "Tx query failed, will retry");
                    continue;
                }
            };

            let age_secs = (Utc::now() - swap.updated_on).num_seconds();
            match finality_action(&outcome, age_secs, self.cooldown_secs) {
                FinalityAction::Confirm => {
                    if db::update_swap_status(
                        &self.db,
                        swap.id,
                        SwapStatus::Submitted,
                        SwapStatus::Confirmed,
                    )
                    .await?
                    {
                        info!(swap_id = swap.id, tx_hash = %tx_hash, "Swap confirmed");
                        metrics::SWAPS_CONFIRMED
                            .with_label_values(&[NETWORK_SCRT])
                            .inc();
                        db::update_last_processed(
                            &self.db,
                            &format!("confirmed-seq:{}", NETWORK_SCRT),
                            swap.sequence,
                        )
                        .await?;
                    }
                }
                FinalityAction::Fail => {
                    let raw_log = match &outcome {
                        TxOutcome::Error { raw_log, .. } => raw_log.clone(),
                        _ => String::new(),
                    };
                    if db::update_swap_status(
                        &self.db,
                        swap.id,
                        SwapStatus::Submitted,
                        SwapStatus::Failed,
                    )
                    .await?
                    {
                        error!(
                            swap_id = swap.id,
                            tx_hash = %tx_hash,
                            raw_log = %raw_log,
                            "Swap failed on-chain"
                        );
                        metrics::SWAPS_FAILED
                            .with_label_values(&[NETWORK_SCRT, "execution"])
                            .inc();
                    }
                    self.resync_sequence().await;
                }
                FinalityAction::Wait => {
                    debug!(swap_id = swap.id, age_secs, "Tx not indexed yet, waiting");
                }
                FinalityAction::Requeue => {
                    if db::update_swap_status(
                        &self.db,
                        swap.id,
                        SwapStatus::Submitted,
                        SwapStatus::Retry,
                    )
                    .await?
                    {
                        warn!(
                            swap_id = swap.id,
                            tx_hash = %tx_hash,
                            age_secs,
                            "Broadcast vanished past cooldown, requeueing"
                        );
                        metrics::SWAPS_RETRIED
                            .with_label_values(&[NETWORK_SCRT])
                            .inc();
                    }
                    self.resync_sequence().await;
                }
            }
        }

        Ok(())
    }

    /// EVM submissions are finalized by withdraw events; this sweep only
    /// rescues swaps whose submission never made it on-chain.
    async fn sweep_stale_eth_submitted(&self) -> Result<()> {
        let swaps =
            db::get_swaps_by_status_for_destination(&self.db, SwapStatus::Submitted, NETWORK_ETH)
                .await?;

        for swap in swaps {
            let age_secs = (Utc::now() - swap.updated_on).num_seconds();
            if age_secs < self.cooldown_secs {
                continue;
            }

            let Some(tx_hash) = swap.destination_tx_hash.clone() else {
                db::update_swap_status(&self.db, swap.id, SwapStatus::Submitted, SwapStatus::Retry)
                    .await?;
                continue;
            };

            match self.eth.receipt(&tx_hash).await {
                Ok(Some(receipt)) if receipt.status() => {
                    // Mined fine; the confirmer lags by the confirmation
                    // depth and will finalize from the withdraw event.
                    debug!(swap_id = swap.id, "Submission mined, awaiting confirmer");
                }
                Ok(Some(_)) => {
                    if db::update_swap_status(
                        &self.db,
                        swap.id,
                        SwapStatus::Submitted,
                        SwapStatus::Failed,
                    )
                    .await?
                    {
                        error!(swap_id = swap.id, tx_hash = %tx_hash, "Submission reverted");
                        metrics::SWAPS_FAILED
                            .with_label_values(&[NETWORK_ETH, "execution"])
                            .inc();
                    }
                }
                Ok(None) => {
                    if db::update_swap_status(
                        &self.db,
                        swap.id,
                        SwapStatus::Submitted,
                        SwapStatus::Retry,
                    )
                    .await?
                    {
                        warn!(
                            swap_id = swap.id,
                            tx_hash = %tx_hash,
                            age_secs,
                            "Submission vanished past cooldown, requeueing"
                        );
                        metrics::SWAPS_RETRIED
                            .with_label_values(&[NETWORK_ETH])
                            .inc();
                    }
                }
                Err(e) => {
                    warn!(swap_id = swap.id, error = %e, "Receipt query failed, will retry");
                }
            }
        }

        Ok(())
    }

    /// Realign the sequence allocator with authoritative chain state.
    async fn resync_sequence(&self) {
        match self.cli.account_info(&self.multisig_address).await {
            Ok(account) => {
                let baseline = account.sequence as i64 - 1;
                if let Err(e) =
                    db::force_set_tracker(&self.db, &format!("seq:{}", NETWORK_SCRT), baseline).await
                {
                    error!(error = %e, "Sequence tracker resync failed");
                } else {
                    info!(chain_sequence = account.sequence, "Sequence tracker resynced");
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot fetch account info for sequence resync");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success() -> TxOutcome {
        TxOutcome::Success {
            tx_hash: "AB".to_string(),
        }
    }

    fn rejection() -> TxOutcome {
        TxOutcome::Error {
            code: 11,
            raw_log: "out of gas".to_string(),
        }
    }

    #[test]
    fn success_confirms_regardless_of_age() {
        assert_eq!(finality_action(&success(), 0, 60), FinalityAction::Confirm);
        assert_eq!(
            finality_action(&success(), 10_000, 60),
            FinalityAction::Confirm
        );
    }

    #[test]
    fn explicit_rejection_fails_regardless_of_age() {
        assert_eq!(finality_action(&rejection(), 0, 60), FinalityAction::Fail);
        assert_eq!(
            finality_action(&rejection(), 10_000, 60),
            FinalityAction::Fail
        );
    }

    #[test]
    fn not_found_waits_inside_cooldown() {
        assert_eq!(
            finality_action(&TxOutcome::NotFound, 0, 60),
            FinalityAction::Wait
        );
        assert_eq!(
            finality_action(&TxOutcome::NotFound, 59, 60),
            FinalityAction::Wait
        );
    }

    #[test]
    fn not_found_requeues_after_cooldown() {
        assert_eq!(
            finality_action(&TxOutcome::NotFound, 60, 60),
            FinalityAction::Requeue
        );
        assert_eq!(
            finality_action(&TxOutcome::NotFound, 3600, 60),
            FinalityAction::Requeue
        );
    }
}
