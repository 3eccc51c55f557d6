//! Return-leg confirmer.
//!
//! Consumes confirmation-gated `Withdraw`/`WithdrawFailure` events from the
//! wallet contract, resolves the submission id to its (burn nonce, token)
//! through the contract's lookup, and finalizes the matching swap. Only a
//! swap still in SUBMITTED moves; a re-delivered event finds it finalized
//! and does nothing.

use async_trait::async_trait;
use eyre::Result;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::{self, SwapStatus};
use crate::eth::events::{WalletEvent, WithdrawalEvent};
use crate::eth::EthClient;
use crate::metrics;
use crate::pairing::NETWORK_ETH;
use crate::watchers::EventHandler;

pub struct WithdrawConfirmer {
    db: PgPool,
    eth: Arc<EthClient>,
}

impl WithdrawConfirmer {
    pub fn new(db: PgPool, eth: Arc<EthClient>) -> Self {
        Self { db, eth }
    }

    async fn finalize(&self, event: &WithdrawalEvent) -> Result<()> {
        let (nonce, token) = self.eth.get_submission(event.transaction_id).await?;
        let token = format!("{:?}", token);

        let Some(swap) = db::find_swap_by_nonce_and_coin(&self.db, nonce, &token).await? else {
            // Another operator instance may own this token pair.
            warn!(
                transaction_id = event.transaction_id,
                nonce,
                token = %token,
                "Withdraw event matches no swap"
            );
            return Ok(());
        };

        if swap.status() != Some(SwapStatus::Submitted) {
            debug!(
                swap_id = swap.id,
                status = %swap.status,
                "Swap already finalized, ignoring re-delivered event"
            );
            return Ok(());
        }

        let to = if event.success {
            SwapStatus::Confirmed
        } else {
            SwapStatus::Failed
        };

        if db::update_swap_status(&self.db, swap.id, SwapStatus::Submitted, to).await? {
            info!(
                swap_id = swap.id,
                nonce,
                token = %token,
                outcome = %to,
                confirm_tx = %event.tx_hash,
                "Withdrawal finalized"
            );
            match to {
                SwapStatus::Confirmed => metrics::SWAPS_CONFIRMED
                    .with_label_values(&[NETWORK_ETH])
                    .inc(),
                _ => metrics::SWAPS_FAILED
                    .with_label_values(&[NETWORK_ETH, "execution"])
                    .inc(),
            }
            db::update_last_processed(&self.db, &format!("withdraw-nonce:{}", token), nonce)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for WithdrawConfirmer {
    async fn handle(&self, event: &WalletEvent) -> Result<()> {
        match event {
            WalletEvent::Withdrawal(withdrawal) => self.finalize(withdrawal).await,
            WalletEvent::Deposit(_) => Ok(()),
        }
    }
}
