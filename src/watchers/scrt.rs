//! Privacy-chain burn watcher (return leg).
//!
//! Burns are discovered by nonce, not by block: each tracked token contract
//! assigns strictly increasing nonces to burns, so the watcher walks
//! `scrt-nonce:<token>` upward until the contract reports no record. Every
//! new burn becomes an UNSIGNED swap carrying the EVM withdrawal payload.

use eyre::Result;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::db::{self, InsertOutcome, NewSwap};
use crate::eth::withdrawal::build_withdraw_payload;
use crate::metrics;
use crate::pairing::{rescale_amount, TokenPairing, NETWORK_ETH, NETWORK_SCRT};
use crate::scrt::chain::{BurnRecord, ScrtQueryClient};

/// Burns ingested per token per iteration; bounds one poll cycle.
const MAX_BURNS_PER_CYCLE: usize = 50;

pub struct BurnWatcher {
    db: PgPool,
    query: Arc<ScrtQueryClient>,
    pairings: Vec<TokenPairing>,
    poll_interval: Duration,
}

impl BurnWatcher {
    pub fn new(
        db: PgPool,
        query: Arc<ScrtQueryClient>,
        pairings: Vec<TokenPairing>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            query,
            pairings,
            poll_interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(tokens = self.pairings.len(), "Burn watcher starting");
        let mut cycle_count = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }
            cycle_count += 1;

            for pairing in &self.pairings {
                if let Err(e) = self.process_token(pairing).await {
                    // Transient chain trouble: the nonce cursor is untouched,
                    // the same burn is retried next cycle.
                    error!(
                        token = %pairing.scrt_address,
                        error = %e,
                        "Burn scan failed, will retry"
                    );
                    metrics::ERRORS
                        .with_label_values(&[NETWORK_SCRT, "burn_scan"])
                        .inc();
                }
            }

            // Log every 12 cycles (~1 minute at default interval) to show the
            // watcher is alive.
            if cycle_count % 12 == 1 {
                match self.query.latest_height().await {
                    Ok(height) => {
                        metrics::CHAIN_HEAD
                            .with_label_values(&[NETWORK_SCRT])
                            .set(height as f64);
                        info!(cycle = cycle_count, height, "Burn watcher heartbeat");
                    }
                    Err(e) => debug!(error = %e, "Height query failed"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Burn watcher stopped");
        Ok(())
    }

    /// Walk this token's burn nonces upward from the persisted cursor.
    async fn process_token(&self, pairing: &TokenPairing) -> Result<()> {
        let tracker_key = format!("scrt-nonce:{}", pairing.scrt_address);

        for _ in 0..MAX_BURNS_PER_CYCLE {
            let next_nonce = db::last_processed(&self.db, &tracker_key).await? + 1;

            let Some(burn) = self.query.query_burn(&pairing.scrt_address, next_nonce).await? else {
                break;
            };

            self.create_swap(pairing, &burn).await?;
            db::update_last_processed(&self.db, &tracker_key, next_nonce).await?;
        }

        Ok(())
    }

    async fn create_swap(&self, pairing: &TokenPairing, burn: &BurnRecord) -> Result<()> {
        if db::get_swap_by_source_tx_hash(&self.db, &burn.tx_hash)
            .await?
            .is_some()
        {
            debug!(tx_hash = %burn.tx_hash, "Burn already recorded");
            return Ok(());
        }

        // An unparsable burn amount still yields a record; the signer's
        // validation will fail the swap instead of dropping the burn.
        let amount = rescale_amount(&burn.amount, pairing.scrt_decimals, pairing.eth_decimals)
            .unwrap_or_else(|_| burn.amount.clone());

        let sequence = db::allocate_sequence(&self.db, &format!("seq:{}", NETWORK_ETH)).await?;

        let unsigned_tx =
            build_withdraw_payload(&pairing.eth_address, &burn.destination, &amount, burn.nonce);

        let swap = NewSwap {
            source_tx_hash: burn.tx_hash.clone(),
            source_network: NETWORK_SCRT.to_string(),
            source_coin: pairing.scrt_address.clone(),
            source_nonce: burn.nonce,
            destination_network: NETWORK_ETH.to_string(),
            destination_coin: pairing.eth_address.clone(),
            destination_address: burn.destination.clone(),
            amount,
            sequence,
            unsigned_tx,
        };

        match db::insert_swap(&self.db, &swap).await? {
            InsertOutcome::Created(id) => {
                info!(
                    swap_id = id,
                    tx_hash = %swap.source_tx_hash,
                    coin = %pairing.name,
                    nonce = burn.nonce,
                    amount = %swap.amount,
                    sequence,
                    "New return-leg swap recorded"
                );
                metrics::SWAPS_CREATED
                    .with_label_values(&[NETWORK_SCRT])
                    .inc();
            }
            InsertOutcome::Duplicate => {
                debug!(tx_hash = %swap.source_tx_hash, "Swap created concurrently elsewhere");
            }
        }

        Ok(())
    }
}
