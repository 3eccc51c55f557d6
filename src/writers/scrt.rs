//! Privacy-chain writer: multisig assembly and broadcast for mint swaps.

use eyre::Result;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use super::{disposition, mark_later_swaps_retry, Outcome};
use crate::db::{self, Swap, SwapStatus};
use crate::metrics;
use crate::pairing::NETWORK_SCRT;
use crate::scrt::cli::ScrtCli;

pub struct ScrtWriter {
    db: PgPool,
    cli: ScrtCli,
    multisig_name: String,
    multisig_address: String,
    account_number: u64,
    threshold: i64,
}

impl ScrtWriter {
    pub fn new(
        db: PgPool,
        cli: ScrtCli,
        multisig_name: String,
        multisig_address: String,
        account_number: u64,
        threshold: i64,
    ) -> Self {
        Self {
            db,
            cli,
            multisig_name,
            multisig_address,
            account_number,
            threshold,
        }
    }

    /// Broadcast every SIGNED mint swap in ascending sequence order. Stops
    /// the batch at the first failure and demotes the rest: their sequences
    /// depend on the failed one.
    pub async fn process_signed(&self) -> Result<()> {
        let swaps =
            db::get_swaps_by_status_for_destination(&self.db, SwapStatus::Signed, NETWORK_SCRT)
                .await?;

        for (index, swap) in swaps.iter().enumerate() {
            match self.broadcast_one(swap).await? {
                Outcome::Done => {}
                Outcome::Requeue(reason) => {
                    warn!(
                        swap_id = swap.id,
                        sequence = swap.sequence,
                        reason,
                        "Broadcast requeued"
                    );
                    if db::update_swap_status(&self.db, swap.id, SwapStatus::Signed, SwapStatus::Retry)
                        .await?
                    {
                        metrics::SWAPS_RETRIED
                            .with_label_values(&[NETWORK_SCRT])
                            .inc();
                    }
                    self.resync_sequence().await;
                    mark_later_swaps_retry(&self.db, &swaps[index + 1..]).await?;
                    return Ok(());
                }
                Outcome::Fatal(reason) => {
                    error!(
                        swap_id = swap.id,
                        source_tx_hash = %swap.source_tx_hash,
                        sequence = swap.sequence,
                        reason,
                        "Broadcast failed terminally"
                    );
                    db::update_swap_status(&self.db, swap.id, SwapStatus::Signed, SwapStatus::Failed)
                        .await?;
                    metrics::SWAPS_FAILED
                        .with_label_values(&[NETWORK_SCRT, "broadcast"])
                        .inc();
                    mark_later_swaps_retry(&self.db, &swaps[index + 1..]).await?;
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn broadcast_one(&self, swap: &Swap) -> Result<Outcome> {
        let signatures = db::get_signatures(&self.db, swap.id).await?;
        if (signatures.len() as i64) < self.threshold {
            // Signatures were purged under us (concurrent requeue) or the
            // promotion raced; collect again against a fresh sequence.
            return Ok(Outcome::Requeue(format!(
                "insufficient signatures: {} of {}",
                signatures.len(),
                self.threshold
            )));
        }

        let blobs: Vec<String> = signatures.into_iter().map(|s| s.signed_tx).collect();

        let signed_tx = match self
            .cli
            .multisign(
                &swap.unsigned_tx,
                &self.multisig_name,
                self.account_number,
                swap.sequence,
                &blobs,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) => return disposition("multisign", &e.to_string()),
        };

        let response = match self.cli.broadcast(&signed_tx).await {
            Ok(response) => response,
            Err(e) => return disposition("broadcast", &e.to_string()),
        };

        if response.code != 0 {
            return disposition("broadcast", &response.raw_log);
        }

        if db::mark_swap_submitted(&self.db, swap.id, &response.txhash).await? {
            info!(
                swap_id = swap.id,
                sequence = swap.sequence,
                tx_hash = %response.txhash,
                "Mint broadcast submitted"
            );
            metrics::BROADCASTS
                .with_label_values(&[NETWORK_SCRT, "ok"])
                .inc();
        } else {
            debug!(swap_id = swap.id, "Submission lost a status race");
        }

        Ok(Outcome::Done)
    }

    /// Realign the sequence allocator with the chain after a rejection that
    /// indicates desync. Best effort: the next failure retries it.
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

