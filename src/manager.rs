//! Threshold manager.
//!
//! Promotes a swap from UNSIGNED to SIGNED once enough distinct signers have
//! attested. The promotion is a compare-and-swap on status: when two managers
//! observe the threshold simultaneously, exactly one commits the transition.

use eyre::Result;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::db::{self, SwapStatus};
use crate::metrics;

pub struct ThresholdManager {
    db: PgPool,
    threshold: i64,
    poll_interval: Duration,
}

impl ThresholdManager {
    pub fn new(db: PgPool, threshold: i64, poll_interval: Duration) -> Self {
        Self {
            db,
            threshold,
            poll_interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(threshold = self.threshold, "Threshold manager starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.promote_ready().await {
                error!(error = %e, "Threshold scan failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Threshold manager stopped");
        Ok(())
    }

    async fn promote_ready(&self) -> Result<()> {
        let swaps = db::get_swaps_by_status(&self.db, SwapStatus::Unsigned).await?;

        for swap in swaps {
            let count = match db::count_signatures(&self.db, swap.id).await {
                Ok(count) => count,
                Err(e) => {
                    error!(swap_id = swap.id, error = %e, "Signature count failed");
                    continue;
                }
            };

            if count < self.threshold {
                continue;
            }

            match db::update_swap_status(&self.db, swap.id, SwapStatus::Unsigned, SwapStatus::Signed)
                .await
            {
                Ok(true) => {
                    info!(
                        swap_id = swap.id,
                        signatures = count,
                        threshold = self.threshold,
                        "Swap fully signed"
                    );
                    metrics::SWAPS_SIGNED
                        .with_label_values(&[swap.destination_network.as_str()])
                        .inc();
                }
                Ok(false) => {
                    // Raced with another manager or a failing signer.
                    debug!(swap_id = swap.id, "Promotion lost a status race");
                }
                Err(e) => {
                    error!(swap_id = swap.id, error = %e, "Promotion failed");
                }
            }
        }

        Ok(())
    }
}
