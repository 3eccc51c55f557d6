//! Leader broadcast stage.
//!
//! Assembles the multisig transaction for every fully-signed swap and
//! broadcasts it, strictly in ascending sequence order per destination
//! network. When one broadcast fails, every later signed swap of the same
//! destination is demoted to RETRY instead of being attempted: their
//! embedded sequence numbers depend on the failed one and are stale.
//!
//! The leader also owns the RETRY requeue: purge signatures, allocate a
//! strictly greater sequence, rebuild the payload, demote back to UNSIGNED.

use eyre::Result;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub mod eth;
pub mod retry;
pub mod scrt;

pub use eth::EthWriter;
pub use retry::{classify_error, ErrorClass, RetryConfig};
pub use scrt::ScrtWriter;

use crate::db::{self, Swap, SwapStatus};
use crate::eth::withdrawal::build_withdraw_payload;
use crate::metrics;
use crate::pairing::NETWORK_SCRT;
use crate::scrt::tx::build_mint_tx;

/// Circuit breaker configuration for the leader loop
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before pausing
    pub threshold: u32,
    /// How long to pause when the circuit breaker trips
    pub pause_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            pause_duration: Duration::from_secs(300),
        }
    }
}

/// Per-swap broadcast outcome. Infrastructure trouble (store or RPC
/// unreachable) is an `Err` from the writer instead and leaves every swap
/// untouched for the next cycle.
#[derive(Debug)]
pub enum Outcome {
    Done,
    /// Recoverable ordering problem: requeue this swap with a fresh sequence
    Requeue(String),
    /// Broadcast was rejected outright: the swap is failed terminally
    Fatal(String),
}

/// Map a broadcast-stage error onto the swap's fate: stale-sequence problems
/// get a fresh sequence, infrastructure trouble bubbles up and retries with
/// the swap untouched, everything else is a terminal broadcast failure.
pub(crate) fn disposition(stage: &str, error: &str) -> Result<Outcome> {
    match classify_error(error) {
        ErrorClass::Transient => Err(eyre::eyre!("{} failed transiently: {}", stage, error)),
        ErrorClass::SequenceMismatch => Ok(Outcome::Requeue(format!("{}: {}", stage, error))),
        ErrorClass::Permanent | ErrorClass::Unknown => {
            Ok(Outcome::Fatal(format!("{}: {}", stage, error)))
        }
    }
}

/// Demote every later SIGNED swap of the batch: their sequences are stale.
pub(crate) async fn mark_later_swaps_retry(db: &PgPool, later: &[Swap]) -> Result<()> {
    for swap in later {
        if db::update_swap_status(db, swap.id, SwapStatus::Signed, SwapStatus::Retry).await? {
            warn!(
                swap_id = swap.id,
                sequence = swap.sequence,
                "Swap demoted to retry: an earlier sequence failed to broadcast"
            );
            metrics::SWAPS_RETRIED
                .with_label_values(&[swap.destination_network.as_str()])
                .inc();
        }
    }
    Ok(())
}

pub struct Leader {
    db: PgPool,
    scrt_writer: ScrtWriter,
    eth_writer: EthWriter,
    multisig_address: String,
    retry_config: RetryConfig,
    circuit_breaker: CircuitBreakerConfig,
    consecutive_scrt_failures: u32,
    consecutive_eth_failures: u32,
    poll_interval: Duration,
}

impl Leader {
    pub fn new(
        db: PgPool,
        scrt_writer: ScrtWriter,
        eth_writer: EthWriter,
        multisig_address: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            db,
            scrt_writer,
            eth_writer,
            multisig_address,
            retry_config: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            consecutive_scrt_failures: 0,
            consecutive_eth_failures: 0,
            poll_interval,
        }
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Leader starting broadcast loop"
        );
        let mut cycle_count = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }
            cycle_count += 1;

            if cycle_count % 12 == 1 {
                info!(
                    cycle = cycle_count,
                    scrt_failures = self.consecutive_scrt_failures,
                    eth_failures = self.consecutive_eth_failures,
                    "Leader heartbeat"
                );
            }

            self.process_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Leader stopped");
        Ok(())
    }

    async fn process_cycle(&mut self) {
        // Requeue first so freshly demoted swaps re-enter the signing
        // pipeline without waiting an extra cycle.
        if let Err(e) = self.requeue_retries().await {
            error!(error = %e, "Retry requeue failed");
        }

        // Check the circuit breaker for the privacy-chain leg
        if self.consecutive_scrt_failures >= self.circuit_breaker.threshold {
            warn!(
                failures = self.consecutive_scrt_failures,
                pause_secs = self.circuit_breaker.pause_duration.as_secs(),
                "Privacy-chain circuit breaker tripped, pausing"
            );
            tokio::time::sleep(self.circuit_breaker.pause_duration).await;
            self.consecutive_scrt_failures = 0;
        }

        match self.scrt_writer.process_signed().await {
            Ok(()) => {
                self.consecutive_scrt_failures = 0;
            }
            Err(e) => {
                self.consecutive_scrt_failures += 1;
                let error_class = classify_error(&e.to_string());
                let backoff = self
                    .retry_config
                    .backoff_for_attempt(self.consecutive_scrt_failures);
                error!(
                    error = %e,
                    ?error_class,
                    consecutive_failures = self.consecutive_scrt_failures,
                    next_backoff_secs = backoff.as_secs(),
                    "Privacy-chain broadcast cycle failed, will retry with backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        if self.consecutive_eth_failures >= self.circuit_breaker.threshold {
            warn!(
                failures = self.consecutive_eth_failures,
                pause_secs = self.circuit_breaker.pause_duration.as_secs(),
                "EVM circuit breaker tripped, pausing"
            );
            tokio::time::sleep(self.circuit_breaker.pause_duration).await;
            self.consecutive_eth_failures = 0;
        }

        match self.eth_writer.process_signed().await {
            Ok(()) => {
                self.consecutive_eth_failures = 0;
            }
            Err(e) => {
                self.consecutive_eth_failures += 1;
                let error_class = classify_error(&e.to_string());
                let backoff = self
                    .retry_config
                    .backoff_for_attempt(self.consecutive_eth_failures);
                error!(
                    error = %e,
                    ?error_class,
                    consecutive_failures = self.consecutive_eth_failures,
                    next_backoff_secs = backoff.as_secs(),
                    "EVM broadcast cycle failed, will retry with backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }

    /// RETRY -> UNSIGNED: purge stale signatures, allocate a strictly
    /// greater sequence, rebuild the payload around it.
    async fn requeue_retries(&self) -> Result<()> {
        let swaps = db::get_swaps_by_status(&self.db, SwapStatus::Retry).await?;

        for swap in swaps {
            let purged = db::delete_signatures(&self.db, swap.id).await?;

            let seq_key = format!("seq:{}", swap.destination_network);
            let new_sequence =
                db::allocate_sequence_at_least(&self.db, &seq_key, swap.sequence + 1).await?;

            let unsigned_tx = if swap.destination_network == NETWORK_SCRT {
                build_mint_tx(
                    &self.multisig_address,
                    &swap.destination_coin,
                    &swap.destination_address,
                    &swap.amount,
                    &swap.source_tx_hash,
                )
            } else {
                build_withdraw_payload(
                    &swap.destination_coin,
                    &swap.destination_address,
                    &swap.amount,
                    swap.source_nonce,
                )
            };

            if db::requeue_swap(&self.db, swap.id, new_sequence, &unsigned_tx).await? {
                info!(
                    swap_id = swap.id,
                    old_sequence = swap.sequence,
                    new_sequence,
                    purged_signatures = purged,
                    "Swap requeued for re-signing"
                );
            } else {
                debug!(swap_id = swap.id, "Requeue lost a status race");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_mismatch_requeues_and_rejections_fail() {
        assert!(matches!(
            disposition("broadcast", "account sequence mismatch, expected 4"),
            Ok(Outcome::Requeue(_))
        ));
        assert!(matches!(
            disposition("multisign", "signature verification failed"),
            Ok(Outcome::Fatal(_))
        ));
        assert!(matches!(
            disposition("broadcast", "insufficient fee"),
            Ok(Outcome::Fatal(_))
        ));
    }

    #[test]
    fn transient_trouble_leaves_the_swap_untouched() {
        assert!(disposition("broadcast", "connection refused by node").is_err());
        assert!(disposition("multisign", "rpc timeout").is_err());
    }
}
