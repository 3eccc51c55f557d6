//! EVM event source.
//!
//! Handlers register for event names at a confirmation depth; the run loop
//! keeps one persisted block cursor per registration and dispatches each
//! decoded log to the handlers registered for that event name, exactly once
//! per log. A head-query failure or a block the node has not served yet keeps
//! the cursor where it is and retries after the poll interval.

use async_trait::async_trait;
use eyre::Result;
use sqlx::PgPool;
use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::db::{self, InsertOutcome, NewSwap};
use crate::eth::events::{decode_log, DepositEvent, WalletEvent};
use crate::eth::EthClient;
use crate::metrics;
use crate::pairing::{select_adapter, ChainAdapter, NETWORK_ETH, NETWORK_SCRT};
use crate::scrt::tx::build_mint_tx;

/// Blocks fetched per iteration, keeping log queries bounded.
const MAX_BATCH_BLOCKS: u64 = 1000;

/// A consumer of decoded wallet events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event. An error aborts the current batch without
    /// advancing the cursor, so the event is re-delivered next iteration;
    /// handlers must therefore be idempotent.
    async fn handle(&self, event: &WalletEvent) -> Result<()>;
}

struct Registration {
    handler: Arc<dyn EventHandler>,
    event_names: Vec<String>,
    confirmations: u64,
    tracker_key: String,
}

/// Confirmation-gated event source over the wallet contract.
pub struct EventSource {
    client: Arc<EthClient>,
    db: PgPool,
    registrations: Vec<Registration>,
    start_block: u64,
    poll_interval: Duration,
}

impl EventSource {
    pub fn new(client: Arc<EthClient>, db: PgPool, start_block: u64, poll_interval: Duration) -> Self {
        Self {
            client,
            db,
            registrations: Vec::new(),
            start_block,
            poll_interval,
        }
    }

    /// Register a handler for a set of event names at a confirmation depth.
    /// Each registration owns its block cursor, keyed by contract and the
    /// first event name.
    pub fn register(
        &mut self,
        handler: Arc<dyn EventHandler>,
        event_names: &[&str],
        confirmations: u64,
    ) {
        let tracker_key = cursor_key(self.client.contract_address, event_names);
        self.registrations.push(Registration {
            handler,
            event_names: event_names.iter().map(|n| n.to_string()).collect(),
            confirmations,
            tracker_key,
        });
    }

    /// Main loop: advance every registration toward `head - confirmations`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            contract = %self.client.contract_address,
            registrations = self.registrations.len(),
            "Event source starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.client.block_number().await {
                Ok(head) => {
                    metrics::CHAIN_HEAD
                        .with_label_values(&[NETWORK_ETH])
                        .set(head as f64);
                    for registration in &self.registrations {
                        if let Err(e) = self.advance(registration, head).await {
                            // Cursor untouched; the same range is retried
                            // next iteration.
                            error!(
                                tracker = %registration.tracker_key,
                                error = %e,
                                "Event batch failed, will retry"
                            );
                            metrics::ERRORS
                                .with_label_values(&[NETWORK_ETH, "event_batch"])
                                .inc();
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Chain head query failed, retrying after sleep");
                    metrics::ERRORS
                        .with_label_values(&[NETWORK_ETH, "head_query"])
                        .inc();
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Event source stopped");
        Ok(())
    }

    async fn advance(&self, registration: &Registration, head: u64) -> Result<()> {
        let safe_head = head.saturating_sub(registration.confirmations);
        let cursor = db::last_processed(&self.db, &registration.tracker_key).await?;

        let from_block = if cursor < 0 {
            self.start_block
        } else {
            cursor as u64 + 1
        };
        if from_block > safe_head {
            return Ok(());
        }
        let to_block = cmp::min(safe_head, from_block + MAX_BATCH_BLOCKS - 1);

        // The node may lag its own reported head; an absent block is "not yet
        // available", never an error.
        if !self.client.block_available(to_block).await? {
            debug!(
                block = to_block,
                "Block not yet available from node, waiting"
            );
            return Ok(());
        }

        let events = self.fetch_events(from_block, to_block).await?;
        for event in &events {
            if !registration.event_names.iter().any(|n| n == event.name()) {
                continue;
            }
            registration.handler.handle(event).await?;
        }

        db::update_last_processed(&self.db, &registration.tracker_key, to_block as i64).await?;
        metrics::CURSOR_HEIGHT
            .with_label_values(&[registration.tracker_key.as_str()])
            .set(to_block as f64);

        Ok(())
    }

    /// Restartable range scan for one event name. Callers persist their own
    /// cursor and re-invoke with an updated start after a crash.
    pub async fn events_in_range(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<WalletEvent>> {
        let events = self.fetch_events(from_block, to_block).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.name() == event_name)
            .collect())
    }

    /// All tracked wallet events in an inclusive range, chunked to keep each
    /// log query bounded. Undecodable logs under a tracked topic are logged
    /// and skipped; they cannot be attributed to any swap.
    async fn fetch_events(&self, from_block: u64, to_block: u64) -> Result<Vec<WalletEvent>> {
        let mut events = Vec::new();
        let mut current = from_block;

        while current <= to_block {
            let chunk_end = cmp::min(current + MAX_BATCH_BLOCKS - 1, to_block);
            let logs = self.client.contract_logs(current, chunk_end).await?;

            for log in logs {
                match decode_log(&log) {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(e) => {
                        error!(
                            tx_hash = ?log.transaction_hash,
                            error = %e,
                            "Undecodable wallet contract log, skipping"
                        );
                        metrics::ERRORS
                            .with_label_values(&[NETWORK_ETH, "decode"])
                            .inc();
                    }
                }
            }
            current = chunk_end + 1;
        }

        Ok(events)
    }
}

/// Block-cursor tracker key for a registration. The `eth-block:` namespace
/// never mixes with the application-nonce namespaces.
fn cursor_key(contract: alloy::primitives::Address, event_names: &[&str]) -> String {
    format!(
        "eth-block:{:?}:{}",
        contract,
        event_names
            .first()
            .map(|n| n.to_lowercase())
            .unwrap_or_default()
    )
}

/// Creates UNSIGNED swaps from confirmed deposit events.
pub struct DepositHandler {
    db: PgPool,
    adapters: Arc<Vec<Box<dyn ChainAdapter>>>,
    multisig_address: String,
}

impl DepositHandler {
    pub fn new(db: PgPool, adapters: Arc<Vec<Box<dyn ChainAdapter>>>, multisig_address: String) -> Self {
        Self {
            db,
            adapters,
            multisig_address,
        }
    }

    async fn create_swap(&self, deposit: &DepositEvent) -> Result<()> {
        // Re-delivered events must not burn a destination sequence number.
        if db::get_swap_by_source_tx_hash(&self.db, &deposit.tx_hash)
            .await?
            .is_some()
        {
            debug!(tx_hash = %deposit.tx_hash, "Swap already recorded");
            return Ok(());
        }

        let Some(adapter) = select_adapter(&self.adapters, deposit) else {
            debug!(
                event = deposit.event_name,
                token = ?deposit.token,
                "Deposit for untracked token, ignoring"
            );
            return Ok(());
        };
        let pairing = adapter.pairing();

        // A malformed destination or amount still produces a swap record; the
        // signer's validation fails it terminally instead of losing it.
        let destination = adapter
            .extract_destination(deposit)
            .unwrap_or_else(|_| String::from_utf8_lossy(&deposit.recipient).into_owned());
        let amount = adapter
            .extract_amount(deposit)
            .unwrap_or_else(|_| deposit.amount.clone());

        let sequence = db::allocate_sequence(&self.db, &format!("seq:{}", NETWORK_SCRT)).await?;

        let unsigned_tx = build_mint_tx(
            &self.multisig_address,
            &pairing.scrt_address,
            &destination,
            &amount,
            &deposit.tx_hash,
        );

        let swap = NewSwap {
            source_tx_hash: deposit.tx_hash.clone(),
            source_network: NETWORK_ETH.to_string(),
            source_coin: pairing.eth_address.clone(),
            source_nonce: deposit.nonce,
            destination_network: NETWORK_SCRT.to_string(),
            destination_coin: pairing.scrt_address.clone(),
            destination_address: destination,
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
                    amount = %swap.amount,
                    sequence,
                    "New swap recorded"
                );
                metrics::SWAPS_CREATED
                    .with_label_values(&[NETWORK_ETH])
                    .inc();
            }
            InsertOutcome::Duplicate => {
                // Lost a race with another creator; the allocated sequence
                // leaks a gap that the leader's resync path repairs.
                debug!(tx_hash = %swap.source_tx_hash, "Swap created concurrently elsewhere");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for DepositHandler {
    async fn handle(&self, event: &WalletEvent) -> Result<()> {
        match event {
            WalletEvent::Deposit(deposit) => self.create_swap(deposit).await,
            WalletEvent::Withdrawal(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use crate::eth::events::{EVENT_SWAP, EVENT_SWAP_TOKEN, EVENT_WITHDRAW};

    #[test]
    fn registrations_get_distinct_block_cursors() {
        let contract = Address::repeat_byte(0x11);
        let deposits = cursor_key(contract, &[EVENT_SWAP, EVENT_SWAP_TOKEN]);
        let withdrawals = cursor_key(contract, &[EVENT_WITHDRAW]);

        assert!(deposits.starts_with("eth-block:"));
        assert!(withdrawals.starts_with("eth-block:"));
        assert_ne!(deposits, withdrawals);

        // Same registration after a restart resolves to the same cursor
        assert_eq!(deposits, cursor_key(contract, &[EVENT_SWAP, EVENT_SWAP_TOKEN]));
    }
}
