//! Signer worker.
//!
//! Scans for swaps that still need this participant's signature, re-derives
//! the authoritative facts from the source chain, validates the stored
//! payload against them, and only then signs. `process` is idempotent: the
//! catch-up scan and the steady-state poll both funnel into it, and a second
//! call for the same swap is a no-op.
//!
//! Validation is strict: the first signer to find a payload inconsistent
//! with the chain marks the swap failed outright. A swap that cannot be
//! signed must not sit in the queue waiting for signers that will never
//! come.

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use eyre::{eyre, Result, WrapErr};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::db::{self, NewSignature, Swap, SwapStatus};
use crate::eth::events::{decode_log, DepositEvent, WalletEvent, EVENT_SWAP, EVENT_SWAP_TOKEN};
use crate::eth::withdrawal::parse_withdraw_payload;
use crate::eth::EthClient;
use crate::metrics;
use crate::pairing::{select_adapter, ChainAdapter, TokenPairing, NETWORK_SCRT};
use crate::scrt::chain::ScrtQueryClient;
use crate::scrt::cli::ScrtCli;
use crate::scrt::tx::{parse_mint_plaintext, parse_mint_tx, MintBody, MsgContent};
use crate::validate;
use crate::watchers::EventSource;

/// Blocks swept per catch-up step, with the cursor persisted in between.
const CATCHUP_CHUNK_BLOCKS: u64 = 5000;

/// Validation verdict for one swap. Transient trouble (chain unreachable,
/// tx not yet indexed by a lagging node) is an `Err` from the checking
/// functions instead, leaving the swap untouched for a later retry.
enum Verdict {
    Valid,
    Invalid(String),
}

pub struct SignerWorker {
    db: PgPool,
    eth: Arc<EthClient>,
    /// Range-scan access for the startup catch-up sweep
    events: EventSource,
    cli: ScrtCli,
    query: Arc<ScrtQueryClient>,
    adapters: Arc<Vec<Box<dyn ChainAdapter>>>,
    pairings: Vec<TokenPairing>,
    eth_signer: PrivateKeySigner,
    signer_name: String,
    multisig_address: String,
    multisig_account_number: u64,
    start_block: u64,
    poll_interval: Duration,
}

impl SignerWorker {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        db: PgPool,
        eth: Arc<EthClient>,
        cli: ScrtCli,
        query: Arc<ScrtQueryClient>,
        adapters: Arc<Vec<Box<dyn ChainAdapter>>>,
        pairings: Vec<TokenPairing>,
        eth_private_key: &str,
        signer_name: String,
        multisig_address: String,
        start_block: u64,
        poll_interval: Duration,
    ) -> Result<Self> {
        let eth_signer: PrivateKeySigner =
            eth_private_key.parse().wrap_err("Invalid ETH private key")?;

        let account = cli
            .account_info(&multisig_address)
            .await
            .wrap_err("Cannot fetch multisig account info")?;

        info!(
            signer = %signer_name,
            eth_address = %eth_signer.address(),
            multisig = %multisig_address,
            account_number = account.account_number,
            "Signer initialized"
        );

        let events = EventSource::new(eth.clone(), db.clone(), start_block, poll_interval);

        Ok(Self {
            db,
            eth,
            events,
            cli,
            query,
            adapters,
            pairings,
            eth_signer,
            signer_name,
            multisig_address,
            multisig_account_number: account.account_number,
            start_block,
            poll_interval,
        })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(signer = %self.signer_name, "Signer starting catch-up scan");

        // Replay deposit events missed while this signer was down. The sweep
        // is restartable: the cursor is persisted per chunk, so a crash
        // resumes where it stopped.
        if let Err(e) = self.catch_up(&shutdown).await {
            warn!(error = %e, "Event catch-up incomplete, store scan will cover the rest");
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Sequence order: dependent transactions resolve in creation
            // order. The first pass after a restart is the catch-up scan;
            // every later pass picks up newly created swaps.
            match db::get_swaps_by_status(&self.db, SwapStatus::Unsigned).await {
                Ok(swaps) => {
                    for swap in &swaps {
                        if *shutdown.borrow() {
                            break;
                        }
                        if let Err(e) = self.process(swap).await {
                            // Transient: swap untouched, retried next cycle.
                            warn!(
                                swap_id = swap.id,
                                error = %e,
                                "Signing attempt failed, will retry"
                            );
                            metrics::ERRORS
                                .with_label_values(&[swap.destination_network.as_str(), "sign"])
                                .inc();
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Swap scan failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(signer = %self.signer_name, "Signer stopped");
        Ok(())
    }

    /// Sweep historical deposit events from this signer's own cursor and
    /// sign any swap still waiting on us.
    async fn catch_up(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let cursor_key = format!("signer-scan:{}", self.signer_name);
        let head = self.eth.block_number().await?;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let cursor = db::last_processed(&self.db, &cursor_key).await?;
            let from_block = if cursor < 0 {
                self.start_block
            } else {
                cursor as u64 + 1
            };
            if from_block > head {
                return Ok(());
            }
            let to_block = std::cmp::min(head, from_block + CATCHUP_CHUNK_BLOCKS - 1);

            for event_name in [EVENT_SWAP, EVENT_SWAP_TOKEN] {
                for event in self
                    .events
                    .events_in_range(event_name, from_block, to_block)
                    .await?
                {
                    let WalletEvent::Deposit(deposit) = event else {
                        continue;
                    };
                    let Some(swap) =
                        db::get_swap_by_source_tx_hash(&self.db, &deposit.tx_hash).await?
                    else {
                        // Swap creation is the event source's job; the store
                        // scan picks it up once recorded.
                        continue;
                    };
                    if let Err(e) = self.process(&swap).await {
                        warn!(swap_id = swap.id, error = %e, "Catch-up signing failed");
                    }
                }
            }

            db::update_last_processed(&self.db, &cursor_key, to_block as i64).await?;
        }
    }

    /// Validate and sign one swap. Safe to call any number of times.
    pub async fn process(&self, swap: &Swap) -> Result<()> {
        if db::signature_exists(&self.db, swap.id, &self.signer_name).await? {
            return Ok(());
        }
        // The status may have moved since the scan.
        if swap.status() != Some(SwapStatus::Unsigned) {
            return Ok(());
        }

        let verdict = if swap.destination_network == NETWORK_SCRT {
            self.check_mint(swap).await?
        } else {
            self.check_withdrawal(swap).await?
        };

        match verdict {
            Verdict::Valid => self.sign_swap(swap).await,
            Verdict::Invalid(reason) => self.fail_swap(swap, &reason).await,
        }
    }

    /// Validate an EVM->privacy-chain mint against the deposit receipt.
    async fn check_mint(&self, swap: &Swap) -> Result<Verdict> {
        let Some(receipt) = self.eth.receipt(&swap.source_tx_hash).await? else {
            // The event source only records deposits that are already past
            // the confirmation depth; a missing receipt means the claimed
            // source transaction does not exist.
            return Ok(Verdict::Invalid("source transaction not found".to_string()));
        };

        if !receipt.status() {
            return Ok(Verdict::Invalid("source transaction reverted".to_string()));
        }

        let Some(deposit) = self.deposit_from_receipt(&receipt) else {
            return Ok(Verdict::Invalid(
                "no deposit event in source transaction".to_string(),
            ));
        };

        let Some(adapter) = select_adapter(&self.adapters, &deposit) else {
            return Ok(Verdict::Invalid("deposit token is not tracked".to_string()));
        };

        let mint = match self.decode_stored_mint(swap).await? {
            Ok(parsed) => parsed,
            Err(reason) => return Ok(Verdict::Invalid(reason)),
        };

        match validate::verify_mint(
            &mint.sender,
            &mint.contract,
            &mint.body,
            &deposit,
            adapter,
            &self.multisig_address,
            &swap.source_tx_hash,
        ) {
            Ok(()) => Ok(Verdict::Valid),
            Err(e) => Ok(Verdict::Invalid(e.to_string())),
        }
    }

    /// Validate a privacy-chain->EVM withdrawal against the burn record.
    async fn check_withdrawal(&self, swap: &Swap) -> Result<Verdict> {
        let Some(pairing) = self.pairing_for_eth_coin(&swap.destination_coin) else {
            return Ok(Verdict::Invalid("withdrawal token is not tracked".to_string()));
        };

        let Some(burn) = self
            .query
            .query_burn(&pairing.scrt_address, swap.source_nonce)
            .await?
        else {
            return Ok(Verdict::Invalid("burn record not found".to_string()));
        };

        if !burn.tx_hash.eq_ignore_ascii_case(&swap.source_tx_hash) {
            return Ok(Verdict::Invalid(format!(
                "burn nonce {} belongs to tx {}, not {}",
                swap.source_nonce, burn.tx_hash, swap.source_tx_hash
            )));
        }

        let payload = match parse_withdraw_payload(&swap.unsigned_tx) {
            Ok(payload) => payload,
            Err(e) => return Ok(Verdict::Invalid(e.to_string())),
        };

        match validate::verify_withdrawal(&payload, &burn, pairing) {
            Ok(()) => Ok(Verdict::Valid),
            Err(e) => Ok(Verdict::Invalid(e.to_string())),
        }
    }

    async fn sign_swap(&self, swap: &Swap) -> Result<()> {
        let signed_tx = if swap.destination_network == NETWORK_SCRT {
            self.cli
                .sign(
                    &swap.unsigned_tx,
                    &self.multisig_address,
                    &self.signer_name,
                    self.multisig_account_number,
                    swap.sequence,
                )
                .await
                .map_err(|e| eyre!("Wallet CLI sign failed: {}", e))?
        } else {
            let payload = parse_withdraw_payload(&swap.unsigned_tx)
                .map_err(|e| eyre!("Unsigned withdrawal no longer parses: {}", e))?;
            let digest = payload
                .digest(self.eth.contract_address)
                .map_err(|e| eyre!("Cannot compute withdrawal digest: {}", e))?;
            let signature = self
                .eth_signer
                .sign_hash_sync(&digest)
                .wrap_err("ECDSA signing failed")?;
            hex::encode(signature.as_bytes())
        };

        db::insert_signature(
            &self.db,
            &NewSignature {
                swap_id: swap.id,
                signer: self.signer_name.clone(),
                signed_tx,
            },
        )
        .await?;

        info!(
            swap_id = swap.id,
            signer = %self.signer_name,
            sequence = swap.sequence,
            "Swap signed"
        );
        metrics::SIGNATURES_WRITTEN
            .with_label_values(&[swap.destination_network.as_str()])
            .inc();

        Ok(())
    }

    /// Strict invalidation: conditionally fail the swap so it never waits
    /// for signatures that cannot legitimately arrive.
    async fn fail_swap(&self, swap: &Swap, reason: &str) -> Result<()> {
        let failed =
            db::update_swap_status(&self.db, swap.id, SwapStatus::Unsigned, SwapStatus::Failed)
                .await?;
        if failed {
            error!(
                swap_id = swap.id,
                source_tx_hash = %swap.source_tx_hash,
                reason,
                "Swap failed validation"
            );
            metrics::SWAPS_FAILED
                .with_label_values(&[swap.destination_network.as_str(), "validation"])
                .inc();
        } else {
            // Another worker moved the swap first; its verdict stands.
            debug!(swap_id = swap.id, "Swap already transitioned");
        }
        Ok(())
    }

    fn deposit_from_receipt(
        &self,
        receipt: &alloy::rpc::types::TransactionReceipt,
    ) -> Option<DepositEvent> {
        for log in receipt.inner.logs() {
            if log.address() != self.eth.contract_address {
                continue;
            }
            match decode_log(log) {
                Ok(Some(WalletEvent::Deposit(deposit))) => return Some(deposit),
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "Skipping undecodable receipt log");
                    continue;
                }
            }
        }
        None
    }

    /// Parse the stored unsigned mint tx, decrypting the inner message
    /// through the wallet if it is not plaintext. Returns the parse verdict;
    /// an outer `Err` is transient (wallet unreachable).
    async fn decode_stored_mint(&self, swap: &Swap) -> Result<std::result::Result<ParsedMint, String>> {
        let parsed = match parse_mint_tx(&swap.unsigned_tx) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(Err(e.to_string())),
        };

        let body = match parsed.msg {
            MsgContent::Plain(body) => body,
            MsgContent::Opaque(blob) => {
                let plaintext = self
                    .cli
                    .decrypt(&blob)
                    .await
                    .map_err(|e| eyre!("Wallet decrypt failed: {}", e))?;
                match parse_mint_plaintext(plaintext.as_bytes()) {
                    Ok(body) => body,
                    Err(e) => return Ok(Err(format!("decrypted message invalid: {}", e))),
                }
            }
        };

        Ok(Ok(ParsedMint {
            sender: parsed.sender,
            contract: parsed.contract,
            body,
        }))
    }

    fn pairing_for_eth_coin(&self, eth_address: &str) -> Option<&TokenPairing> {
        self.pairings
            .iter()
            .find(|p| p.eth_address.eq_ignore_ascii_case(eth_address))
    }
}

struct ParsedMint {
    sender: String,
    contract: String,
    body: MintBody,
}
