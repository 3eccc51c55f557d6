//! EVM writer: submits return-leg withdrawals to the multisig wallet
//! contract, bundling the collected operator signatures into one call.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use eyre::{Result, WrapErr};
use sqlx::PgPool;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

use super::{disposition, mark_later_swaps_retry, Outcome};
use crate::config::EthConfig;
use crate::db::{self, Swap, SwapStatus};
use crate::eth::contract::MultisigSwapWallet;
use crate::eth::withdrawal::parse_withdraw_payload;
use crate::metrics;
use crate::pairing::NETWORK_ETH;

pub struct EthWriter {
    db: PgPool,
    rpc_url: String,
    wallet_contract: Address,
    signer: PrivateKeySigner,
    threshold: i64,
}

impl EthWriter {
    pub fn new(db: PgPool, config: &EthConfig, threshold: i64) -> Result<Self> {
        let wallet_contract =
            Address::from_str(&config.contract_address).wrap_err("Invalid wallet contract address")?;
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .wrap_err("Invalid ETH private key")?;

        info!(
            leader_address = %signer.address(),
            wallet_contract = %wallet_contract,
            "EVM writer initialized"
        );

        Ok(Self {
            db,
            rpc_url: config.rpc_url.clone(),
            wallet_contract,
            signer,
            threshold,
        })
    }

    /// Submit every SIGNED withdrawal swap in ascending sequence order,
    /// demoting the remainder of the batch when one fails.
    pub async fn process_signed(&self) -> Result<()> {
        let swaps =
            db::get_swaps_by_status_for_destination(&self.db, SwapStatus::Signed, NETWORK_ETH)
                .await?;

        for (index, swap) in swaps.iter().enumerate() {
            match self.submit_one(swap).await? {
                Outcome::Done => {}
                Outcome::Requeue(reason) => {
                    warn!(
                        swap_id = swap.id,
                        sequence = swap.sequence,
                        reason,
                        "Withdrawal requeued"
                    );
                    if db::update_swap_status(&self.db, swap.id, SwapStatus::Signed, SwapStatus::Retry)
                        .await?
                    {
                        metrics::SWAPS_RETRIED
                            .with_label_values(&[NETWORK_ETH])
                            .inc();
                    }
                    mark_later_swaps_retry(&self.db, &swaps[index + 1..]).await?;
                    return Ok(());
                }
                Outcome::Fatal(reason) => {
                    error!(
                        swap_id = swap.id,
                        source_tx_hash = %swap.source_tx_hash,
                        reason,
                        "Withdrawal submission failed terminally"
                    );
                    db::update_swap_status(&self.db, swap.id, SwapStatus::Signed, SwapStatus::Failed)
                        .await?;
                    metrics::SWAPS_FAILED
                        .with_label_values(&[NETWORK_ETH, "broadcast"])
                        .inc();
                    mark_later_swaps_retry(&self.db, &swaps[index + 1..]).await?;
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn submit_one(&self, swap: &Swap) -> Result<Outcome> {
        // The signer validated this payload before signing; if it no longer
        // parses, the record was corrupted and cannot be submitted.
        let payload = match parse_withdraw_payload(&swap.unsigned_tx) {
            Ok(payload) => payload,
            Err(e) => return Ok(Outcome::Fatal(format!("unsigned payload invalid: {}", e))),
        };
        let (token, recipient, amount) = match (
            payload.token_address(),
            payload.recipient_address(),
            payload.amount_u256(),
        ) {
            (Ok(t), Ok(r), Ok(a)) => (t, r, a),
            _ => return Ok(Outcome::Fatal("unsigned payload fields invalid".to_string())),
        };

        let signatures = db::get_signatures(&self.db, swap.id).await?;
        let mut blobs: Vec<Bytes> = Vec::with_capacity(signatures.len());
        for signature in &signatures {
            match hex::decode(signature.signed_tx.trim_start_matches("0x")) {
                Ok(bytes) => blobs.push(Bytes::from(bytes)),
                Err(e) => {
                    warn!(
                        swap_id = swap.id,
                        signer = %signature.signer,
                        error = %e,
                        "Discarding undecodable signature"
                    );
                }
            }
        }
        if (blobs.len() as i64) < self.threshold {
            return Ok(Outcome::Requeue(format!(
                "insufficient usable signatures: {} of {}",
                blobs.len(),
                self.threshold
            )));
        }

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().wrap_err("Invalid RPC URL")?);
        let contract = MultisigSwapWallet::new(self.wallet_contract, &provider);

        debug!(
            swap_id = swap.id,
            token = %token,
            recipient = %recipient,
            amount = %amount,
            nonce = payload.nonce,
            signatures = blobs.len(),
            "Submitting withdrawal"
        );

        let call = contract.submitWithdrawal(
            token,
            recipient,
            amount,
            U256::from(payload.nonce as u64),
            blobs,
        );

        let pending = match call.send().await {
            Ok(pending) => pending,
            Err(e) => return disposition("submitWithdrawal", &e.to_string()),
        };
        let tx_hash = format!("{:?}", pending.tx_hash());

        match pending.get_receipt().await {
            Ok(receipt) if !receipt.status() => {
                return Ok(Outcome::Fatal("submitWithdrawal reverted".to_string()));
            }
            Ok(_) => {}
            Err(e) => {
                // The tx may still be mined; record it as submitted and let
                // the confirmer or the stale sweep resolve it.
                warn!(swap_id = swap.id, error = %e, "Receipt wait failed after send");
            }
        }

        if db::mark_swap_submitted(&self.db, swap.id, &tx_hash).await? {
            info!(
                swap_id = swap.id,
                sequence = swap.sequence,
                tx_hash = %tx_hash,
                "Withdrawal submitted"
            );
            metrics::BROADCASTS
                .with_label_values(&[NETWORK_ETH, "ok"])
                .inc();
        } else {
            debug!(swap_id = swap.id, "Submission lost a status race");
        }

        Ok(Outcome::Done)
    }
}
