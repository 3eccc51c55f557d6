//! EVM chain access: HTTP providers with ordered fallback, block/log/receipt
//! queries and the wallet contract's read-only calls.

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, BlockTransactionsKind, Filter, Log, TransactionReceipt};
use alloy::transports::http::{Client, Http};
use eyre::{eyre, Result, WrapErr};
use std::str::FromStr;
use tracing::warn;

pub mod contract;
pub mod events;
pub mod withdrawal;

use contract::MultisigSwapWallet;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read-only EVM client over one or more RPC endpoints.
///
/// Every query walks the endpoint list in order and returns the first
/// success; an endpoint failure is logged and the next URL is tried.
pub struct EthClient {
    providers: Vec<RootProvider<Http<Client>>>,
    urls: Vec<String>,
    pub contract_address: Address,
}

impl EthClient {
    pub fn new(urls: &[String], contract_address: &str) -> Result<Self> {
        if urls.is_empty() {
            return Err(eyre!("At least one RPC URL is required"));
        }

        let providers = urls
            .iter()
            .map(|url| {
                let parsed = url
                    .parse()
                    .wrap_err_with(|| format!("Invalid RPC URL: {}", url))?;
                Ok(ProviderBuilder::new().on_http(parsed))
            })
            .collect::<Result<Vec<_>>>()?;

        let contract_address =
            Address::from_str(contract_address).wrap_err("Invalid wallet contract address")?;

        Ok(Self {
            providers,
            urls: urls.to_vec(),
            contract_address,
        })
    }

    /// Current chain head.
    pub async fn block_number(&self) -> Result<u64> {
        let mut last_err = None;
        for (provider, url) in self.providers.iter().zip(&self.urls) {
            match provider.get_block_number().await {
                Ok(n) => return Ok(n),
                Err(e) => {
                    warn!(url = %url, error = %e, "Block number query failed, trying next RPC");
                    last_err = Some(e);
                }
            }
        }
        Err(eyre!("All RPC endpoints failed: {:?}", last_err))
    }

    /// Whether the node has the block at this height yet. A missing block is
    /// a normal "not yet available" condition, not an error.
    pub async fn block_available(&self, number: u64) -> Result<bool> {
        let mut last_err = None;
        for (provider, url) in self.providers.iter().zip(&self.urls) {
            match provider
                .get_block_by_number(
                    BlockNumberOrTag::Number(number),
                    BlockTransactionsKind::Hashes,
                )
                .await
            {
                Ok(block) => return Ok(block.is_some()),
                Err(e) => {
                    warn!(url = %url, error = %e, "Block query failed, trying next RPC");
                    last_err = Some(e);
                }
            }
        }
        Err(eyre!("All RPC endpoints failed: {:?}", last_err))
    }

    /// Logs emitted by the wallet contract in an inclusive block range.
    pub async fn contract_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(self.contract_address)
            .from_block(from_block)
            .to_block(to_block);

        let mut last_err = None;
        for (provider, url) in self.providers.iter().zip(&self.urls) {
            match provider.get_logs(&filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!(url = %url, error = %e, "Log query failed, trying next RPC");
                    last_err = Some(e);
                }
            }
        }
        Err(eyre!("All RPC endpoints failed: {:?}", last_err))
    }

    /// Transaction receipt by hash; None when the node has not indexed it.
    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        let hash =
            B256::from_str(tx_hash).wrap_err_with(|| format!("Invalid tx hash: {}", tx_hash))?;

        let mut last_err = None;
        for (provider, url) in self.providers.iter().zip(&self.urls) {
            match provider.get_transaction_receipt(hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(url = %url, error = %e, "Receipt query failed, trying next RPC");
                    last_err = Some(e);
                }
            }
        }
        Err(eyre!("All RPC endpoints failed: {:?}", last_err))
    }

    /// Resolve a withdrawal submission id to its (source nonce, token).
    pub async fn get_submission(&self, transaction_id: i64) -> Result<(i64, Address)> {
        let mut last_err = None;
        for (provider, url) in self.providers.iter().zip(&self.urls) {
            let wallet = MultisigSwapWallet::new(self.contract_address, provider);
            match wallet
                .getSubmission(alloy::primitives::U256::from(transaction_id as u64))
                .call()
                .await
            {
                Ok(submission) => {
                    let nonce: i64 = submission
                        .nonce
                        .try_into()
                        .map_err(|_| eyre!("Submission nonce overflows i64"))?;
                    return Ok((nonce, submission.token));
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "getSubmission call failed, trying next RPC");
                    last_err = Some(e);
                }
            }
        }
        Err(eyre!("All RPC endpoints failed: {:?}", last_err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_multiple_urls_trims_and_drops_empties() {
        let urls = parse_rpc_urls(" https://a.example , ,https://b.example,");
        assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
        assert!(parse_rpc_urls("").is_empty());
    }

    #[test]
    fn client_rejects_empty_url_list() {
        assert!(EthClient::new(&[], "0x0000000000000000000000000000000000000001").is_err());
    }

    #[test]
    fn client_rejects_bad_contract_address() {
        let urls = vec!["http://localhost:8545".to_string()];
        assert!(EthClient::new(&urls, "not-an-address").is_err());
    }
}
