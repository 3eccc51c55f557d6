//! Read-only LCD queries against the privacy chain.

use base64::Engine;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// A burn record reported by a token contract's `{"swap":{"nonce":N}}` query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BurnRecord {
    pub nonce: i64,
    /// Amount burned, in the token's on-chain denomination
    pub amount: String,
    /// EVM recipient address chosen by the burner
    pub destination: String,
    /// Burn transaction hash on the privacy chain
    pub tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct SmartQueryResponse {
    data: Option<BurnRecord>,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    block: BlockInfo,
}

#[derive(Debug, Deserialize)]
struct BlockInfo {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: String,
}

/// LCD client for the privacy chain
pub struct ScrtQueryClient {
    client: Client,
    lcd_url: String,
}

impl ScrtQueryClient {
    pub fn new(lcd_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to create HTTP client")?;

        Ok(Self {
            client,
            lcd_url: lcd_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the burn record for `nonce` from a token contract.
    /// `Ok(None)` means no burn with that nonce exists (yet).
    pub async fn query_burn(&self, token_contract: &str, nonce: i64) -> Result<Option<BurnRecord>> {
        let query = serde_json::json!({ "swap": { "nonce": nonce } });
        let query_b64 =
            base64::engine::general_purpose::STANDARD.encode(serde_json::to_string(&query)?);

        let url = format!(
            "{}/compute/v1beta1/query/{}/{}",
            self.lcd_url, token_contract, query_b64
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .wrap_err("Failed to query burn record")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            // Contracts answer an unknown nonce with a query error, which the
            // LCD surfaces as a non-2xx status.
            if body.to_lowercase().contains("not found") {
                return Ok(None);
            }
            warn!(status = %status, body = %body, "Burn query returned error status");
            return Err(eyre!("Burn query failed with status {}", status));
        }

        let parsed: SmartQueryResponse = resp
            .json()
            .await
            .wrap_err("Failed to parse burn query response")?;
        Ok(parsed.data)
    }

    /// Current chain height from the LCD.
    pub async fn latest_height(&self) -> Result<u64> {
        let url = format!(
            "{}/cosmos/base/tendermint/v1beta1/blocks/latest",
            self.lcd_url
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await?
            .json::<BlockResponse>()
            .await
            .wrap_err("Failed to parse latest block response")?;

        let height: u64 = response
            .block
            .header
            .height
            .parse()
            .wrap_err("Non-numeric block height")?;
        Ok(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burn_record_parses_from_contract_response() {
        let body = r#"{"data":{"nonce":5,"amount":"1000000","destination":"0x52908400098527886E0F7030069857D2E4169EE7","tx_hash":"9F8A..."}}"#;
        let parsed: SmartQueryResponse = serde_json::from_str(body).unwrap();
        let record = parsed.data.unwrap();
        assert_eq!(record.nonce, 5);
        assert_eq!(record.amount, "1000000");
        assert!(record.destination.starts_with("0x"));
    }

    #[test]
    fn null_data_means_no_burn() {
        let parsed: SmartQueryResponse = serde_json::from_str(r#"{"data":null}"#).unwrap();
        assert!(parsed.data.is_none());
    }
}
