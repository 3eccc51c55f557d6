//! Wallet CLI collaborator.
//!
//! All privacy-chain signing, multisig assembly, broadcasting and tx-result
//! queries go through the configured CLI binary (`secretcli`-compatible).
//! The subprocess boundary is the trust boundary: every failure mode maps to
//! a `CliError` variant so callers handle them exhaustively, and a tx that is
//! simply not indexed yet is a `TxOutcome::NotFound` value, never an error.

use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::ScrtConfig;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("unparsable `{command}` output: {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("scratch file error: {0}")]
    Scratch(#[from] std::io::Error),
}

pub type CliResult<T> = Result<T, CliError>;

/// Result of querying a broadcast transaction by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Executed with code 0
    Success { tx_hash: String },
    /// Executed and rejected on-chain
    Error { code: i64, raw_log: String },
    /// Not indexed by the node (yet)
    NotFound,
}

/// Account info as reported by the chain
#[derive(Debug, Clone, Copy)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastResponse {
    pub txhash: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub raw_log: String,
}

#[derive(Debug, Deserialize)]
struct TxQueryResponse {
    txhash: String,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    raw_log: String,
}

/// Wallet CLI wrapper. Cheap to clone; holds no subprocess state.
#[derive(Clone)]
pub struct ScrtCli {
    binary: String,
    chain_id: String,
    node: String,
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

impl ScrtCli {
    pub fn new(config: &ScrtConfig) -> Self {
        Self {
            binary: config.cli_binary.clone(),
            chain_id: config.chain_id.clone(),
            node: config.node.clone(),
        }
    }

    /// Sign an unsigned tx on behalf of the multisig account.
    /// Returns the signature document produced by the CLI.
    pub async fn sign(
        &self,
        unsigned_tx: &str,
        multisig_addr: &str,
        signer_name: &str,
        account_number: u64,
        sequence: i64,
    ) -> CliResult<String> {
        let tx_file = self.scratch_file("unsigned", unsigned_tx).await?;
        let args = sign_args(
            tx_file.to_string_lossy().as_ref(),
            multisig_addr,
            signer_name,
            account_number,
            sequence,
            &self.chain_id,
        );
        let result = self.run(&args).await;
        let _ = tokio::fs::remove_file(&tx_file).await;
        result
    }

    /// Combine per-signer signature documents into one signed multisig tx.
    pub async fn multisign(
        &self,
        unsigned_tx: &str,
        multisig_name: &str,
        account_number: u64,
        sequence: i64,
        signatures: &[String],
    ) -> CliResult<String> {
        let tx_file = self.scratch_file("unsigned", unsigned_tx).await?;
        let mut sig_files = Vec::with_capacity(signatures.len());
        for sig in signatures {
            sig_files.push(self.scratch_file("sig", sig).await?);
        }

        let sig_paths: Vec<String> = sig_files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let args = multisign_args(
            tx_file.to_string_lossy().as_ref(),
            multisig_name,
            account_number,
            sequence,
            &self.chain_id,
            &sig_paths,
        );
        let result = self.run(&args).await;

        let _ = tokio::fs::remove_file(&tx_file).await;
        for f in sig_files {
            let _ = tokio::fs::remove_file(&f).await;
        }
        result
    }

    /// Broadcast a signed tx. A non-zero `code` in the response is returned
    /// to the caller, not converted to an error here.
    pub async fn broadcast(&self, signed_tx: &str) -> CliResult<BroadcastResponse> {
        let tx_file = self.scratch_file("signed", signed_tx).await?;
        let args = vec![
            "tx".to_string(),
            "broadcast".to_string(),
            tx_file.to_string_lossy().into_owned(),
            "--broadcast-mode".to_string(),
            "sync".to_string(),
            "--node".to_string(),
            self.node.clone(),
            "--chain-id".to_string(),
            self.chain_id.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let result = self.run(&args).await;
        let _ = tokio::fs::remove_file(&tx_file).await;

        let stdout = result?;
        serde_json::from_str(&stdout).map_err(|source| CliError::Parse {
            command: "tx broadcast".to_string(),
            source,
        })
    }

    /// Query a tx's execution result by hash.
    pub async fn query_tx(&self, tx_hash: &str) -> CliResult<TxOutcome> {
        let args = vec![
            "query".to_string(),
            "tx".to_string(),
            tx_hash.to_string(),
            "--node".to_string(),
            self.node.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];

        match self.run(&args).await {
            Ok(stdout) => parse_tx_query(&stdout).map_err(|source| CliError::Parse {
                command: "query tx".to_string(),
                source,
            }),
            Err(CliError::Failed { stderr, .. }) if is_not_found(&stderr) => {
                Ok(TxOutcome::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// Account number and current sequence for an address.
    pub async fn account_info(&self, address: &str) -> CliResult<AccountInfo> {
        let args = vec![
            "query".to_string(),
            "account".to_string(),
            address.to_string(),
            "--node".to_string(),
            self.node.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let stdout = self.run(&args).await?;
        parse_account_info(&stdout).map_err(|source| CliError::Parse {
            command: "query account".to_string(),
            source,
        })
    }

    /// Decrypt an encrypted contract-message ciphertext with this node's key.
    pub async fn decrypt(&self, ciphertext_b64: &str) -> CliResult<String> {
        let args = vec![
            "query".to_string(),
            "compute".to_string(),
            "decrypt".to_string(),
            ciphertext_b64.to_string(),
            "--node".to_string(),
            self.node.clone(),
        ];
        let plaintext = self.run(&args).await?;
        Ok(plaintext.trim().to_string())
    }

    async fn run(&self, args: &[String]) -> CliResult<String> {
        debug!(binary = %self.binary, command = %args.join(" "), "Running wallet CLI");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CliError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CliError::Failed {
                command: args.iter().take(2).cloned().collect::<Vec<_>>().join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Write content to a unique scratch file the CLI can read.
    async fn scratch_file(&self, label: &str, content: &str) -> CliResult<PathBuf> {
        let id = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "scrt-bridge-{}-{}-{}.json",
            label,
            std::process::id(),
            id
        ));
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}

/// Argument list for `tx sign` against a multisig account, offline mode.
fn sign_args(
    tx_file: &str,
    multisig_addr: &str,
    signer_name: &str,
    account_number: u64,
    sequence: i64,
    chain_id: &str,
) -> Vec<String> {
    vec![
        "tx".to_string(),
        "sign".to_string(),
        tx_file.to_string(),
        "--multisig".to_string(),
        multisig_addr.to_string(),
        "--from".to_string(),
        signer_name.to_string(),
        "--offline".to_string(),
        "--account-number".to_string(),
        account_number.to_string(),
        "--sequence".to_string(),
        sequence.to_string(),
        "--chain-id".to_string(),
        chain_id.to_string(),
        "--output".to_string(),
        "json".to_string(),
    ]
}

/// Argument list for `tx multisign`, offline mode.
fn multisign_args(
    tx_file: &str,
    multisig_name: &str,
    account_number: u64,
    sequence: i64,
    chain_id: &str,
    sig_files: &[String],
) -> Vec<String> {
    let mut args = vec![
        "tx".to_string(),
        "multisign".to_string(),
        tx_file.to_string(),
        multisig_name.to_string(),
    ];
    args.extend(sig_files.iter().cloned());
    args.extend([
        "--offline".to_string(),
        "--account-number".to_string(),
        account_number.to_string(),
        "--sequence".to_string(),
        sequence.to_string(),
        "--chain-id".to_string(),
        chain_id.to_string(),
        "--output".to_string(),
        "json".to_string(),
    ]);
    args
}

fn parse_tx_query(stdout: &str) -> Result<TxOutcome, serde_json::Error> {
    let response: TxQueryResponse = serde_json::from_str(stdout)?;
    if response.code == 0 {
        Ok(TxOutcome::Success {
            tx_hash: response.txhash,
        })
    } else {
        Ok(TxOutcome::Error {
            code: response.code,
            raw_log: response.raw_log,
        })
    }
}

/// Cosmos nodes report an unindexed tx as an error string, not a response.
fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("not found") || lower.contains("no such tx")
}

fn parse_account_info(stdout: &str) -> Result<AccountInfo, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(stdout)?;

    // Account responses nest differently across SDK versions; check the
    // value itself, then `account`, then `account.base_account`.
    let account = value
        .get("account")
        .and_then(|a| a.get("base_account").or(Some(a)))
        .unwrap_or(&value);

    let read_u64 = |field: &str| -> u64 {
        account
            .get(field)
            .map(|v| match v {
                serde_json::Value::String(s) => s.parse().unwrap_or(0),
                serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
                _ => 0,
            })
            .unwrap_or(0)
    };

    Ok(AccountInfo {
        account_number: read_u64("account_number"),
        sequence: read_u64("sequence"),
    })
}
