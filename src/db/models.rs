use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// Note: We use String for amount fields to avoid BigDecimal/sqlx version conflicts.
// The database stores amounts as NUMERIC(78,0). When inserting, we cast text to NUMERIC
// in the SQL query (e.g., $1::NUMERIC). When reading, we cast back to TEXT.

/// Swap lifecycle status.
///
/// Stored as lowercase text in the `swaps.status` column; use `as_str` when
/// binding query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    Unsigned,
    Signed,
    Submitted,
    Confirmed,
    Failed,
    Retry,
}

impl SwapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Unsigned => "unsigned",
            SwapStatus::Signed => "signed",
            SwapStatus::Submitted => "submitted",
            SwapStatus::Confirmed => "confirmed",
            SwapStatus::Failed => "failed",
            SwapStatus::Retry => "retry",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unsigned" => Some(SwapStatus::Unsigned),
            "signed" => Some(SwapStatus::Signed),
            "submitted" => Some(SwapStatus::Submitted),
            "confirmed" => Some(SwapStatus::Confirmed),
            "failed" => Some(SwapStatus::Failed),
            "retry" => Some(SwapStatus::Retry),
            _ => None,
        }
    }

    /// Terminal states never leave their status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Confirmed | SwapStatus::Failed)
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cross-chain transfer intent, tracked end-to-end.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Swap {
    pub id: i64,
    pub source_tx_hash: String,
    pub source_network: String,
    pub source_coin: String,
    /// Nonce of the deposit/burn on the source chain (from the event log)
    pub source_nonce: i64,
    pub destination_network: String,
    pub destination_coin: String,
    pub destination_address: String,
    pub amount: String,
    /// Creation-order number; doubles as the destination account sequence
    pub sequence: i64,
    pub unsigned_tx: String,
    pub destination_tx_hash: Option<String>,
    pub status: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Swap {
    pub fn status(&self) -> Option<SwapStatus> {
        SwapStatus::parse(&self.status)
    }
}

/// For inserting new swaps
#[derive(Debug, Clone)]
pub struct NewSwap {
    pub source_tx_hash: String,
    pub source_network: String,
    pub source_coin: String,
    pub source_nonce: i64,
    pub destination_network: String,
    pub destination_coin: String,
    pub destination_address: String,
    pub amount: String,
    pub sequence: i64,
    pub unsigned_tx: String,
}

/// One signer's attestation for a swap
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Signature {
    pub id: i64,
    pub swap_id: i64,
    pub signer: String,
    pub signed_tx: String,
    pub created_on: DateTime<Utc>,
}

/// For inserting new signatures
#[derive(Debug, Clone)]
pub struct NewSignature {
    pub swap_id: i64,
    pub signer: String,
    pub signed_tx: String,
}

/// Per-source monotonic cursor of the last fully-processed item
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SwapTracker {
    pub key: String,
    pub nonce: i64,
    pub updated_on: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SwapStatus::Unsigned,
            SwapStatus::Signed,
            SwapStatus::Submitted,
            SwapStatus::Confirmed,
            SwapStatus::Failed,
            SwapStatus::Retry,
        ] {
            assert_eq!(SwapStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SwapStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(SwapStatus::Confirmed.is_terminal());
        assert!(SwapStatus::Failed.is_terminal());
        assert!(!SwapStatus::Submitted.is_terminal());
        assert!(!SwapStatus::Retry.is_terminal());
    }
}
