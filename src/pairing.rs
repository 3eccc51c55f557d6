//! Token pairing table and per-pairing chain adapters.
//!
//! A pairing maps a coin on one chain to its counterpart on the other and is
//! read-only at runtime. Adapters replace per-chain signer subclasses: each
//! pairing selects a strategy that knows which deposit event it consumes and
//! how to pull the authoritative amount, destination and token identity out
//! of a decoded log.

use alloy::primitives::Address;
use bigdecimal::BigDecimal;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::eth::events::{DepositEvent, EVENT_SWAP, EVENT_SWAP_TOKEN};
use crate::validate::ValidationError;

pub const NETWORK_ETH: &str = "ethereum";
pub const NETWORK_SCRT: &str = "secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingKind {
    /// The chain's native coin
    Native,
    /// An ERC-20 token
    Token,
}

/// One coin bridged between the two chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPairing {
    pub name: String,
    pub kind: PairingKind,
    /// ERC-20 contract address; zero address for the native coin
    pub eth_address: String,
    /// Wrapped-token contract on the privacy chain
    pub scrt_address: String,
    pub eth_decimals: u32,
    pub scrt_decimals: u32,
}

/// Load the pairing table from a JSON file.
pub fn load_pairings(path: &str) -> Result<Vec<TokenPairing>> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Cannot read pairing file {}", path))?;
    let pairings: Vec<TokenPairing> =
        serde_json::from_str(&raw).wrap_err("Pairing file is not valid JSON")?;
    for pairing in &pairings {
        if pairing.kind == PairingKind::Token {
            Address::from_str(&pairing.eth_address).map_err(|_| {
                eyre::eyre!(
                    "Pairing {} has an invalid ERC-20 address {}",
                    pairing.name,
                    pairing.eth_address
                )
            })?;
        }
    }
    Ok(pairings)
}

/// Check a bech32 address against the expected human-readable prefix.
pub fn is_valid_bech32(addr: &str, hrp: &str) -> bool {
    match bech32::decode(addr) {
        Ok((decoded_hrp, _, _)) => decoded_hrp == hrp,
        Err(_) => false,
    }
}

/// Strategy interface for interpreting deposit events of one pairing.
pub trait ChainAdapter: Send + Sync {
    fn pairing(&self) -> &TokenPairing;

    /// Event names this adapter consumes
    fn tracked_events(&self) -> &'static [&'static str];

    /// Deposited amount re-scaled to the destination chain's decimals
    fn extract_amount(&self, event: &DepositEvent) -> Result<String, ValidationError>;

    /// Destination address carried in the event, validated for the
    /// destination chain's format
    fn extract_destination(&self, event: &DepositEvent) -> Result<String, ValidationError>;

    /// Whether the event's token identity belongs to this pairing
    fn verify_token(&self, event: &DepositEvent) -> Result<(), ValidationError>;
}

/// Adapter for native-coin deposits (`Swap` events).
pub struct NativeCoinAdapter {
    pairing: TokenPairing,
}

/// Adapter for ERC-20 deposits (`SwapToken` events).
pub struct TokenAdapter {
    pairing: TokenPairing,
    eth_address: Address,
}

impl ChainAdapter for NativeCoinAdapter {
    fn pairing(&self) -> &TokenPairing {
        &self.pairing
    }

    fn tracked_events(&self) -> &'static [&'static str] {
        &[EVENT_SWAP]
    }

    fn extract_amount(&self, event: &DepositEvent) -> Result<String, ValidationError> {
        rescale_amount(
            &event.amount,
            self.pairing.eth_decimals,
            self.pairing.scrt_decimals,
        )
    }

    fn extract_destination(&self, event: &DepositEvent) -> Result<String, ValidationError> {
        destination_bech32(event)
    }

    fn verify_token(&self, event: &DepositEvent) -> Result<(), ValidationError> {
        match event.token {
            None => Ok(()),
            Some(addr) => Err(ValidationError::TokenMismatch {
                expected: "native coin".to_string(),
                got: format!("{:?}", addr),
            }),
        }
    }
}

impl ChainAdapter for TokenAdapter {
    fn pairing(&self) -> &TokenPairing {
        &self.pairing
    }

    fn tracked_events(&self) -> &'static [&'static str] {
        &[EVENT_SWAP_TOKEN]
    }

    fn extract_amount(&self, event: &DepositEvent) -> Result<String, ValidationError> {
        rescale_amount(
            &event.amount,
            self.pairing.eth_decimals,
            self.pairing.scrt_decimals,
        )
    }

    fn extract_destination(&self, event: &DepositEvent) -> Result<String, ValidationError> {
        destination_bech32(event)
    }

    fn verify_token(&self, event: &DepositEvent) -> Result<(), ValidationError> {
        match event.token {
            Some(addr) if addr == self.eth_address => Ok(()),
            Some(addr) => Err(ValidationError::TokenMismatch {
                expected: format!("{:?}", self.eth_address),
                got: format!("{:?}", addr),
            }),
            None => Err(ValidationError::TokenMismatch {
                expected: format!("{:?}", self.eth_address),
                got: "native coin".to_string(),
            }),
        }
    }
}

/// Build the adapter for a pairing entry.
pub fn adapter_for(pairing: &TokenPairing) -> Result<Box<dyn ChainAdapter>> {
    match pairing.kind {
        PairingKind::Native => Ok(Box::new(NativeCoinAdapter {
            pairing: pairing.clone(),
        })),
        PairingKind::Token => {
            let eth_address = Address::from_str(&pairing.eth_address).map_err(|_| {
                eyre::eyre!(
                    "Pairing {} has an invalid ERC-20 address {}",
                    pairing.name,
                    pairing.eth_address
                )
            })?;
            Ok(Box::new(TokenAdapter {
                pairing: pairing.clone(),
                eth_address,
            }))
        }
    }
}

/// Pick the adapter responsible for a decoded deposit event, by event name
/// and token identity. Returns None for deposits of untracked tokens.
pub fn select_adapter<'a>(
    adapters: &'a [Box<dyn ChainAdapter>],
    event: &DepositEvent,
) -> Option<&'a dyn ChainAdapter> {
    adapters
        .iter()
        .map(|a| a.as_ref())
        .find(|a| a.tracked_events().contains(&event.event_name) && a.verify_token(event).is_ok())
}

/// Re-scale an integer amount between chain denominations, truncating any
/// sub-unit dust toward zero.
pub fn rescale_amount(
    amount: &str,
    from_decimals: u32,
    to_decimals: u32,
) -> Result<String, ValidationError> {
    if amount.trim().starts_with('-') {
        return Err(ValidationError::MalformedAmount(amount.to_string()));
    }
    let value = BigDecimal::from_str(amount)
        .map_err(|_| ValidationError::MalformedAmount(amount.to_string()))?;

    let scaled = if from_decimals >= to_decimals {
        let divisor = pow10(from_decimals - to_decimals);
        (value / divisor).with_scale_round(0, bigdecimal::RoundingMode::Down)
    } else {
        value * pow10(to_decimals - from_decimals)
    };

    Ok(scaled.with_scale(0).to_string())
}

fn pow10(exp: u32) -> BigDecimal {
    let mut s = String::from("1");
    s.extend(std::iter::repeat('0').take(exp as usize));
    BigDecimal::from_str(&s).expect("power of ten parses")
}

fn destination_bech32(event: &DepositEvent) -> Result<String, ValidationError> {
    let addr = String::from_utf8(event.recipient.clone())
        .map_err(|_| ValidationError::MalformedDestination(hex::encode(&event.recipient)))?;
    if !is_valid_bech32(&addr, "secret") {
        return Err(ValidationError::MalformedDestination(addr));
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native_pairing() -> TokenPairing {
        TokenPairing {
            name: "eth".to_string(),
            kind: PairingKind::Native,
            eth_address: "0x0000000000000000000000000000000000000000".to_string(),
            scrt_address: "secret1wrappedeth".to_string(),
            eth_decimals: 18,
            scrt_decimals: 6,
        }
    }

    fn token_pairing() -> TokenPairing {
        TokenPairing {
            name: "dai".to_string(),
            kind: PairingKind::Token,
            eth_address: format!("{:?}", Address::repeat_byte(0x42)),
            scrt_address: "secret1wrappeddai".to_string(),
            eth_decimals: 18,
            scrt_decimals: 18,
        }
    }

    fn deposit(event_name: &'static str, token: Option<Address>) -> DepositEvent {
        DepositEvent {
            event_name,
            nonce: 1,
            recipient: b"secret1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnpn9nv9".to_vec(),
            amount: "1000000000000000000".to_string(),
            token,
            tx_hash: "0xabc".to_string(),
            block_number: 10,
            log_index: 0,
        }
    }

    #[test]
    fn rescale_down_truncates_dust() {
        // 18 -> 6 decimals: 1.5 ETH in wei becomes 1_500_000
        assert_eq!(
            rescale_amount("1500000000000000000", 18, 6).unwrap(),
            "1500000"
        );
        // Sub-unit dust is dropped, not rounded up
        assert_eq!(rescale_amount("1999999999999", 18, 6).unwrap(), "1");
        assert_eq!(rescale_amount("999999999999", 18, 6).unwrap(), "0");
    }

    #[test]
    fn rescale_up_multiplies() {
        assert_eq!(rescale_amount("5", 6, 18).unwrap(), "5000000000000");
    }

    #[test]
    fn rescale_same_scale_is_identity() {
        assert_eq!(rescale_amount("12345", 8, 8).unwrap(), "12345");
    }

    #[test]
    fn rescale_rejects_garbage_and_negatives() {
        assert!(rescale_amount("12a45", 18, 6).is_err());
        assert!(rescale_amount("-5", 18, 6).is_err());
    }

    #[test]
    fn adapters_track_their_own_event_only() {
        let adapters = vec![
            adapter_for(&native_pairing()).unwrap(),
            adapter_for(&token_pairing()).unwrap(),
        ];

        let native = deposit(EVENT_SWAP, None);
        let selected = select_adapter(&adapters, &native).unwrap();
        assert_eq!(selected.pairing().name, "eth");

        let token = deposit(EVENT_SWAP_TOKEN, Some(Address::repeat_byte(0x42)));
        let selected = select_adapter(&adapters, &token).unwrap();
        assert_eq!(selected.pairing().name, "dai");

        // Untracked token: no adapter claims it
        let unknown = deposit(EVENT_SWAP_TOKEN, Some(Address::repeat_byte(0x99)));
        assert!(select_adapter(&adapters, &unknown).is_none());
    }

    #[test]
    fn token_identity_is_verified() {
        let adapter = adapter_for(&token_pairing()).unwrap();
        let wrong = deposit(EVENT_SWAP_TOKEN, Some(Address::repeat_byte(0x99)));
        assert!(matches!(
            adapter.verify_token(&wrong),
            Err(ValidationError::TokenMismatch { .. })
        ));

        let native_into_token = deposit(EVENT_SWAP_TOKEN, None);
        assert!(adapter.verify_token(&native_into_token).is_err());
    }

    #[test]
    fn destination_must_be_utf8_bech32() {
        let event = deposit(EVENT_SWAP, None);
        assert_eq!(
            destination_bech32(&event).unwrap(),
            "secret1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnpn9nv9"
        );

        let mut event = deposit(EVENT_SWAP, None);
        event.recipient = vec![0xFF, 0xFE, 0x00];
        assert!(matches!(
            destination_bech32(&event),
            Err(ValidationError::MalformedDestination(_))
        ));

        // Right shape, wrong chain prefix
        event.recipient = b"cosmos1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnpn9nv9".to_vec();
        assert!(destination_bech32(&event).is_err());

        // Valid prefix, corrupted checksum
        event.recipient = b"secret1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnpn9nv8".to_vec();
        assert!(destination_bech32(&event).is_err());
    }
}
