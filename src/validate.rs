//! Swap payload validation.
//!
//! Pure checks of a swap's stored payload against the authoritative on-chain
//! record the caller fetched fresh. Nothing here touches the network or the
//! store; every way an untrusted payload can be wrong is a distinct error
//! value, and a validation error is always terminal for the swap.

use alloy::primitives::Address;
use bigdecimal::BigDecimal;
use std::str::FromStr;
use thiserror::Error;

use crate::eth::events::DepositEvent;
use crate::eth::withdrawal::WithdrawPayload;
use crate::pairing::{rescale_amount, ChainAdapter, TokenPairing};
use crate::scrt::chain::BurnRecord;
use crate::scrt::tx::MintBody;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("malformed amount {0}")]
    MalformedAmount(String),
    #[error("malformed destination {0}")]
    MalformedDestination(String),
    #[error("amount mismatch: expected {expected}, got {got}")]
    AmountMismatch { expected: String, got: String },
    #[error("destination mismatch: expected {expected}, got {got}")]
    DestinationMismatch { expected: String, got: String },
    #[error("token mismatch: expected {expected}, got {got}")]
    TokenMismatch { expected: String, got: String },
    #[error("wrong sender: expected {expected}, got {got}")]
    WrongSender { expected: String, got: String },
    #[error("wrong contract: expected {expected}, got {got}")]
    WrongContract { expected: String, got: String },
    #[error("identifier mismatch: expected {expected}, got {got}")]
    IdentifierMismatch { expected: String, got: String },
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: i64, got: i64 },
}

/// Check a stored mint instruction against the deposit event it claims to
/// represent. `event` must be freshly fetched from the source chain by the
/// caller; the stored payload is untrusted.
pub fn verify_mint(
    sender: &str,
    contract: &str,
    mint: &MintBody,
    event: &DepositEvent,
    adapter: &dyn ChainAdapter,
    multisig_addr: &str,
    source_tx_hash: &str,
) -> Result<(), ValidationError> {
    adapter.verify_token(event)?;

    if sender != multisig_addr {
        return Err(ValidationError::WrongSender {
            expected: multisig_addr.to_string(),
            got: sender.to_string(),
        });
    }

    let expected_contract = &adapter.pairing().scrt_address;
    if contract != expected_contract {
        return Err(ValidationError::WrongContract {
            expected: expected_contract.clone(),
            got: contract.to_string(),
        });
    }

    let expected_amount = adapter.extract_amount(event)?;
    if !amounts_equal(&mint.amount, &expected_amount)? {
        return Err(ValidationError::AmountMismatch {
            expected: expected_amount,
            got: mint.amount.clone(),
        });
    }

    let expected_destination = adapter.extract_destination(event)?;
    if mint.recipient != expected_destination {
        return Err(ValidationError::DestinationMismatch {
            expected: expected_destination,
            got: mint.recipient.clone(),
        });
    }

    if !mint.identifier.eq_ignore_ascii_case(source_tx_hash) {
        return Err(ValidationError::IdentifierMismatch {
            expected: source_tx_hash.to_string(),
            got: mint.identifier.clone(),
        });
    }

    Ok(())
}

/// Check a stored withdrawal payload against the authoritative burn record
/// freshly queried from the privacy chain.
pub fn verify_withdrawal(
    payload: &WithdrawPayload,
    burn: &BurnRecord,
    pairing: &TokenPairing,
) -> Result<(), ValidationError> {
    if payload.nonce != burn.nonce {
        return Err(ValidationError::NonceMismatch {
            expected: burn.nonce,
            got: payload.nonce,
        });
    }

    if !addresses_equal(&payload.token, &pairing.eth_address)? {
        return Err(ValidationError::TokenMismatch {
            expected: pairing.eth_address.clone(),
            got: payload.token.clone(),
        });
    }

    let expected_amount = rescale_amount(&burn.amount, pairing.scrt_decimals, pairing.eth_decimals)?;
    if !amounts_equal(&payload.amount, &expected_amount)? {
        return Err(ValidationError::AmountMismatch {
            expected: expected_amount,
            got: payload.amount.clone(),
        });
    }

    if !addresses_equal(&payload.recipient, &burn.destination)? {
        return Err(ValidationError::DestinationMismatch {
            expected: burn.destination.clone(),
            got: payload.recipient.clone(),
        });
    }

    Ok(())
}

/// Numeric equality; "0100" and "100" are the same amount.
fn amounts_equal(a: &str, b: &str) -> Result<bool, ValidationError> {
    let a = BigDecimal::from_str(a).map_err(|_| ValidationError::MalformedAmount(a.to_string()))?;
    let b = BigDecimal::from_str(b).map_err(|_| ValidationError::MalformedAmount(b.to_string()))?;
    Ok(a == b)
}

/// EVM address equality independent of checksum casing.
fn addresses_equal(a: &str, b: &str) -> Result<bool, ValidationError> {
    let a = Address::from_str(a).map_err(|_| ValidationError::MalformedDestination(a.to_string()))?;
    let b = Address::from_str(b).map_err(|_| ValidationError::MalformedDestination(b.to_string()))?;
    Ok(a == b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::events::EVENT_SWAP;
    use crate::pairing::{adapter_for, PairingKind};

    const RECIPIENT: &str = "secret1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnpn9nv9";
    const MULTISIG: &str = "secret14w46h2at4w46h2at4w46h2at4w46h2at7twuvp";

    fn pairing() -> TokenPairing {
        TokenPairing {
            name: "eth".to_string(),
            kind: PairingKind::Native,
            eth_address: "0x0000000000000000000000000000000000000000".to_string(),
            scrt_address: "secret1zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3rcrt0n".to_string(),
            eth_decimals: 18,
            scrt_decimals: 6,
        }
    }

    fn event() -> DepositEvent {
        DepositEvent {
            event_name: EVENT_SWAP,
            nonce: 0,
            recipient: RECIPIENT.as_bytes().to_vec(),
            // 100 native coins in wei
            amount: "100000000000000000000".to_string(),
            token: None,
            tx_hash: "0xfeed".to_string(),
            block_number: 100,
            log_index: 0,
        }
    }

    fn mint(amount: &str, recipient: &str) -> MintBody {
        MintBody {
            recipient: recipient.to_string(),
            amount: amount.to_string(),
            identifier: "0xfeed".to_string(),
        }
    }

    #[test]
    fn matching_payload_passes() {
        let pairing = pairing();
        let adapter = adapter_for(&pairing).unwrap();
        let result = verify_mint(
            MULTISIG,
            &pairing.scrt_address,
            &mint("100000000", RECIPIENT),
            &event(),
            adapter.as_ref(),
            MULTISIG,
            "0xFEED", // identifier comparison ignores hex casing
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn amount_mismatch_fails() {
        let pairing = pairing();
        let adapter = adapter_for(&pairing).unwrap();
        let result = verify_mint(
            MULTISIG,
            &pairing.scrt_address,
            &mint("50000000", RECIPIENT),
            &event(),
            adapter.as_ref(),
            MULTISIG,
            "0xfeed",
        );
        assert!(matches!(
            result,
            Err(ValidationError::AmountMismatch { .. })
        ));
    }

    #[test]
    fn destination_mismatch_fails() {
        let pairing = pairing();
        let adapter = adapter_for(&pairing).unwrap();
        let result = verify_mint(
            MULTISIG,
            &pairing.scrt_address,
            &mint("100000000", MULTISIG), // a different valid address
            &event(),
            adapter.as_ref(),
            MULTISIG,
            "0xfeed",
        );
        assert!(matches!(
            result,
            Err(ValidationError::DestinationMismatch { .. })
        ));
    }

    #[test]
    fn payload_routed_to_wrong_contract_fails() {
        let pairing = pairing();
        let adapter = adapter_for(&pairing).unwrap();
        let result = verify_mint(
            MULTISIG,
            "secret1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnpn9nv9",
            &mint("100000000", RECIPIENT),
            &event(),
            adapter.as_ref(),
            MULTISIG,
            "0xfeed",
        );
        assert!(matches!(
            result,
            Err(ValidationError::WrongContract { .. })
        ));
    }

    #[test]
    fn sender_other_than_multisig_fails() {
        let pairing = pairing();
        let adapter = adapter_for(&pairing).unwrap();
        let result = verify_mint(
            RECIPIENT,
            &pairing.scrt_address,
            &mint("100000000", RECIPIENT),
            &event(),
            adapter.as_ref(),
            MULTISIG,
            "0xfeed",
        );
        assert!(matches!(result, Err(ValidationError::WrongSender { .. })));
    }

    #[test]
    fn malformed_amount_is_an_error_not_a_panic() {
        let pairing = pairing();
        let adapter = adapter_for(&pairing).unwrap();
        let result = verify_mint(
            MULTISIG,
            &pairing.scrt_address,
            &mint("not-a-number", RECIPIENT),
            &event(),
            adapter.as_ref(),
            MULTISIG,
            "0xfeed",
        );
        assert!(matches!(
            result,
            Err(ValidationError::MalformedAmount(_))
        ));
    }

    fn token_pairing_18() -> TokenPairing {
        TokenPairing {
            name: "dai".to_string(),
            kind: PairingKind::Token,
            eth_address: "0x4242424242424242424242424242424242424242".to_string(),
            scrt_address: "secret1zyg3zyg3zyg3zyg3zyg3zyg3zyg3zyg3rcrt0n".to_string(),
            eth_decimals: 18,
            scrt_decimals: 6,
        }
    }

    fn burn() -> BurnRecord {
        BurnRecord {
            nonce: 5,
            amount: "1000000".to_string(), // 1.0 at 6 decimals
            destination: "0x1111111111111111111111111111111111111111".to_string(),
            tx_hash: "ABCD".to_string(),
        }
    }

    fn withdraw(amount: &str, nonce: i64) -> WithdrawPayload {
        WithdrawPayload {
            token: "0x4242424242424242424242424242424242424242".to_string(),
            recipient: "0x1111111111111111111111111111111111111111".to_string(),
            amount: amount.to_string(),
            nonce,
        }
    }

    #[test]
    fn matching_withdrawal_passes() {
        // 1.0 token re-scaled from 6 to 18 decimals
        let result = verify_withdrawal(
            &withdraw("1000000000000000000", 5),
            &burn(),
            &token_pairing_18(),
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn withdrawal_nonce_mismatch_fails() {
        let result = verify_withdrawal(
            &withdraw("1000000000000000000", 6),
            &burn(),
            &token_pairing_18(),
        );
        assert_eq!(
            result,
            Err(ValidationError::NonceMismatch {
                expected: 5,
                got: 6
            })
        );
    }

    #[test]
    fn withdrawal_amount_mismatch_fails() {
        let result = verify_withdrawal(&withdraw("2000000000000000000", 5), &burn(), &token_pairing_18());
        assert!(matches!(
            result,
            Err(ValidationError::AmountMismatch { .. })
        ));
    }

    #[test]
    fn withdrawal_wrong_token_fails() {
        let mut payload = withdraw("1000000000000000000", 5);
        payload.token = "0x9999999999999999999999999999999999999999".to_string();
        let result = verify_withdrawal(&payload, &burn(), &token_pairing_18());
        assert!(matches!(result, Err(ValidationError::TokenMismatch { .. })));
    }
}
