//! Return-leg withdrawal payload and signing digest.
//!
//! A swap destined for the EVM side stores this JSON as its unsigned tx.
//! Each signer signs the keccak digest of the fixed-width encoding below;
//! the wallet contract recovers the same digest on-chain when the leader
//! submits the signature bundle.

use alloy::primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum WithdrawalError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("invalid address {0}")]
    Address(String),
    #[error("invalid amount {0}")]
    Amount(String),
}

/// The withdrawal to execute on the EVM wallet contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawPayload {
    /// ERC-20 address, or the zero address for the native coin
    pub token: String,
    pub recipient: String,
    pub amount: String,
    /// Burn nonce on the privacy chain
    pub nonce: i64,
}

pub fn build_withdraw_payload(token: &str, recipient: &str, amount: &str, nonce: i64) -> String {
    serde_json::to_string(&WithdrawPayload {
        token: token.to_string(),
        recipient: recipient.to_string(),
        amount: amount.to_string(),
        nonce,
    })
    .expect("withdraw payload serializes")
}

pub fn parse_withdraw_payload(json: &str) -> Result<WithdrawPayload, WithdrawalError> {
    serde_json::from_str(json).map_err(|e| WithdrawalError::Json(e.to_string()))
}

impl WithdrawPayload {
    pub fn token_address(&self) -> Result<Address, WithdrawalError> {
        Address::from_str(&self.token).map_err(|_| WithdrawalError::Address(self.token.clone()))
    }

    pub fn recipient_address(&self) -> Result<Address, WithdrawalError> {
        Address::from_str(&self.recipient)
            .map_err(|_| WithdrawalError::Address(self.recipient.clone()))
    }

    pub fn amount_u256(&self) -> Result<U256, WithdrawalError> {
        U256::from_str_radix(&self.amount, 10)
            .map_err(|_| WithdrawalError::Amount(self.amount.clone()))
    }

    /// Digest the operators sign and the wallet contract verifies.
    pub fn digest(&self, wallet_contract: Address) -> Result<B256, WithdrawalError> {
        Ok(withdrawal_digest(
            wallet_contract,
            self.token_address()?,
            self.recipient_address()?,
            self.amount_u256()?,
            self.nonce,
        ))
    }
}

/// keccak256 over five 32-byte words:
/// wallet contract, token, recipient, amount, nonce.
/// Addresses are right-aligned; integers big-endian.
pub fn withdrawal_digest(
    wallet_contract: Address,
    token: Address,
    recipient: Address,
    amount: U256,
    nonce: i64,
) -> B256 {
    let mut data = [0u8; 160];

    data[12..32].copy_from_slice(wallet_contract.as_slice());
    data[44..64].copy_from_slice(token.as_slice());
    data[76..96].copy_from_slice(recipient.as_slice());
    data[96..128].copy_from_slice(&amount.to_be_bytes::<32>());
    data[152..160].copy_from_slice(&(nonce as u64).to_be_bytes());

    keccak256(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips() {
        let json = build_withdraw_payload(
            "0x4242424242424242424242424242424242424242",
            "0x1111111111111111111111111111111111111111",
            "5000",
            9,
        );
        let parsed = parse_withdraw_payload(&json).unwrap();
        assert_eq!(parsed.nonce, 9);
        assert_eq!(parsed.amount_u256().unwrap(), U256::from(5000u64));
        assert_eq!(
            parsed.token_address().unwrap(),
            Address::repeat_byte(0x42)
        );
    }

    #[test]
    fn digest_is_sensitive_to_every_field() {
        let wallet = Address::repeat_byte(0x01);
        let token = Address::repeat_byte(0x02);
        let recipient = Address::repeat_byte(0x03);
        let base = withdrawal_digest(wallet, token, recipient, U256::from(100u64), 7);

        assert_ne!(
            base,
            withdrawal_digest(wallet, token, recipient, U256::from(101u64), 7)
        );
        assert_ne!(
            base,
            withdrawal_digest(wallet, token, recipient, U256::from(100u64), 8)
        );
        assert_ne!(
            base,
            withdrawal_digest(wallet, token, Address::repeat_byte(0x04), U256::from(100u64), 7)
        );
        assert_ne!(
            base,
            withdrawal_digest(Address::repeat_byte(0x05), token, recipient, U256::from(100u64), 7)
        );
    }

    #[test]
    fn malformed_payload_fields_are_errors() {
        let parsed = parse_withdraw_payload(
            r#"{"token":"nope","recipient":"0x1111111111111111111111111111111111111111","amount":"abc","nonce":1}"#,
        )
        .unwrap();
        assert!(matches!(
            parsed.token_address(),
            Err(WithdrawalError::Address(_))
        ));
        assert!(matches!(
            parsed.amount_u256(),
            Err(WithdrawalError::Amount(_))
        ));
        assert!(parse_withdraw_payload("{").is_err());
    }
}
