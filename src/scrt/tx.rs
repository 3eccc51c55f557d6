//! Unsigned mint-transaction payload for the privacy chain.
//!
//! The payload stored on a swap is a standard Cosmos unsigned-tx JSON body
//! with a single wasm-execute message whose inner `msg` is base64 JSON. The
//! wallet CLI consumes the document as-is at sign time; the Validator parses
//! it back and compares the decoded fields against the source-chain log.
//! Parse failures are values: untrusted payloads must never panic the
//! operator.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MSG_TYPE_EXECUTE: &str = "/secret.compute.v1beta1.MsgExecuteContract";

const MINT_GAS_LIMIT: u64 = 350_000;
const MINT_FEE_AMOUNT: &str = "87500";
const FEE_DENOM: &str = "uscrt";

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("payload has no messages")]
    Empty,
    #[error("unexpected message type {0}")]
    WrongMessageType(String),
    #[error("message is not valid base64: {0}")]
    Base64(String),
    #[error("decoded message is not a mint instruction")]
    NotAMint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub body: TxBody,
    pub auth_info: AuthInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxBody {
    pub messages: Vec<ExecuteMsg>,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteMsg {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub sender: String,
    pub contract: String,
    /// base64-encoded inner message; plaintext JSON here, ciphertext once a
    /// wallet has encrypted it for the contract
    pub msg: String,
    #[serde(default)]
    pub sent_funds: Vec<Coin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    pub fee: Fee,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fee {
    pub amount: Vec<Coin>,
    pub gas_limit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// The mint instruction executed on the destination token contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintMsg {
    pub mint_from_ext_chain: MintBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintBody {
    pub recipient: String,
    pub amount: String,
    /// Source-chain transaction hash, recorded on-chain for auditability
    pub identifier: String,
}

/// The execute message extracted from an unsigned tx.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMintTx {
    pub sender: String,
    pub contract: String,
    pub msg: MsgContent,
}

/// Inner message content: decodable plaintext, or an opaque blob that needs
/// the wallet's decrypt before it can be compared.
#[derive(Debug, Clone, PartialEq)]
pub enum MsgContent {
    Plain(MintBody),
    Opaque(String),
}

/// Build the unsigned mint tx stored on a freshly created swap.
pub fn build_mint_tx(
    multisig_addr: &str,
    token_contract: &str,
    recipient: &str,
    amount: &str,
    source_tx_hash: &str,
) -> String {
    let mint = MintMsg {
        mint_from_ext_chain: MintBody {
            recipient: recipient.to_string(),
            amount: amount.to_string(),
            identifier: source_tx_hash.to_string(),
        },
    };
    let msg_b64 = base64::engine::general_purpose::STANDARD
        .encode(serde_json::to_vec(&mint).expect("mint msg serializes"));

    let tx = UnsignedTx {
        body: TxBody {
            messages: vec![ExecuteMsg {
                type_url: MSG_TYPE_EXECUTE.to_string(),
                sender: multisig_addr.to_string(),
                contract: token_contract.to_string(),
                msg: msg_b64,
                sent_funds: vec![],
            }],
            memo: String::new(),
        },
        auth_info: AuthInfo {
            fee: Fee {
                amount: vec![Coin {
                    denom: FEE_DENOM.to_string(),
                    amount: MINT_FEE_AMOUNT.to_string(),
                }],
                gas_limit: MINT_GAS_LIMIT.to_string(),
            },
        },
    };

    serde_json::to_string(&tx).expect("unsigned tx serializes")
}

/// Parse a stored unsigned tx back into its mint components.
pub fn parse_mint_tx(json: &str) -> Result<ParsedMintTx, PayloadError> {
    let tx: UnsignedTx =
        serde_json::from_str(json).map_err(|e| PayloadError::Json(e.to_string()))?;

    let msg = tx.body.messages.first().ok_or(PayloadError::Empty)?;
    if msg.type_url != MSG_TYPE_EXECUTE {
        return Err(PayloadError::WrongMessageType(msg.type_url.clone()));
    }

    let content = match decode_mint_msg(&msg.msg) {
        Ok(body) => MsgContent::Plain(body),
        // Valid base64 that is not mint JSON may be an encrypted blob; leave
        // it opaque for the caller to decrypt and re-parse.
        Err(PayloadError::NotAMint) => MsgContent::Opaque(msg.msg.clone()),
        Err(e) => return Err(e),
    };

    Ok(ParsedMintTx {
        sender: msg.sender.clone(),
        contract: msg.contract.clone(),
        msg: content,
    })
}

/// Decode a base64 inner message as a mint instruction.
pub fn decode_mint_msg(msg_b64: &str) -> Result<MintBody, PayloadError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(msg_b64)
        .map_err(|e| PayloadError::Base64(e.to_string()))?;
    parse_mint_plaintext(&raw)
}

/// Parse decrypted (or plaintext) bytes as a mint instruction.
pub fn parse_mint_plaintext(plaintext: &[u8]) -> Result<MintBody, PayloadError> {
    let mint: MintMsg = serde_json::from_slice(plaintext).map_err(|_| PayloadError::NotAMint)?;
    Ok(mint.mint_from_ext_chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_payload_parses_back() {
        let json = build_mint_tx(
            "secret1multisig",
            "secret1tokencontract",
            "secret1recipient",
            "100",
            "0xdeadbeef",
        );
        let parsed = parse_mint_tx(&json).unwrap();

        assert_eq!(parsed.sender, "secret1multisig");
        assert_eq!(parsed.contract, "secret1tokencontract");
        match parsed.msg {
            MsgContent::Plain(body) => {
                assert_eq!(body.recipient, "secret1recipient");
                assert_eq!(body.amount, "100");
                assert_eq!(body.identifier, "0xdeadbeef");
            }
            MsgContent::Opaque(_) => panic!("Expected plaintext mint"),
        }
    }

    #[test]
    fn encrypted_blob_stays_opaque() {
        let mut json = build_mint_tx("secret1m", "secret1t", "secret1r", "100", "0xaa");
        // Swap the inner msg for base64 that is not mint JSON
        let blob = base64::engine::general_purpose::STANDARD.encode(b"\x02\x99ciphertext");
        let mut tx: UnsignedTx = serde_json::from_str(&json).unwrap();
        tx.body.messages[0].msg = blob.clone();
        json = serde_json::to_string(&tx).unwrap();

        let parsed = parse_mint_tx(&json).unwrap();
        assert_eq!(parsed.msg, MsgContent::Opaque(blob));
    }

    #[test]
    fn malformed_json_is_an_error_value() {
        assert!(matches!(
            parse_mint_tx("{ not json"),
            Err(PayloadError::Json(_))
        ));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let mut tx: UnsignedTx =
            serde_json::from_str(&build_mint_tx("a", "b", "c", "1", "0x")).unwrap();
        tx.body.messages[0].msg = "!!!not-base64!!!".to_string();
        let json = serde_json::to_string(&tx).unwrap();
        assert!(matches!(
            parse_mint_tx(&json),
            Err(PayloadError::Base64(_))
        ));
    }

    #[test]
    fn wrong_message_type_is_rejected() {
        let mut tx: UnsignedTx =
            serde_json::from_str(&build_mint_tx("a", "b", "c", "1", "0x")).unwrap();
        tx.body.messages[0].type_url = "/cosmos.bank.v1beta1.MsgSend".to_string();
        let json = serde_json::to_string(&tx).unwrap();
        assert!(matches!(
            parse_mint_tx(&json),
            Err(PayloadError::WrongMessageType(_))
        ));
    }

    #[test]
    fn empty_message_list_is_rejected() {
        let json = r#"{"body":{"messages":[],"memo":""},"auth_info":{"fee":{"amount":[],"gas_limit":"0"}}}"#;
        assert_eq!(parse_mint_tx(json), Err(PayloadError::Empty));
    }
}
