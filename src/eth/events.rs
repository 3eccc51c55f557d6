//! Wallet contract event decoding.
//!
//! Logs are decoded by hand from topics and ABI data words so the decoder can
//! reject malformed payloads with a value instead of trusting upstream
//! bindings. Unknown topics are skipped, not errors: the wallet contract
//! emits more event types than this operator tracks.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::rpc::types::Log;
use eyre::{eyre, Result};

pub const EVENT_SWAP: &str = "Swap";
pub const EVENT_SWAP_TOKEN: &str = "SwapToken";
pub const EVENT_WITHDRAW: &str = "Withdraw";
pub const EVENT_WITHDRAW_FAILURE: &str = "WithdrawFailure";

/// A deposit on the EVM side destined for the privacy chain.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositEvent {
    pub event_name: &'static str,
    /// Contract-assigned deposit nonce
    pub nonce: i64,
    /// Raw recipient bytes; a well-formed deposit carries a UTF-8 bech32
    /// address, but the bytes are attacker-controlled and stay raw here
    pub recipient: Vec<u8>,
    /// Decimal string of the deposited amount
    pub amount: String,
    /// ERC-20 address for SwapToken deposits; None for the native coin
    pub token: Option<Address>,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u64,
}

/// Execution result of a withdrawal submission on the EVM side.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalEvent {
    pub event_name: &'static str,
    pub transaction_id: i64,
    pub success: bool,
    pub tx_hash: String,
    pub block_number: u64,
}

/// Any tracked wallet contract event.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
}

impl WalletEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WalletEvent::Deposit(e) => e.event_name,
            WalletEvent::Withdrawal(e) => e.event_name,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            WalletEvent::Deposit(e) => e.block_number,
            WalletEvent::Withdrawal(e) => e.block_number,
        }
    }
}

pub fn swap_signature() -> B256 {
    keccak256(b"Swap(uint256,bytes,uint256)")
}

pub fn swap_token_signature() -> B256 {
    keccak256(b"SwapToken(uint256,bytes,uint256,address)")
}

pub fn withdraw_signature() -> B256 {
    keccak256(b"Withdraw(uint256)")
}

pub fn withdraw_failure_signature() -> B256 {
    keccak256(b"WithdrawFailure(uint256)")
}

/// Decode a wallet contract log. `Ok(None)` means "not an event we track".
pub fn decode_log(log: &Log) -> Result<Option<WalletEvent>> {
    let topics = log.topics();
    if topics.is_empty() {
        return Ok(None);
    }
    let topic = topics[0];

    if topic == swap_signature() {
        decode_deposit(log, EVENT_SWAP).map(|e| Some(WalletEvent::Deposit(e)))
    } else if topic == swap_token_signature() {
        decode_deposit(log, EVENT_SWAP_TOKEN).map(|e| Some(WalletEvent::Deposit(e)))
    } else if topic == withdraw_signature() {
        decode_withdrawal(log, EVENT_WITHDRAW, true).map(|e| Some(WalletEvent::Withdrawal(e)))
    } else if topic == withdraw_failure_signature() {
        decode_withdrawal(log, EVENT_WITHDRAW_FAILURE, false)
            .map(|e| Some(WalletEvent::Withdrawal(e)))
    } else {
        Ok(None)
    }
}

/// Data layout for Swap / SwapToken (all params non-indexed):
///   word 0: nonce (uint256)
///   word 1: offset to recipient bytes
///   word 2: amount (uint256)
///   word 3: token (address), SwapToken only
///   at offset: recipient length word, then padded recipient bytes
fn decode_deposit(log: &Log, event_name: &'static str) -> Result<DepositEvent> {
    let data = log.data().data.as_ref();

    let nonce = uint_word(data, 0)?;
    let nonce: i64 = nonce
        .try_into()
        .map_err(|_| eyre!("{} nonce overflows i64", event_name))?;

    let amount = uint_word(data, 2)?;

    let token = if event_name == EVENT_SWAP_TOKEN {
        Some(address_word(data, 3)?)
    } else {
        None
    };

    let recipient = dynamic_bytes(data, 1)?;

    let (tx_hash, block_number, log_index) = log_position(log)?;

    Ok(DepositEvent {
        event_name,
        nonce,
        recipient,
        amount: amount.to_string(),
        token,
        tx_hash,
        block_number,
        log_index,
    })
}

/// Data layout for Withdraw / WithdrawFailure: a single uint256 word.
fn decode_withdrawal(
    log: &Log,
    event_name: &'static str,
    success: bool,
) -> Result<WithdrawalEvent> {
    let data = log.data().data.as_ref();
    let id = uint_word(data, 0)?;
    let transaction_id: i64 = id
        .try_into()
        .map_err(|_| eyre!("{} transaction id overflows i64", event_name))?;

    let (tx_hash, block_number, _) = log_position(log)?;

    Ok(WithdrawalEvent {
        event_name,
        transaction_id,
        success,
        tx_hash,
        block_number,
    })
}

fn log_position(log: &Log) -> Result<(String, u64, u64)> {
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| eyre!("Log missing transaction hash"))?;
    let block_number = log
        .block_number
        .ok_or_else(|| eyre!("Log missing block number"))?;
    let log_index = log.log_index.unwrap_or(0);
    Ok((format!("{:?}", tx_hash), block_number, log_index))
}

fn word(data: &[u8], index: usize) -> Result<&[u8]> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        return Err(eyre!(
            "Event data too short: need word {} of {} bytes",
            index,
            data.len()
        ));
    }
    Ok(&data[start..end])
}

fn uint_word(data: &[u8], index: usize) -> Result<U256> {
    Ok(U256::from_be_slice(word(data, index)?))
}

fn address_word(data: &[u8], index: usize) -> Result<Address> {
    let w = word(data, index)?;
    // Addresses are right-aligned; the leading 12 bytes must be zero
    if w[..12].iter().any(|b| *b != 0) {
        return Err(eyre!("Word {} is not a valid address", index));
    }
    Ok(Address::from_slice(&w[12..]))
}

/// Read an ABI dynamic `bytes` value whose offset lives at `offset_index`.
fn dynamic_bytes(data: &[u8], offset_index: usize) -> Result<Vec<u8>> {
    let offset: usize = uint_word(data, offset_index)?
        .try_into()
        .map_err(|_| eyre!("Dynamic bytes offset overflows usize"))?;
    if offset % 32 != 0 || data.len() < offset + 32 {
        return Err(eyre!("Invalid dynamic bytes offset {}", offset));
    }
    let len: usize = U256::from_be_slice(&data[offset..offset + 32])
        .try_into()
        .map_err(|_| eyre!("Dynamic bytes length overflows usize"))?;
    let start = offset + 32;
    if data.len() < start + len {
        return Err(eyre!(
            "Dynamic bytes truncated: want {} bytes at {}",
            len,
            start
        ));
    }
    Ok(data[start..start + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, Log as PrimitiveLog};

    fn make_log(topic: B256, data: Vec<u8>) -> Log {
        let inner = PrimitiveLog::new_unchecked(
            Address::repeat_byte(0x11),
            vec![topic],
            Bytes::from(data),
        );
        Log {
            inner,
            block_hash: None,
            block_number: Some(1042),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0xab)),
            transaction_index: None,
            log_index: Some(3),
            removed: false,
        }
    }

    fn push_word_u64(data: &mut Vec<u8>, value: u64) {
        let mut w = [0u8; 32];
        w[24..].copy_from_slice(&value.to_be_bytes());
        data.extend_from_slice(&w);
    }

    fn push_padded_bytes(data: &mut Vec<u8>, bytes: &[u8]) {
        push_word_u64(data, bytes.len() as u64);
        data.extend_from_slice(bytes);
        let pad = (32 - bytes.len() % 32) % 32;
        data.extend(std::iter::repeat(0u8).take(pad));
    }

    fn swap_data(nonce: u64, recipient: &[u8], amount: u64) -> Vec<u8> {
        let mut data = Vec::new();
        push_word_u64(&mut data, nonce);
        push_word_u64(&mut data, 0x60); // offset to recipient bytes
        push_word_u64(&mut data, amount);
        push_padded_bytes(&mut data, recipient);
        data
    }

    fn swap_token_data(nonce: u64, recipient: &[u8], amount: u64, token: Address) -> Vec<u8> {
        let mut data = Vec::new();
        push_word_u64(&mut data, nonce);
        push_word_u64(&mut data, 0x80);
        push_word_u64(&mut data, amount);
        let mut w = [0u8; 32];
        w[12..].copy_from_slice(token.as_slice());
        data.extend_from_slice(&w);
        push_padded_bytes(&mut data, recipient);
        data
    }

    #[test]
    fn decodes_native_swap() {
        let log = make_log(swap_signature(), swap_data(7, b"secret1recipientaddr", 100));
        let event = decode_log(&log).unwrap().unwrap();

        match event {
            WalletEvent::Deposit(dep) => {
                assert_eq!(dep.event_name, EVENT_SWAP);
                assert_eq!(dep.nonce, 7);
                assert_eq!(dep.amount, "100");
                assert_eq!(dep.recipient, b"secret1recipientaddr");
                assert_eq!(dep.token, None);
                assert_eq!(dep.block_number, 1042);
            }
            other => panic!("Expected deposit, got {:?}", other),
        }
    }

    #[test]
    fn decodes_token_swap() {
        let token = Address::repeat_byte(0x42);
        let log = make_log(
            swap_token_signature(),
            swap_token_data(9, b"secret1tokenrecipient", 5000, token),
        );
        let event = decode_log(&log).unwrap().unwrap();

        match event {
            WalletEvent::Deposit(dep) => {
                assert_eq!(dep.event_name, EVENT_SWAP_TOKEN);
                assert_eq!(dep.nonce, 9);
                assert_eq!(dep.amount, "5000");
                assert_eq!(dep.token, Some(token));
            }
            other => panic!("Expected deposit, got {:?}", other),
        }
    }

    #[test]
    fn decodes_withdraw_and_failure() {
        let mut data = Vec::new();
        push_word_u64(&mut data, 42);
        let ok = decode_log(&make_log(withdraw_signature(), data.clone()))
            .unwrap()
            .unwrap();
        match ok {
            WalletEvent::Withdrawal(w) => {
                assert_eq!(w.event_name, EVENT_WITHDRAW);
                assert_eq!(w.transaction_id, 42);
                assert!(w.success);
            }
            other => panic!("Expected withdrawal, got {:?}", other),
        }

        let failed = decode_log(&make_log(withdraw_failure_signature(), data))
            .unwrap()
            .unwrap();
        match failed {
            WalletEvent::Withdrawal(w) => {
                assert_eq!(w.event_name, EVENT_WITHDRAW_FAILURE);
                assert!(!w.success);
            }
            other => panic!("Expected withdrawal, got {:?}", other),
        }
    }

    #[test]
    fn unknown_topic_is_skipped() {
        let log = make_log(keccak256(b"SomethingElse(uint256)"), vec![0u8; 32]);
        assert_eq!(decode_log(&log).unwrap(), None);
    }

    #[test]
    fn truncated_data_is_an_error_not_a_panic() {
        let log = make_log(swap_signature(), vec![0u8; 40]);
        assert!(decode_log(&log).is_err());
    }

    #[test]
    fn bogus_dynamic_offset_is_rejected() {
        let mut data = Vec::new();
        push_word_u64(&mut data, 1);
        push_word_u64(&mut data, 0xFFFF); // offset far past the data
        push_word_u64(&mut data, 100);
        let log = make_log(swap_signature(), data);
        assert!(decode_log(&log).is_err());
    }

    #[test]
    fn event_names_never_cross() {
        // A SwapToken payload under the Swap topic still decodes as "Swap"
        // with no token: dispatch is keyed on the topic alone.
        let token = Address::repeat_byte(0x42);
        let log = make_log(swap_signature(), swap_token_data(1, b"secret1x", 10, token));
        let event = decode_log(&log).unwrap().unwrap();
        assert_eq!(event.name(), EVENT_SWAP);
    }
}
