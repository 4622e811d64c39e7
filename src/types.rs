// src/types.rs

use serde::{Deserialize, Serialize};

pub type Hash = [u8; 32];

/// 20-byte account address, go-ethereum style.
pub type Address = [u8; 20];

/// Sentinel recipient for carrier transactions. The decryption service fee is
/// paid to this address; whether it is burned or redistributed is a chain
/// integration decision.
pub const ZERO_ADDRESS: Address = [0u8; 20];

/// Number of trailing extra-data bytes reserved for the aggregate block
/// signature (a compressed G2 point).
pub const SEAL_BYTES: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub to: Address,
    pub value: u64,
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(nonce: u64, to: Address, value: u64, data: Vec<u8>) -> Self {
        Self { nonce, to, value, data }
    }

    /// A carrier transaction: pays `value` to the zero address and embeds an
    /// envelope byte-string in its data field.
    pub fn carrier(nonce: u64, value: u64, envelope_bytes: Vec<u8>) -> Self {
        Self::new(nonce, ZERO_ADDRESS, value, envelope_bytes)
    }
}

/// Block header. Two phases of it exist during consensus: the pre-seal
/// proposal (ordering fixed, envelope plaintext unknown) and the final header
/// (tx root and state root recomputed over decrypted transactions). The mix
/// digest, nonce and the trailing signature suffix of `extra_data` are
/// populated after sealing and are therefore excluded from the seal hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: Hash,
    pub height: u64,
    pub tx_root: Hash,
    pub state_root: Hash,
    pub receipts_root: Hash,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_digest: Hash,
    pub nonce: [u8; 8],
}

impl Header {
    /// Fresh header with the seal suffix zeroed out.
    pub fn empty() -> Self {
        Self {
            parent_hash: [0u8; 32],
            height: 0,
            tx_root: [0u8; 32],
            state_root: [0u8; 32],
            receipts_root: [0u8; 32],
            timestamp: 0,
            extra_data: vec![0u8; SEAL_BYTES],
            mix_digest: [0u8; 32],
            nonce: [0u8; 8],
        }
    }
}
