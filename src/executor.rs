// src/executor.rs
//
// Collaborator seams. Execution semantics, transaction-root hashing and wall
// clocks live outside the consensus core; the node only needs deterministic
// answers that every honest validator computes identically.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{self, put_u64};
use crate::crypto::{hash_bytes_sha256, merkle_root};
use crate::types::{Hash, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub state_root: Hash,
    pub receipts_root: Hash,
}

/// Runs an ordered transaction list and reports the resulting roots. Called
/// once on the carrier prefix at proposal time and once on the final list
/// after decryption.
pub trait Executor: Send {
    fn execute(&self, height: u64, txs: &[Transaction]) -> ExecutionOutcome;
}

/// Produces the transaction root committed in headers.
pub trait TxRootHasher: Send {
    fn tx_root(&self, txs: &[Transaction]) -> Hash;
}

/// Timestamp source for change-view payloads.
pub trait Clock: Send {
    fn unix_nanos(&self) -> u64;
}

/// Default tx-root: binary Merkle tree over transaction hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MerkleTxHasher;

impl TxRootHasher for MerkleTxHasher {
    fn tx_root(&self, txs: &[Transaction]) -> Hash {
        let hashes: Vec<Hash> = txs.iter().map(codec::tx_hash).collect();
        merkle_root(&hashes)
    }
}

const DOM_STATE: &[u8] = b"STATE";
const DOM_RECEIPTS: &[u8] = b"RCPT";

/// Placeholder executor: roots are digests of the inputs. Deterministic
/// across validators, which is all the consensus core relies on.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestExecutor;

impl DigestExecutor {
    fn digest(domain: &[u8], height: u64, txs: &[Transaction]) -> Hash {
        let mut buf = Vec::with_capacity(domain.len() + 8 + txs.len() * 32);
        buf.extend_from_slice(domain);
        put_u64(&mut buf, height);
        for tx in txs {
            buf.extend_from_slice(&codec::tx_hash(tx));
        }
        hash_bytes_sha256(&buf)
    }
}

impl Executor for DigestExecutor {
    fn execute(&self, height: u64, txs: &[Transaction]) -> ExecutionOutcome {
        ExecutionOutcome {
            state_root: Self::digest(DOM_STATE, height, txs),
            receipts_root: Self::digest(DOM_RECEIPTS, height, txs),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_nanos(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ZERO_ADDRESS;

    #[test]
    fn digest_executor_is_input_sensitive() {
        let a = Transaction::new(1, ZERO_ADDRESS, 0, vec![]);
        let b = Transaction::new(2, ZERO_ADDRESS, 0, vec![]);
        let exec = DigestExecutor;
        let one = exec.execute(1, &[a.clone()]);
        let two = exec.execute(1, &[a, b]);
        assert_ne!(one.state_root, two.state_root);
        assert_ne!(one.state_root, one.receipts_root);
    }
}
