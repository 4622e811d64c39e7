//src/crypto.rs

use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::types::Hash;

pub mod tpke;

const MERKLE_DOMAIN: &[u8] = b"MRKL";

pub fn hash_bytes_sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256, the header hash function (matches the surrounding chain's
/// sealing convention).
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn parent_hash(left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(MERKLE_DOMAIN.len() + 32 + 32);
    buf.extend_from_slice(MERKLE_DOMAIN);
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    hash_bytes_sha256(&buf)
}

pub fn merkle_root(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => {
            // Convention: empty tree -> hash of empty bytes
            hash_bytes_sha256(&[])
        }
        1 => leaves[0],
        _ => {
            let mut level: Vec<Hash> = leaves.to_vec();
            while level.len() > 1 {
                if level.len() % 2 == 1 {
                    let last = *level.last().unwrap();
                    level.push(last);
                }
                let mut next: Vec<Hash> = Vec::with_capacity(level.len() / 2);
                for pair in level.chunks(2) {
                    next.push(parent_hash(&pair[0], &pair[1]));
                }
                level = next;
            }
            level[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merkle_root_is_order_sensitive() {
        let a = hash_bytes_sha256(b"a");
        let b = hash_bytes_sha256(b"b");
        let c = hash_bytes_sha256(b"c");
        assert_ne!(merkle_root(&[a, b, c]), merkle_root(&[b, a, c]));
        assert_eq!(merkle_root(&[a]), a);
    }

    #[test]
    fn keccak_differs_from_sha256() {
        assert_ne!(keccak256(b"x"), hash_bytes_sha256(b"x"));
    }
}
