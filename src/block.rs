// src/block.rs

use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::crypto::tpke::AggregateSignature;
use crate::types::{Hash, Header, Transaction};

/// Which validator indices contributed the signature shares behind the
/// aggregate (index-aligned with the 1-based validator numbering).
pub type SignerBitmap = BitVec;

/// A finalized block: the final header, the decrypted ordered transaction
/// list and the aggregate threshold signature over the seal hash. The chain
/// integration writes the signature into the header's extra-data seal suffix
/// when persisting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlock {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub signature: AggregateSignature,
    pub signers: SignerBitmap,
}

impl SealedBlock {
    /// Block identity: the seal hash of the final header.
    pub fn hash(&self) -> Hash {
        codec::header_seal_hash(&self.header)
    }
}
