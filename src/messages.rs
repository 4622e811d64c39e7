// src/messages.rs
//
// Consensus message schema. Every payload is a common header (type, block
// index, validator index, view number) plus a type-specific body, signed with
// a threshold signature share over the serialized header+body — the witness.
// Witness verification is the sole authentication on inbound messages.

use serde::{Deserialize, Serialize};

use crate::codec::{self, put_bytes, put_u32, put_u64, CodecError, Reader};
use crate::crypto::tpke::{
    self, DecryptionShare, PrivateKeyShare, PublicKeyShare, SignatureShare, SHARE_BYTES,
    SIG_SHARE_BYTES,
};
use crate::types::{Hash, Header};

// Wire discriminants (dBFT payload numbering; 0x22 was reserved for the
// share-agreement message and carries Finalize).
pub const CHANGE_VIEW_TYPE: u8 = 0x00;
pub const PREPARE_REQUEST_TYPE: u8 = 0x20;
pub const PREPARE_RESPONSE_TYPE: u8 = 0x21;
pub const FINALIZE_TYPE: u8 = 0x22;
pub const COMMIT_TYPE: u8 = 0x30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub sealing_proposal: Header,
    pub tx_hashes: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub preparation_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    /// One decryption share per carrier envelope, in proposal order.
    pub decrypt_shares: Vec<DecryptionShare>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub final_hash: Hash,
    /// The sender's signature share over `final_hash`.
    pub signature: SignatureShare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChangeViewReason {
    Timeout = 0x00,
    ChangeAgreement = 0x01,
    TxNotFound = 0x02,
    TxRejectedByPolicy = 0x03,
    TxInvalid = 0x04,
    BlockRejectedByPolicy = 0x05,
}

impl ChangeViewReason {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Timeout),
            0x01 => Some(Self::ChangeAgreement),
            0x02 => Some(Self::TxNotFound),
            0x03 => Some(Self::TxRejectedByPolicy),
            0x04 => Some(Self::TxInvalid),
            0x05 => Some(Self::BlockRejectedByPolicy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeView {
    /// Not transmitted; reconstructed as `view_number + 1` on decode.
    pub new_view_number: u8,
    /// Nanosecond-precision payload timestamp.
    pub timestamp: u64,
    pub reason: ChangeViewReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusBody {
    PrepareRequest(PrepareRequest),
    PrepareResponse(PrepareResponse),
    Finalize(Finalize),
    Commit(Commit),
    ChangeView(ChangeView),
}

impl ConsensusBody {
    pub fn kind(&self) -> u8 {
        match self {
            ConsensusBody::PrepareRequest(_) => PREPARE_REQUEST_TYPE,
            ConsensusBody::PrepareResponse(_) => PREPARE_RESPONSE_TYPE,
            ConsensusBody::Finalize(_) => FINALIZE_TYPE,
            ConsensusBody::Commit(_) => COMMIT_TYPE,
            ConsensusBody::ChangeView(_) => CHANGE_VIEW_TYPE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub block_index: u64,
    pub validator_index: u8,
    pub view_number: u8,
    pub body: ConsensusBody,
}

impl Message {
    /// Deterministic serialization of header + body; the witness signs this.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut v = Vec::new();
        v.push(self.body.kind());
        put_u64(&mut v, self.block_index);
        v.push(self.validator_index);
        v.push(self.view_number);
        match &self.body {
            ConsensusBody::PrepareRequest(p) => {
                put_bytes(&mut v, &codec::header_bytes(&p.sealing_proposal));
                put_u32(&mut v, p.tx_hashes.len() as u32);
                for h in &p.tx_hashes {
                    v.extend_from_slice(h);
                }
            }
            ConsensusBody::PrepareResponse(p) => {
                v.extend_from_slice(&p.preparation_hash);
            }
            ConsensusBody::Finalize(f) => {
                put_u32(&mut v, f.decrypt_shares.len() as u32);
                for s in &f.decrypt_shares {
                    put_bytes(&mut v, &s.0);
                }
            }
            ConsensusBody::Commit(c) => {
                v.extend_from_slice(&c.final_hash);
                v.extend_from_slice(&c.signature.0);
            }
            ConsensusBody::ChangeView(cv) => {
                // new_view_number is implied by the header's view number
                put_u64(&mut v, cv.timestamp);
                v.push(cv.reason as u8);
            }
        }
        v
    }
}

/// A consensus message plus its witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub message: Message,
    pub witness: SignatureShare,
}

impl Payload {
    pub fn sign(message: Message, key: &PrivateKeyShare) -> Self {
        let witness = key.sign_share(&message.signing_bytes());
        Self { message, witness }
    }

    pub fn verify(&self, pk: &PublicKeyShare) -> bool {
        tpke::verify_share(pk, &self.message.signing_bytes(), &self.witness)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut v = self.message.signing_bytes();
        v.extend_from_slice(&self.witness.0);
        v
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let kind = r.u8()?;
        let block_index = r.u64()?;
        let validator_index = r.u8()?;
        let view_number = r.u8()?;

        let body = match kind {
            CHANGE_VIEW_TYPE => {
                let timestamp = r.u64()?;
                let reason_byte = r.u8()?;
                let reason = ChangeViewReason::from_byte(reason_byte)
                    .ok_or(CodecError::UnknownReason(reason_byte))?;
                ConsensusBody::ChangeView(ChangeView {
                    new_view_number: view_number.wrapping_add(1),
                    timestamp,
                    reason,
                })
            }
            PREPARE_REQUEST_TYPE => {
                let header_bytes = r.bytes()?;
                let sealing_proposal = codec::decode_header(header_bytes)?;
                let count = r.u32()? as usize;
                if count > 65_536 {
                    return Err(CodecError::BadLength);
                }
                let mut tx_hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    tx_hashes.push(r.array::<32>()?);
                }
                ConsensusBody::PrepareRequest(PrepareRequest {
                    sealing_proposal,
                    tx_hashes,
                })
            }
            PREPARE_RESPONSE_TYPE => ConsensusBody::PrepareResponse(PrepareResponse {
                preparation_hash: r.array::<32>()?,
            }),
            FINALIZE_TYPE => {
                let count = r.u32()? as usize;
                if count > 65_536 {
                    return Err(CodecError::BadLength);
                }
                let mut decrypt_shares = Vec::with_capacity(count);
                for _ in 0..count {
                    let share = r.bytes()?;
                    if share.len() != SHARE_BYTES {
                        return Err(CodecError::BadLength);
                    }
                    let mut arr = [0u8; SHARE_BYTES];
                    arr.copy_from_slice(share);
                    decrypt_shares.push(DecryptionShare(arr));
                }
                ConsensusBody::Finalize(Finalize { decrypt_shares })
            }
            COMMIT_TYPE => {
                let final_hash = r.array::<32>()?;
                let signature = SignatureShare(r.array::<SIG_SHARE_BYTES>()?);
                ConsensusBody::Commit(Commit {
                    final_hash,
                    signature,
                })
            }
            other => return Err(CodecError::UnknownMessageType(other)),
        };

        let witness = SignatureShare(r.array::<SIG_SHARE_BYTES>()?);
        r.finish()?;
        Ok(Self {
            message: Message {
                block_index,
                validator_index,
                view_number,
                body,
            },
            witness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tpke::Dkg;
    use rand::thread_rng;

    fn keys() -> (PrivateKeyShare, PublicKeyShare, PublicKeyShare) {
        let dkg = Dkg::generate(4, 2, &mut thread_rng()).unwrap();
        (
            dkg.private_share(1).unwrap(),
            dkg.public_share(1).unwrap(),
            dkg.public_share(2).unwrap(),
        )
    }

    fn signed(body: ConsensusBody, key: &PrivateKeyShare) -> Payload {
        Payload::sign(
            Message {
                block_index: 4,
                validator_index: key.index(),
                view_number: 2,
                body,
            },
            key,
        )
    }

    #[test]
    fn witness_authenticates_sender() {
        let (key, pk, other_pk) = keys();
        let payload = signed(
            ConsensusBody::PrepareResponse(PrepareResponse {
                preparation_hash: [9u8; 32],
            }),
            &key,
        );
        assert!(payload.verify(&pk));
        assert!(!payload.verify(&other_pk));

        let mut tampered = payload;
        tampered.message.view_number = 3;
        assert!(!tampered.verify(&pk));
    }

    #[test]
    fn wire_roundtrip_all_kinds() {
        let (key, _, _) = keys();
        let bodies = vec![
            ConsensusBody::PrepareRequest(PrepareRequest {
                sealing_proposal: Header::empty(),
                tx_hashes: vec![[1u8; 32], [2u8; 32]],
            }),
            ConsensusBody::PrepareResponse(PrepareResponse {
                preparation_hash: [3u8; 32],
            }),
            ConsensusBody::Finalize(Finalize {
                decrypt_shares: vec![DecryptionShare([4u8; 48])],
            }),
            ConsensusBody::Commit(Commit {
                final_hash: [5u8; 32],
                signature: SignatureShare([6u8; 96]),
            }),
        ];
        for body in bodies {
            let payload = signed(body, &key);
            let decoded = Payload::from_bytes(&payload.to_bytes()).unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn change_view_reconstructs_next_view() {
        let (key, _, _) = keys();
        // the sender's new_view_number is derived, not carried on the wire
        let payload = signed(
            ConsensusBody::ChangeView(ChangeView {
                new_view_number: 3,
                timestamp: 1_700_000_000_000,
                reason: ChangeViewReason::Timeout,
            }),
            &key,
        );
        let decoded = Payload::from_bytes(&payload.to_bytes()).unwrap();
        let ConsensusBody::ChangeView(cv) = &decoded.message.body else {
            panic!("wrong body kind");
        };
        assert_eq!(cv.new_view_number, decoded.message.view_number + 1);
        assert_eq!(cv.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Payload::from_bytes(&[0x41, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0]);
        assert_eq!(err, Err(CodecError::UnknownMessageType(0x41)));
    }
}
