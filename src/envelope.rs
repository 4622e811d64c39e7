// src/envelope.rs
//
// Encrypted transactions travel as envelopes inside regular carrier
// transactions: the carrier pays the decryption service fee to the zero
// address and holds the envelope byte-string in its data field. Key-holders
// see only the seed ciphertext until ordering is fixed.

use serde::{Deserialize, Serialize};

use crate::codec::{put_u64, Reader};
use crate::crypto::tpke::{Ciphertext, CIPHERTEXT_BYTES};
use crate::types::{Transaction, ZERO_ADDRESS};

/// 8-byte height prefix, fixed-width seed ciphertext, payload ciphertext.
pub const ENVELOPE_MIN_BYTES: usize = 8 + CIPHERTEXT_BYTES;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// First height at which the global key used for encryption is live.
    pub encrypt_height: u64,
    /// TPKE ciphertext over the random seed point.
    pub encrypted_seed: Ciphertext,
    /// Payload bytes, symmetrically encrypted under the seed-derived key.
    pub encrypted_tx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    Malformed,
    Expired,
    FeeTooLow { want: u64, have: u64 },
    BadRecipient,
    BadCommitment,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::Malformed => write!(f, "malformed envelope"),
            AdmissionError::Expired => write!(f, "encryption expired"),
            AdmissionError::FeeTooLow { want, have } => {
                write!(f, "not enough service fee: want {}, have {}", want, have)
            }
            AdmissionError::BadRecipient => write!(f, "wrong payment target"),
            AdmissionError::BadCommitment => write!(f, "seed commitment verification failed"),
        }
    }
}

impl std::error::Error for AdmissionError {}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(ENVELOPE_MIN_BYTES + self.encrypted_tx.len());
        put_u64(&mut v, self.encrypt_height);
        v.extend_from_slice(&self.encrypted_seed.to_bytes());
        v.extend_from_slice(&self.encrypted_tx);
        v
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AdmissionError> {
        if bytes.len() < ENVELOPE_MIN_BYTES {
            return Err(AdmissionError::Malformed);
        }
        let mut r = Reader::new(bytes);
        let encrypt_height = r.u64().map_err(|_| AdmissionError::Malformed)?;
        let seed_bytes = r.take(CIPHERTEXT_BYTES).map_err(|_| AdmissionError::Malformed)?;
        let encrypted_seed =
            Ciphertext::from_bytes(seed_bytes).map_err(|_| AdmissionError::Malformed)?;
        let encrypted_tx = bytes[ENVELOPE_MIN_BYTES..].to_vec();
        Ok(Self {
            encrypt_height,
            encrypted_seed,
            encrypted_tx,
        })
    }

    /// Service fee for decrypting this envelope. Could be a base fee plus a
    /// per-byte component for large payloads; flat zero for now.
    pub fn compute_fee(&self) -> u64 {
        0
    }
}

/// Admission check for a carrier transaction. Only resolvable, funded,
/// correctly addressed envelopes with a valid seed commitment get in; a valid
/// commitment with an undecryptable payload is the submitter's own loss and
/// no key-holder can be blamed for it.
pub fn admit_carrier(
    tx: &Transaction,
    key_enabled_height: u64,
) -> Result<Envelope, AdmissionError> {
    let envelope = Envelope::from_bytes(&tx.data)?;
    if envelope.encrypt_height < key_enabled_height {
        return Err(AdmissionError::Expired);
    }
    let want = envelope.compute_fee();
    if tx.value < want {
        return Err(AdmissionError::FeeTooLow { want, have: tx.value });
    }
    if tx.to != ZERO_ADDRESS {
        return Err(AdmissionError::BadRecipient);
    }
    envelope
        .encrypted_seed
        .verify()
        .map_err(|_| AdmissionError::BadCommitment)?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tpke::{random_seed, Dkg};
    use rand::thread_rng;

    fn sample_envelope(encrypt_height: u64) -> Envelope {
        let mut rng = thread_rng();
        let dkg = Dkg::generate(4, 2, &mut rng).unwrap();
        let seed = random_seed(&mut rng).unwrap();
        let ct = dkg.global_public_key().encrypt(&seed, &mut rng).unwrap();
        Envelope {
            encrypt_height,
            encrypted_seed: ct,
            encrypted_tx: vec![0xde, 0xad, 0xbe, 0xef],
        }
    }

    #[test]
    fn envelope_roundtrip() {
        let env = sample_envelope(5);
        assert_eq!(Envelope::from_bytes(&env.to_bytes()).unwrap(), env);
    }

    #[test]
    fn short_input_is_malformed() {
        assert_eq!(
            Envelope::from_bytes(&[0u8; ENVELOPE_MIN_BYTES - 1]),
            Err(AdmissionError::Malformed)
        );
    }

    #[test]
    fn admission_accepts_valid_carrier() {
        let env = sample_envelope(3);
        let tx = Transaction::carrier(0, env.compute_fee(), env.to_bytes());
        assert_eq!(admit_carrier(&tx, 3).unwrap(), env);
    }

    #[test]
    fn admission_rejects_expired_envelope() {
        let env = sample_envelope(0);
        let tx = Transaction::carrier(0, env.compute_fee(), env.to_bytes());
        assert_eq!(admit_carrier(&tx, 1), Err(AdmissionError::Expired));
    }

    #[test]
    fn admission_rejects_wrong_recipient() {
        let env = sample_envelope(0);
        let mut tx = Transaction::carrier(0, env.compute_fee(), env.to_bytes());
        tx.to = [1u8; 20];
        assert_eq!(admit_carrier(&tx, 0), Err(AdmissionError::BadRecipient));
    }

    #[test]
    fn admission_rejects_tampered_commitment() {
        let env = sample_envelope(0);
        let mut bytes = env.to_bytes();
        // flip one bit inside V; points still decompress, the proof fails
        bytes[8 + 50] ^= 0x01;
        let tx = Transaction::carrier(0, env.compute_fee(), bytes);
        let got = admit_carrier(&tx, 0);
        assert!(
            got == Err(AdmissionError::BadCommitment) || got == Err(AdmissionError::Malformed),
            "unexpected admission result: {:?}",
            got
        );
    }

    #[test]
    fn admission_rejects_garbage_data() {
        let tx = Transaction::carrier(0, 0, vec![0u8; ENVELOPE_MIN_BYTES + 4]);
        assert_eq!(admit_carrier(&tx, 0), Err(AdmissionError::Malformed));
    }
}
