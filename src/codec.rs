// src/codec.rs

use crate::crypto::{hash_bytes_sha256, keccak256};
use crate::types::{Hash, Header, Transaction, SEAL_BYTES};

pub const CODEC_VERSION: u8 = 1;
pub const DOM_TX: &[u8] = b"TX";
pub const DOM_HDR: &[u8] = b"HDR";
pub const DOM_SEAL: &[u8] = b"SEAL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Truncated,
    TrailingBytes,
    BadLength,
    BadDomain,
    UnknownMessageType(u8),
    UnknownReason(u8),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Truncated => write!(f, "input truncated"),
            CodecError::TrailingBytes => write!(f, "trailing bytes after decode"),
            CodecError::BadLength => write!(f, "field has wrong length"),
            CodecError::BadDomain => write!(f, "version or domain tag mismatch"),
            CodecError::UnknownMessageType(t) => write!(f, "invalid type: 0x{:02x}", t),
            CodecError::UnknownReason(r) => write!(f, "invalid change-view reason: 0x{:02x}", r),
        }
    }
}

impl std::error::Error for CodecError {}

// --- helpers: write primitives deterministically ---

pub fn put_u64(dst: &mut Vec<u8>, x: u64) {
    dst.extend_from_slice(&x.to_le_bytes());
}

pub fn put_u32(dst: &mut Vec<u8>, x: u32) {
    dst.extend_from_slice(&x.to_le_bytes());
}

/// 4-byte little-endian length, then the bytes.
pub fn put_bytes(dst: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(dst, bytes.len() as u32);
    dst.extend_from_slice(bytes);
}

/// Cursor over an input buffer; every read is bounds-checked.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() - self.pos < n {
            return Err(CodecError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let b = self.take(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(b);
        Ok(arr)
    }

    /// Counterpart of `put_bytes`.
    pub fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn expect(&mut self, tag: &[u8]) -> Result<(), CodecError> {
        if self.take(tag.len())? != tag {
            return Err(CodecError::BadDomain);
        }
        Ok(())
    }

    pub fn finish(&self) -> Result<(), CodecError> {
        if self.pos != self.buf.len() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(())
    }
}

// --- transactions ---

pub fn tx_bytes(tx: &Transaction) -> Vec<u8> {
    let mut v = vec![CODEC_VERSION];
    v.extend_from_slice(DOM_TX);
    put_u64(&mut v, tx.nonce);
    v.extend_from_slice(&tx.to);
    put_u64(&mut v, tx.value);
    put_bytes(&mut v, &tx.data);
    v
}

pub fn tx_hash(tx: &Transaction) -> Hash {
    hash_bytes_sha256(&tx_bytes(tx))
}

/// Strict inverse of `tx_bytes`; decrypted envelope payloads come through
/// here and anything malformed is skipped by the caller.
pub fn decode_tx(bytes: &[u8]) -> Result<Transaction, CodecError> {
    let mut r = Reader::new(bytes);
    r.expect(&[CODEC_VERSION])?;
    r.expect(DOM_TX)?;
    let nonce = r.u64()?;
    let to = r.array::<20>()?;
    let value = r.u64()?;
    let data = r.bytes()?.to_vec();
    r.finish()?;
    Ok(Transaction { nonce, to, value, data })
}

// --- headers ---

pub fn header_bytes(h: &Header) -> Vec<u8> {
    let mut v = vec![CODEC_VERSION];
    v.extend_from_slice(DOM_HDR);
    v.extend_from_slice(&h.parent_hash);
    put_u64(&mut v, h.height);
    v.extend_from_slice(&h.tx_root);
    v.extend_from_slice(&h.state_root);
    v.extend_from_slice(&h.receipts_root);
    put_u64(&mut v, h.timestamp);
    put_bytes(&mut v, &h.extra_data);
    v.extend_from_slice(&h.mix_digest);
    v.extend_from_slice(&h.nonce);
    v
}

pub fn decode_header(bytes: &[u8]) -> Result<Header, CodecError> {
    let mut r = Reader::new(bytes);
    r.expect(&[CODEC_VERSION])?;
    r.expect(DOM_HDR)?;
    let parent_hash = r.array::<32>()?;
    let height = r.u64()?;
    let tx_root = r.array::<32>()?;
    let state_root = r.array::<32>()?;
    let receipts_root = r.array::<32>()?;
    let timestamp = r.u64()?;
    let extra_data = r.bytes()?.to_vec();
    let mix_digest = r.array::<32>()?;
    let nonce = r.array::<8>()?;
    r.finish()?;
    Ok(Header {
        parent_hash,
        height,
        tx_root,
        state_root,
        receipts_root,
        timestamp,
        extra_data,
        mix_digest,
        nonce,
    })
}

/// Pre-image of the seal hash: mix digest, nonce and the trailing signature
/// suffix of extra-data are masked because they are populated after sealing.
fn header_seal_bytes(h: &Header) -> Vec<u8> {
    let mut v = vec![CODEC_VERSION];
    v.extend_from_slice(DOM_SEAL);
    v.extend_from_slice(&h.parent_hash);
    put_u64(&mut v, h.height);
    v.extend_from_slice(&h.tx_root);
    v.extend_from_slice(&h.state_root);
    v.extend_from_slice(&h.receipts_root);
    put_u64(&mut v, h.timestamp);
    let keep = h.extra_data.len().saturating_sub(SEAL_BYTES);
    put_bytes(&mut v, &h.extra_data[..keep]);
    v
}

/// Full-header hash (every field).
pub fn header_hash(h: &Header) -> Hash {
    keccak256(&header_bytes(h))
}

/// The signing subject for every consensus signature, and the identity of a
/// sealed block.
pub fn header_seal_hash(h: &Header) -> Hash {
    keccak256(&header_seal_bytes(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ZERO_ADDRESS;

    fn header() -> Header {
        let mut h = Header::empty();
        h.height = 3;
        h.tx_root = [7u8; 32];
        h.timestamp = 12345;
        h
    }

    #[test]
    fn tx_roundtrip() {
        let tx = Transaction::new(9, ZERO_ADDRESS, 40, vec![1, 2, 3]);
        assert_eq!(decode_tx(&tx_bytes(&tx)).unwrap(), tx);
    }

    #[test]
    fn tx_decode_rejects_trailing_bytes() {
        let tx = Transaction::new(0, ZERO_ADDRESS, 0, vec![]);
        let mut b = tx_bytes(&tx);
        b.push(0);
        assert_eq!(decode_tx(&b), Err(CodecError::TrailingBytes));
    }

    #[test]
    fn header_roundtrip() {
        let h = header();
        assert_eq!(decode_header(&header_bytes(&h)).unwrap(), h);
    }

    #[test]
    fn seal_hash_masks_post_seal_fields() {
        let h = header();
        let mut sealed = h.clone();
        sealed.mix_digest = [0xaa; 32];
        sealed.nonce = [0xbb; 8];
        let suffix_start = sealed.extra_data.len() - SEAL_BYTES;
        sealed.extra_data[suffix_start..].fill(0xcc);

        assert_eq!(header_seal_hash(&h), header_seal_hash(&sealed));
        assert_ne!(header_hash(&h), header_hash(&sealed));
    }

    #[test]
    fn seal_hash_tracks_tx_root() {
        let h = header();
        let mut changed = h.clone();
        changed.tx_root = [8u8; 32];
        assert_ne!(header_seal_hash(&h), header_seal_hash(&changed));
    }
}
