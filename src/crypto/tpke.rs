//! Threshold public-key encryption and threshold BLS signing over BLS12-381.
//!
//! - Uses blst::min_pk (PK=48B G1, SIG=96B G2).
//! - Key shares come from a Shamir polynomial of degree `threshold` over the
//!   scalar field, evaluated at the 1-based validator index; `threshold + 1`
//!   cooperating share-holders reconstruct. Decryption entry points take the
//!   polynomial degree, signature aggregation takes the share count.
//! - A seed ciphertext is (U, V, W): U = g1^k, V = seed + PK^k (ElGamal over
//!   G1), W = H2(U||V)^k. W doubles as a self-consistency proof that anyone
//!   can check from the ciphertext alone, and lets an aggregator confirm a
//!   candidate combination without knowing any secret.
//! - Aggregation interpolates in the exponent with exact field inverses; the
//!   DKG scaler is threaded through every call unchanged and the network size
//!   bound of the scaled-integer scheme (8 validators) is kept.
//!
//! Private key shares never leave the owning validator's memory; do NOT
//! serialize or ship them.

use blst::min_pk as mpk;
use blst::{
    blst_bendian_from_scalar, blst_fp12, blst_fp12_finalverify, blst_fr, blst_fr_add,
    blst_fr_eucl_inverse, blst_fr_from_scalar, blst_fr_from_uint64, blst_fr_mul, blst_fr_sub,
    blst_hash_to_g2, blst_miller_loop, blst_p1, blst_p1_add_or_double, blst_p1_affine,
    blst_p1_affine_compress, blst_p1_cneg, blst_p1_from_affine, blst_p1_mult,
    blst_p1_to_affine, blst_p1_uncompress, blst_p2, blst_p2_add_or_double, blst_p2_affine,
    blst_p2_affine_compress, blst_p2_from_affine, blst_p2_mult, blst_p2_to_affine,
    blst_p2_uncompress, blst_scalar, blst_scalar_from_bendian, blst_scalar_from_fr, BLST_ERROR,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// Domain separation constants
const DST_SEED: &[u8] = b"SEALBFT-TPKE-SEED-V1";
const DST_SIG: &[u8] = b"SEALBFT-TPKE-SIG-V1";
const DST_AES: &[u8] = b"SEALBFT-TPKE-AES-V1";

pub const PUBLIC_KEY_BYTES: usize = 48; // G1 compressed
pub const SHARE_BYTES: usize = 48; // G1 decryption share
pub const SIG_SHARE_BYTES: usize = 96; // G2 signature share
pub const CIPHERTEXT_BYTES: usize = 192; // U(48) + V(48) + W(96)

/// The scaled-integer variant of this scheme overflows past 8 key-holders;
/// the bound stays even though interpolation is exact here.
pub const MAX_VALIDATORS: usize = 8;

/// Errors for threshold operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpkeError {
    InvalidPublicKey,
    InvalidCiphertext,
    InvalidShare,
    InvalidScaler,
    KeyGeneration,
    TooManyValidators { have: usize, max: usize },
    InsufficientShares { have: usize, need: usize },
    NoValidSubset,
    SignatureAggregation,
    SymmetricFailure,
}

impl std::fmt::Display for TpkeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TpkeError::InvalidPublicKey => write!(f, "invalid threshold public key"),
            TpkeError::InvalidCiphertext => write!(f, "invalid seed ciphertext"),
            TpkeError::InvalidShare => write!(f, "invalid threshold share"),
            TpkeError::InvalidScaler => write!(f, "invalid aggregation scaler"),
            TpkeError::KeyGeneration => write!(f, "key generation failed"),
            TpkeError::TooManyValidators { have, max } => {
                write!(f, "validator set too large: {} (max {})", have, max)
            }
            TpkeError::InsufficientShares { have, need } => {
                write!(f, "insufficient shares: have {}, need {}", have, need)
            }
            TpkeError::NoValidSubset => write!(f, "no consistent share subset found"),
            TpkeError::SignatureAggregation => write!(f, "signature share aggregation failed"),
            TpkeError::SymmetricFailure => write!(f, "symmetric encryption failed"),
        }
    }
}

impl std::error::Error for TpkeError {}

// -----------------------------------------------------------------------------
// Key material
// -----------------------------------------------------------------------------

/// Global encryption key published to users (G1 point).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPublicKey {
    #[serde_as(as = "[_; 48]")]
    pub bytes: [u8; PUBLIC_KEY_BYTES],
}

/// One validator's public key share (G1 point at the validator's index).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyShare {
    pub index: u8,
    #[serde_as(as = "[_; 48]")]
    pub bytes: [u8; PUBLIC_KEY_BYTES],
}

/// One validator's long-lived private key share. Kept as raw scalar bytes,
/// validated at construction.
#[derive(Clone)]
pub struct PrivateKeyShare {
    index: u8,
    bytes: [u8; 32],
}

/// Decryption share: the holder's DH contribution U^{s_i} for one ciphertext.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionShare(#[serde_as(as = "[_; 48]")] pub [u8; SHARE_BYTES]);

/// Partial BLS signature by one key-holder.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureShare(#[serde_as(as = "[_; 96]")] pub [u8; SIG_SHARE_BYTES]);

/// Fully aggregated BLS signature, verifiable under the global public key.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSignature(#[serde_as(as = "[_; 96]")] pub [u8; SIG_SHARE_BYTES]);

/// A random group element; hashing it yields the symmetric key for an
/// envelope payload.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPoint(#[serde_as(as = "[_; 48]")] pub [u8; PUBLIC_KEY_BYTES]);

/// TPKE ciphertext over a seed point: U = g^k, V = seed + PK^k, W = H2(U||V)^k.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    #[serde_as(as = "[_; 48]")]
    u: [u8; 48],
    #[serde_as(as = "[_; 48]")]
    v: [u8; 48],
    #[serde_as(as = "[_; 96]")]
    w: [u8; 96],
}

impl PrivateKeyShare {
    pub fn from_bytes(index: u8, bytes: &[u8; 32]) -> Result<Self, TpkeError> {
        mpk::SecretKey::from_bytes(bytes).map_err(|_| TpkeError::InvalidShare)?;
        Ok(Self { index, bytes: *bytes })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    fn signer(&self) -> mpk::SecretKey {
        mpk::SecretKey::from_bytes(&self.bytes).expect("key bytes validated at construction")
    }

    pub fn public_share(&self) -> PublicKeyShare {
        PublicKeyShare {
            index: self.index,
            bytes: self.signer().sk_to_pk().to_bytes(),
        }
    }

    /// Produce this holder's DH share U^{s_i} for a ciphertext.
    pub fn decrypt_share(&self, ct: &Ciphertext) -> Result<DecryptionShare, TpkeError> {
        let u = uncompress_p1(&ct.u).ok_or(TpkeError::InvalidCiphertext)?;
        let scalar = scalar_from_bendian(&self.bytes);
        let mut proj = blst_p1::default();
        let mut share = blst_p1::default();
        let mut aff = blst_p1_affine::default();
        let mut out = [0u8; SHARE_BYTES];
        unsafe {
            blst_p1_from_affine(&mut proj, &u);
            blst_p1_mult(&mut share, &proj, scalar.b.as_ptr(), 255);
            blst_p1_to_affine(&mut aff, &share);
            blst_p1_affine_compress(out.as_mut_ptr(), &aff);
        }
        Ok(DecryptionShare(out))
    }

    /// Partial BLS signature over `msg`.
    pub fn sign_share(&self, msg: &[u8]) -> SignatureShare {
        let sig = self.signer().sign(msg, DST_SIG, &[]);
        SignatureShare(sig.to_bytes())
    }
}

impl std::fmt::Debug for PrivateKeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key bytes
        write!(f, "PrivateKeyShare {{ index: {} }}", self.index)
    }
}

impl GlobalPublicKey {
    pub fn from_bytes(bytes: &[u8; 48]) -> Result<Self, TpkeError> {
        mpk::PublicKey::from_bytes(bytes).map_err(|_| TpkeError::InvalidPublicKey)?;
        Ok(Self { bytes: *bytes })
    }

    /// Encrypt a seed point to the key-holder committee.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        seed: &SeedPoint,
        rng: &mut R,
    ) -> Result<Ciphertext, TpkeError> {
        let mut ikm = [0u8; 32];
        rng.fill_bytes(&mut ikm);
        let k = mpk::SecretKey::key_gen(&ikm, &[]).map_err(|_| TpkeError::KeyGeneration)?;
        let u = k.sk_to_pk().to_bytes();

        let pk_aff = uncompress_p1(&self.bytes).ok_or(TpkeError::InvalidPublicKey)?;
        let seed_aff = uncompress_p1(&seed.0).ok_or(TpkeError::InvalidCiphertext)?;
        let k_scalar = scalar_from_bendian(&k.to_bytes());

        let mut v = [0u8; 48];
        unsafe {
            let mut pk_proj = blst_p1::default();
            blst_p1_from_affine(&mut pk_proj, &pk_aff);
            let mut shared = blst_p1::default();
            blst_p1_mult(&mut shared, &pk_proj, k_scalar.b.as_ptr(), 255);

            let mut seed_proj = blst_p1::default();
            blst_p1_from_affine(&mut seed_proj, &seed_aff);
            let mut v_proj = blst_p1::default();
            blst_p1_add_or_double(&mut v_proj, &seed_proj, &shared);
            let mut v_aff = blst_p1_affine::default();
            blst_p1_to_affine(&mut v_aff, &v_proj);
            blst_p1_affine_compress(v.as_mut_ptr(), &v_aff);
        }

        let mut msg = [0u8; 96];
        msg[..48].copy_from_slice(&u);
        msg[48..].copy_from_slice(&v);
        let w = k.sign(&msg, DST_SEED, &[]).to_bytes();

        Ok(Ciphertext { u, v, w })
    }
}

impl Ciphertext {
    pub fn to_bytes(&self) -> [u8; CIPHERTEXT_BYTES] {
        let mut out = [0u8; CIPHERTEXT_BYTES];
        out[..48].copy_from_slice(&self.u);
        out[48..96].copy_from_slice(&self.v);
        out[96..].copy_from_slice(&self.w);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TpkeError> {
        if bytes.len() != CIPHERTEXT_BYTES {
            return Err(TpkeError::InvalidCiphertext);
        }
        let mut u = [0u8; 48];
        let mut v = [0u8; 48];
        let mut w = [0u8; 96];
        u.copy_from_slice(&bytes[..48]);
        v.copy_from_slice(&bytes[48..96]);
        w.copy_from_slice(&bytes[96..]);
        // decompression doubles as a subgroup check on every component
        uncompress_p1(&u).ok_or(TpkeError::InvalidCiphertext)?;
        uncompress_p1(&v).ok_or(TpkeError::InvalidCiphertext)?;
        uncompress_p2(&w).ok_or(TpkeError::InvalidCiphertext)?;
        Ok(Self { u, v, w })
    }

    /// Check the committed randomness: W must be H2(U||V)^k for the same k
    /// that produced U. Expressed as a BLS verification with U as the public
    /// key, so no secret material is needed.
    pub fn verify(&self) -> Result<(), TpkeError> {
        let pk = mpk::PublicKey::from_bytes(&self.u).map_err(|_| TpkeError::InvalidCiphertext)?;
        let sig = mpk::Signature::from_bytes(&self.w).map_err(|_| TpkeError::InvalidCiphertext)?;
        let mut msg = [0u8; 96];
        msg[..48].copy_from_slice(&self.u);
        msg[48..].copy_from_slice(&self.v);
        if sig.verify(true, &msg, DST_SEED, &[], &pk, true) != BLST_ERROR::BLST_SUCCESS {
            return Err(TpkeError::InvalidCiphertext);
        }
        Ok(())
    }
}

/// Random seed point for envelope encryption.
pub fn random_seed<R: RngCore + CryptoRng>(rng: &mut R) -> Result<SeedPoint, TpkeError> {
    let mut ikm = [0u8; 32];
    rng.fill_bytes(&mut ikm);
    let sk = mpk::SecretKey::key_gen(&ikm, &[]).map_err(|_| TpkeError::KeyGeneration)?;
    Ok(SeedPoint(sk.sk_to_pk().to_bytes()))
}

// -----------------------------------------------------------------------------
// Distributed key generation
// -----------------------------------------------------------------------------

/// Trusted-dealer stand-in for the DKG ceremony: Shamir shares of a master
/// secret over the BLS12-381 scalar field, evaluated at the 1-based validator
/// index. Output matches what a real ceremony would publish: per-validator
/// key shares, the global public key and the aggregation scaler.
pub struct Dkg {
    validators: usize,
    threshold: usize,
    scaler: u64,
    share_bytes: Vec<[u8; 32]>,
    global: [u8; PUBLIC_KEY_BYTES],
}

impl Dkg {
    pub fn generate<R: RngCore + CryptoRng>(
        validators: usize,
        threshold: usize,
        rng: &mut R,
    ) -> Result<Self, TpkeError> {
        if validators == 0 || validators > MAX_VALIDATORS {
            return Err(TpkeError::TooManyValidators {
                have: validators,
                max: MAX_VALIDATORS,
            });
        }
        if threshold == 0 || threshold >= validators {
            return Err(TpkeError::KeyGeneration);
        }

        // polynomial of degree `threshold`; coefficient 0 is the master secret
        let mut coefficients = Vec::with_capacity(threshold + 1);
        for _ in 0..=threshold {
            coefficients.push(random_fr(rng)?);
        }

        // evaluate at each validator index with Horner's method
        let mut share_bytes = Vec::with_capacity(validators);
        for index in 1..=validators {
            let x = fr_from_u64(index as u64);
            let mut result = coefficients[coefficients.len() - 1];
            for coeff in coefficients.iter().rev().skip(1) {
                unsafe {
                    let mut scaled = blst_fr::default();
                    blst_fr_mul(&mut scaled, &result, &x);
                    let mut next = blst_fr::default();
                    blst_fr_add(&mut next, &scaled, coeff);
                    result = next;
                }
            }
            let bytes = bendian_from_fr(&result);
            // re-create a SecretKey to guarantee the bytes are valid for blst
            let normalized = mpk::SecretKey::from_bytes(&bytes)
                .map(|sk| sk.to_bytes())
                .expect("share scalar within curve order");
            share_bytes.push(normalized);
        }

        let master = bendian_from_fr(&coefficients[0]);
        let global = mpk::SecretKey::from_bytes(&master)
            .map_err(|_| TpkeError::KeyGeneration)?
            .sk_to_pk()
            .to_bytes();

        Ok(Self {
            validators,
            threshold,
            scaler: factorial(validators as u64),
            share_bytes,
            global,
        })
    }

    pub fn validators(&self) -> usize {
        self.validators
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Scaler accompanying the key material; supply it unchanged to every
    /// aggregation call.
    pub fn scaler(&self) -> u64 {
        self.scaler
    }

    pub fn global_public_key(&self) -> GlobalPublicKey {
        GlobalPublicKey { bytes: self.global }
    }

    /// Private share for a 1-based validator index.
    pub fn private_share(&self, index: u8) -> Option<PrivateKeyShare> {
        if index == 0 || index as usize > self.validators {
            return None;
        }
        Some(PrivateKeyShare {
            index,
            bytes: self.share_bytes[index as usize - 1],
        })
    }

    pub fn public_share(&self, index: u8) -> Option<PublicKeyShare> {
        self.private_share(index).map(|s| s.public_share())
    }
}

// -----------------------------------------------------------------------------
// Verification & aggregation
// -----------------------------------------------------------------------------

/// Verify a partial signature against one key-holder's public share.
/// This is the sole authentication applied to inbound consensus messages.
pub fn verify_share(pk: &PublicKeyShare, msg: &[u8], share: &SignatureShare) -> bool {
    let pk = match mpk::PublicKey::from_bytes(&pk.bytes).ok() {
        Some(pk) => pk,
        None => return false,
    };
    let sig = match mpk::Signature::from_bytes(&share.0).ok() {
        Some(sig) => sig,
        None => return false,
    };
    sig.verify(true, msg, DST_SIG, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
}

/// Recover the seed point of every ciphertext from per-validator share lists.
///
/// `threshold` is the sharing polynomial degree, so `threshold + 1` shares
/// make a candidate subset. A candidate combination is accepted only if it
/// passes the ciphertext's pairing check against the global key, which turns
/// a corrupt share into an aggregation error instead of a garbage seed.
/// Subsets are tried in index order, smallest first; the subset that worked
/// for the previous ciphertext is tried first for the next one.
pub fn aggregate_decrypt(
    cts: &[Ciphertext],
    shares_by_index: &BTreeMap<u8, Vec<DecryptionShare>>,
    pk: &GlobalPublicKey,
    threshold: usize,
    scaler: u64,
) -> Result<Vec<SeedPoint>, TpkeError> {
    if scaler == 0 {
        return Err(TpkeError::InvalidScaler);
    }
    let need = threshold + 1;

    // only validators that supplied one share per ciphertext are usable
    let candidates: Vec<u8> = shares_by_index
        .iter()
        .filter(|(_, shares)| shares.len() == cts.len())
        .map(|(index, _)| *index)
        .collect();
    if candidates.len() < need {
        return Err(TpkeError::InsufficientShares {
            have: candidates.len(),
            need,
        });
    }
    if cts.is_empty() {
        return Ok(Vec::new());
    }

    let pk_aff = uncompress_p1(&pk.bytes).ok_or(TpkeError::InvalidPublicKey)?;
    let subsets = combinations(&candidates, need);
    let mut coeff_cache: Vec<Option<Vec<blst_fr>>> = vec![None; subsets.len()];
    let mut preferred: Option<usize> = None;

    let mut seeds = Vec::with_capacity(cts.len());
    for (ct_pos, ct) in cts.iter().enumerate() {
        let v_aff = uncompress_p1(&ct.v).ok_or(TpkeError::InvalidCiphertext)?;
        let w_aff = uncompress_p2(&ct.w).ok_or(TpkeError::InvalidCiphertext)?;
        let proof_point = seed_proof_point(&ct.u, &ct.v);

        let mut order: Vec<usize> = (0..subsets.len()).collect();
        if let Some(p) = preferred {
            order.retain(|&i| i != p);
            order.insert(0, p);
        }

        let mut recovered = None;
        for subset_pos in order {
            let subset = &subsets[subset_pos];
            let coeffs = coeff_cache[subset_pos]
                .get_or_insert_with(|| lagrange_coefficients(subset))
                .clone();

            let mut points = Vec::with_capacity(subset.len());
            let mut usable = true;
            for index in subset {
                let share = &shares_by_index[index][ct_pos];
                match uncompress_p1(&share.0) {
                    Some(aff) => points.push(aff),
                    None => {
                        usable = false;
                        break;
                    }
                }
            }
            if !usable {
                continue;
            }

            let combined = match combine_p1(&points, &coeffs) {
                Some(p) => p,
                None => continue,
            };
            let mut combined_aff = blst_p1_affine::default();
            unsafe {
                blst_p1_to_affine(&mut combined_aff, &combined);
            }
            // candidate must satisfy e(candidate, H2(U||V)) == e(PK, W)
            if !pairing_eq(&combined_aff, &proof_point, &pk_aff, &w_aff) {
                continue;
            }

            // seed = V - PK^k
            let mut seed_bytes = [0u8; 48];
            unsafe {
                let mut v_proj = blst_p1::default();
                blst_p1_from_affine(&mut v_proj, &v_aff);
                let mut neg = combined;
                blst_p1_cneg(&mut neg, true);
                let mut seed_proj = blst_p1::default();
                blst_p1_add_or_double(&mut seed_proj, &v_proj, &neg);
                let mut seed_aff = blst_p1_affine::default();
                blst_p1_to_affine(&mut seed_aff, &seed_proj);
                blst_p1_affine_compress(seed_bytes.as_mut_ptr(), &seed_aff);
            }
            preferred = Some(subset_pos);
            recovered = Some(SeedPoint(seed_bytes));
            break;
        }

        match recovered {
            Some(seed) => seeds.push(seed),
            None => return Err(TpkeError::NoValidSubset),
        }
    }
    Ok(seeds)
}

/// Combine `threshold` signature shares into a full signature and verify it
/// under the global public key. Shares are taken in index order; callers are
/// expected to have verified each share individually beforehand.
pub fn aggregate_and_verify_sig(
    pk: &GlobalPublicKey,
    msg: &[u8],
    threshold: usize,
    shares_by_index: &BTreeMap<u8, SignatureShare>,
    scaler: u64,
) -> Result<AggregateSignature, TpkeError> {
    if scaler == 0 {
        return Err(TpkeError::InvalidScaler);
    }
    if shares_by_index.len() < threshold {
        return Err(TpkeError::InsufficientShares {
            have: shares_by_index.len(),
            need: threshold,
        });
    }

    let selected: Vec<(u8, &SignatureShare)> = shares_by_index
        .iter()
        .take(threshold)
        .map(|(index, share)| (*index, share))
        .collect();
    let xs: Vec<u8> = selected.iter().map(|(index, _)| *index).collect();
    let coeffs = lagrange_coefficients(&xs);

    let mut points = Vec::with_capacity(selected.len());
    for (_, share) in &selected {
        points.push(uncompress_p2(&share.0).ok_or(TpkeError::InvalidShare)?);
    }
    let combined = combine_p2(&points, &coeffs).ok_or(TpkeError::SignatureAggregation)?;

    let mut sig_bytes = [0u8; SIG_SHARE_BYTES];
    unsafe {
        let mut aff = blst_p2_affine::default();
        blst_p2_to_affine(&mut aff, &combined);
        blst_p2_affine_compress(sig_bytes.as_mut_ptr(), &aff);
    }

    let pk = mpk::PublicKey::from_bytes(&pk.bytes).map_err(|_| TpkeError::InvalidPublicKey)?;
    let sig =
        mpk::Signature::from_bytes(&sig_bytes).map_err(|_| TpkeError::SignatureAggregation)?;
    if sig.verify(true, msg, DST_SIG, &[], &pk, true) != BLST_ERROR::BLST_SUCCESS {
        return Err(TpkeError::SignatureAggregation);
    }
    Ok(AggregateSignature(sig_bytes))
}

// -----------------------------------------------------------------------------
// Symmetric layer for envelope payloads
// -----------------------------------------------------------------------------

fn aes_key(seed: &SeedPoint) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DST_AES);
    hasher.update(seed.0);
    hasher.finalize().into()
}

/// AES-256-GCM encryption under a key derived from the seed point.
/// Output layout: 12-byte nonce, then ciphertext + tag.
pub fn aes_encrypt<R: RngCore + CryptoRng>(
    seed: &SeedPoint,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, TpkeError> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    let cipher =
        Aes256Gcm::new_from_slice(&aes_key(seed)).map_err(|_| TpkeError::SymmetricFailure)?;
    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| TpkeError::SymmetricFailure)?;
    let mut out = nonce.to_vec();
    out.extend_from_slice(&ct);
    Ok(out)
}

pub fn aes_decrypt(seed: &SeedPoint, data: &[u8]) -> Result<Vec<u8>, TpkeError> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    if data.len() < 12 {
        return Err(TpkeError::SymmetricFailure);
    }
    let cipher =
        Aes256Gcm::new_from_slice(&aes_key(seed)).map_err(|_| TpkeError::SymmetricFailure)?;
    cipher
        .decrypt(Nonce::from_slice(&data[..12]), &data[12..])
        .map_err(|_| TpkeError::SymmetricFailure)
}

// -----------------------------------------------------------------------------
// Field & curve helpers
// -----------------------------------------------------------------------------

fn fr_from_u64(x: u64) -> blst_fr {
    let mut out = blst_fr::default();
    let arr = [x, 0, 0, 0];
    unsafe {
        blst_fr_from_uint64(&mut out, arr.as_ptr());
    }
    out
}

fn random_fr<R: RngCore + CryptoRng>(rng: &mut R) -> Result<blst_fr, TpkeError> {
    // route through key_gen so the scalar is uniform mod the curve order
    let mut ikm = [0u8; 32];
    rng.fill_bytes(&mut ikm);
    let sk = mpk::SecretKey::key_gen(&ikm, &[]).map_err(|_| TpkeError::KeyGeneration)?;
    let scalar = scalar_from_bendian(&sk.to_bytes());
    let mut fr = blst_fr::default();
    unsafe {
        blst_fr_from_scalar(&mut fr, &scalar);
    }
    Ok(fr)
}

fn scalar_from_bendian(bytes: &[u8; 32]) -> blst_scalar {
    let mut scalar = blst_scalar::default();
    unsafe {
        blst_scalar_from_bendian(&mut scalar, bytes.as_ptr());
    }
    scalar
}

fn scalar_from_fr(fr: &blst_fr) -> blst_scalar {
    let mut scalar = blst_scalar::default();
    unsafe {
        blst_scalar_from_fr(&mut scalar, fr);
    }
    scalar
}

fn bendian_from_fr(fr: &blst_fr) -> [u8; 32] {
    let scalar = scalar_from_fr(fr);
    let mut out = [0u8; 32];
    unsafe {
        blst_bendian_from_scalar(out.as_mut_ptr(), &scalar);
    }
    out
}

fn uncompress_p1(bytes: &[u8; 48]) -> Option<blst_p1_affine> {
    let mut aff = blst_p1_affine::default();
    let rc = unsafe { blst_p1_uncompress(&mut aff, bytes.as_ptr()) };
    if rc == BLST_ERROR::BLST_SUCCESS {
        Some(aff)
    } else {
        None
    }
}

fn uncompress_p2(bytes: &[u8; 96]) -> Option<blst_p2_affine> {
    let mut aff = blst_p2_affine::default();
    let rc = unsafe { blst_p2_uncompress(&mut aff, bytes.as_ptr()) };
    if rc == BLST_ERROR::BLST_SUCCESS {
        Some(aff)
    } else {
        None
    }
}

/// Lagrange coefficients at zero for the distinct evaluation points `xs`.
fn lagrange_coefficients(xs: &[u8]) -> Vec<blst_fr> {
    let mut out = Vec::with_capacity(xs.len());
    for (i, &xi) in xs.iter().enumerate() {
        let mut lagrange = fr_from_u64(1);
        let x_i = fr_from_u64(xi as u64);
        for (j, &xj) in xs.iter().enumerate() {
            if i == j {
                continue;
            }
            let x_j = fr_from_u64(xj as u64);
            unsafe {
                let mut denominator = blst_fr::default();
                blst_fr_sub(&mut denominator, &x_j, &x_i);
                let mut inv = blst_fr::default();
                blst_fr_eucl_inverse(&mut inv, &denominator);
                let mut term = blst_fr::default();
                blst_fr_mul(&mut term, &x_j, &inv);
                let mut next = blst_fr::default();
                blst_fr_mul(&mut next, &lagrange, &term);
                lagrange = next;
            }
        }
        out.push(lagrange);
    }
    out
}

fn combine_p1(points: &[blst_p1_affine], coeffs: &[blst_fr]) -> Option<blst_p1> {
    let mut acc: Option<blst_p1> = None;
    for (aff, coeff) in points.iter().zip(coeffs) {
        let scalar = scalar_from_fr(coeff);
        let mut proj = blst_p1::default();
        let mut term = blst_p1::default();
        unsafe {
            blst_p1_from_affine(&mut proj, aff);
            blst_p1_mult(&mut term, &proj, scalar.b.as_ptr(), 255);
        }
        acc = Some(match acc {
            None => term,
            Some(prev) => {
                let mut sum = blst_p1::default();
                unsafe {
                    blst_p1_add_or_double(&mut sum, &prev, &term);
                }
                sum
            }
        });
    }
    acc
}

fn combine_p2(points: &[blst_p2_affine], coeffs: &[blst_fr]) -> Option<blst_p2> {
    let mut acc: Option<blst_p2> = None;
    for (aff, coeff) in points.iter().zip(coeffs) {
        let scalar = scalar_from_fr(coeff);
        let mut proj = blst_p2::default();
        let mut term = blst_p2::default();
        unsafe {
            blst_p2_from_affine(&mut proj, aff);
            blst_p2_mult(&mut term, &proj, scalar.b.as_ptr(), 255);
        }
        acc = Some(match acc {
            None => term,
            Some(prev) => {
                let mut sum = blst_p2::default();
                unsafe {
                    blst_p2_add_or_double(&mut sum, &prev, &term);
                }
                sum
            }
        });
    }
    acc
}

/// e(p_a, q_a) == e(p_b, q_b)
fn pairing_eq(
    p_a: &blst_p1_affine,
    q_a: &blst_p2_affine,
    p_b: &blst_p1_affine,
    q_b: &blst_p2_affine,
) -> bool {
    unsafe {
        let mut left = blst_fp12::default();
        let mut right = blst_fp12::default();
        blst_miller_loop(&mut left, q_a, p_a);
        blst_miller_loop(&mut right, q_b, p_b);
        blst_fp12_finalverify(&left, &right)
    }
}

fn seed_proof_point(u: &[u8; 48], v: &[u8; 48]) -> blst_p2_affine {
    let mut msg = [0u8; 96];
    msg[..48].copy_from_slice(u);
    msg[48..].copy_from_slice(v);
    let mut proj = blst_p2::default();
    let mut aff = blst_p2_affine::default();
    unsafe {
        blst_hash_to_g2(
            &mut proj,
            msg.as_ptr(),
            msg.len(),
            DST_SEED.as_ptr(),
            DST_SEED.len(),
            std::ptr::null(),
            0,
        );
        blst_p2_to_affine(&mut aff, &proj);
    }
    aff
}

fn factorial(n: u64) -> u64 {
    (1..=n).product()
}

/// Sorted k-subsets of `pool`, lexicographic order.
fn combinations(pool: &[u8], k: usize) -> Vec<Vec<u8>> {
    fn rec(pool: &[u8], k: usize, start: usize, cur: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) {
        if cur.len() == k {
            out.push(cur.clone());
            return;
        }
        let needed = k - cur.len();
        let mut i = start;
        while i + needed <= pool.len() {
            cur.push(pool[i]);
            rec(pool, k, i + 1, cur, out);
            cur.pop();
            i += 1;
        }
    }
    let mut out = Vec::new();
    let mut cur = Vec::with_capacity(k);
    rec(pool, k, 0, &mut cur, &mut out);
    out
}
