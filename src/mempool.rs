// src/mempool.rs

use tracing::debug;

use crate::envelope::{admit_carrier, AdmissionError, Envelope};
use crate::types::{Hash, Transaction};
use crate::codec::tx_hash;

/// Two disjoint ordered pools: legacy transactions and envelope carriers.
/// Admission for legacy txs is the caller's business; carriers go through the
/// envelope checks. Lookups are linear scans — the pools hold at most one
/// block's worth of transactions.
#[derive(Debug, Default, Clone)]
pub struct TxPools {
    legacy: Vec<Transaction>,
    envelope: Vec<Transaction>,
}

impl TxPools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pend_legacy(&mut self, tx: Transaction) {
        self.legacy.push(tx);
    }

    pub fn pend_envelope(
        &mut self,
        tx: Transaction,
        key_enabled_height: u64,
    ) -> Result<(), AdmissionError> {
        admit_carrier(&tx, key_enabled_height)?;
        self.envelope.push(tx);
        Ok(())
    }

    /// Drop envelopes encrypted under a key that is no longer live.
    pub fn refresh_envelopes(&mut self, key_enabled_height: u64) {
        self.envelope.retain(|tx| match Envelope::from_bytes(&tx.data) {
            Ok(env) => env.encrypt_height >= key_enabled_height,
            Err(_) => {
                debug!("dropping unparseable envelope from pool");
                false
            }
        });
    }

    /// Resolve a proposed hash. Envelopes are searched first to preserve the
    /// carrier-prefix ordering contract; the flag reports which pool matched.
    pub fn find(&self, hash: &Hash) -> Option<(&Transaction, bool)> {
        for tx in &self.envelope {
            if tx_hash(tx) == *hash {
                return Some((tx, true));
            }
        }
        for tx in &self.legacy {
            if tx_hash(tx) == *hash {
                return Some((tx, false));
            }
        }
        None
    }

    pub fn envelopes(&self) -> &[Transaction] {
        &self.envelope
    }

    pub fn legacy(&self) -> &[Transaction] {
        &self.legacy
    }

    pub fn envelope_len(&self) -> usize {
        self.envelope.len()
    }

    pub fn legacy_len(&self) -> usize {
        self.legacy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelope.is_empty() && self.legacy.is_empty()
    }

    pub fn clear(&mut self) {
        self.legacy.clear();
        self.envelope.clear();
    }
}
