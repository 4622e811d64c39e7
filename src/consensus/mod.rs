//! Four-phase dBFT with threshold decryption woven between ordering and
//! sealing.
//!
//! A proposer fixes the transaction ordering with a PrepareRequest; the
//! PrepareResponse quorum commits that ordering. Only then do validators
//! reveal decryption shares (Finalize), rebuild the block with the decrypted
//! payloads, and exchange signature shares over the final header (Commit).
//! Revealing a decryption share is the point of no return for a view: once a
//! validator has shared, rolling back through a view change could leak
//! plaintext without producing a block, so `view_lock` refuses change-view
//! votes from that moment on.
//!
//! Quorum rules: with `n` the validator set size, a phase advances at
//! `q = 2n/3 + 1` collected votes. Triggers fire on `>= q` and are latched
//! (`view_lock`, `dbft_finalized`, `dbft_committed`) so each transition runs
//! at most once per view. Vote pools are dense per-index slots: counting is
//! O(n), duplicates from one sender simply overwrite.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::block::{SealedBlock, SignerBitmap};
use crate::codec;
use crate::crypto::tpke::{self, GlobalPublicKey, PrivateKeyShare, PublicKeyShare};
use crate::envelope::{AdmissionError, Envelope};
use crate::executor::{Clock, DigestExecutor, Executor, MerkleTxHasher, SystemClock, TxRootHasher};
use crate::mempool::TxPools;
use crate::messages::{
    ChangeView, ChangeViewReason, Commit, ConsensusBody, Finalize, Message, Payload,
    PrepareRequest, PrepareResponse,
};
use crate::types::{Hash, Header, Transaction, SEAL_BYTES};

pub mod event_loop;

/// Inbound queue capacity; outbound peer queues use the same bound.
pub const CHANNEL_CAPACITY: usize = 100;

/// What a validator's event loop consumes: consensus traffic from peers plus
/// local commands, so embedders can drive a running node without sharing
/// mutable state with it.
#[derive(Debug)]
pub enum NodeEvent {
    Message(Payload),
    PendLegacy(Transaction),
    PendEnvelope(Transaction),
    Propose,
}

/// By-value wiring endpoint for one validator: where to send, and the key
/// share that authenticates what comes back.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub index: u8,
    pub sender: mpsc::Sender<NodeEvent>,
    pub public_key: PublicKeyShare,
}

pub struct Node {
    index: u8,
    secret: PrivateKeyShare,
    public: PublicKeyShare,
    peer_keys: Vec<Option<PublicKeyShare>>,
    global_pk: GlobalPublicKey,
    key_enabled_height: u64,
    scaler: u64,
    validator_count: usize,

    blocks: HashMap<u64, SealedBlock>,
    height: u64,
    view: u8,
    view_lock: bool,
    tx_list: Vec<Transaction>,
    envelope_count: usize,
    final_tx_list: Vec<Transaction>,
    proposal: Option<Header>,

    prepare_responses: Vec<Option<PrepareResponse>>,
    finalizes: Vec<Option<Finalize>>,
    dbft_finalized: bool,
    commits: Vec<Option<Commit>>,
    dbft_committed: bool,
    change_views: Vec<Option<ChangeView>>,

    pools: TxPools,
    executor: Box<dyn Executor>,
    hasher: Box<dyn TxRootHasher>,
    clock: Box<dyn Clock>,

    outbound: Vec<mpsc::Sender<NodeEvent>>,
    inbound: mpsc::Receiver<NodeEvent>,
    inbound_tx: mpsc::Sender<NodeEvent>,
}

fn filled<T>(slots: &[Option<T>]) -> usize {
    slots.iter().filter(|slot| slot.is_some()).count()
}

impl Node {
    /// Set up a validator from its DKG output. `validator_count` is the full
    /// set size including this node; indices are 1-based.
    pub fn new(
        secret: PrivateKeyShare,
        global_pk: GlobalPublicKey,
        key_enabled_height: u64,
        scaler: u64,
        validator_count: usize,
    ) -> Self {
        let slots = validator_count + 1;
        let (inbound_tx, inbound) = mpsc::channel(CHANNEL_CAPACITY);
        let public = secret.public_share();
        Self {
            index: secret.index(),
            secret,
            public,
            peer_keys: vec![None; slots],
            global_pk,
            key_enabled_height,
            scaler,
            validator_count,
            blocks: HashMap::new(),
            height: 0,
            view: 0,
            view_lock: false,
            tx_list: Vec::new(),
            envelope_count: 0,
            final_tx_list: Vec::new(),
            proposal: None,
            prepare_responses: vec![None; slots],
            finalizes: vec![None; slots],
            dbft_finalized: false,
            commits: vec![None; slots],
            dbft_committed: false,
            change_views: vec![None; slots],
            pools: TxPools::new(),
            executor: Box::new(DigestExecutor),
            hasher: Box::new(MerkleTxHasher),
            clock: Box::new(SystemClock),
            outbound: Vec::new(),
            inbound,
            inbound_tx,
        }
    }

    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_hasher(mut self, hasher: Box<dyn TxRootHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// This node's wiring endpoint, for handing to its peers.
    pub fn peer_handle(&self) -> PeerHandle {
        PeerHandle {
            index: self.index,
            sender: self.inbound_tx.clone(),
            public_key: self.public.clone(),
        }
    }

    /// Register every other validator's endpoint and key share. The own
    /// entry is skipped: a node never delivers to itself.
    pub fn connect(&mut self, peers: &[PeerHandle]) {
        for peer in peers {
            if peer.index == self.index {
                continue;
            }
            if peer.index == 0 || peer.index as usize > self.validator_count {
                warn!(index = peer.index, "ignoring peer with out-of-range index");
                continue;
            }
            self.outbound.push(peer.sender.clone());
            self.peer_keys[peer.index as usize] = Some(peer.public_key.clone());
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn public_key(&self) -> &PublicKeyShare {
        &self.public
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn view(&self) -> u8 {
        self.view
    }

    pub fn view_lock(&self) -> bool {
        self.view_lock
    }

    pub fn dbft_finalized(&self) -> bool {
        self.dbft_finalized
    }

    pub fn dbft_committed(&self) -> bool {
        self.dbft_committed
    }

    pub fn block(&self, height: u64) -> Option<&SealedBlock> {
        self.blocks.get(&height)
    }

    pub fn mempool(&self) -> &TxPools {
        &self.pools
    }

    pub fn prepare_response_count(&self) -> usize {
        filled(&self.prepare_responses)
    }

    pub fn finalize_count(&self) -> usize {
        filled(&self.finalizes)
    }

    pub fn commit_count(&self) -> usize {
        filled(&self.commits)
    }

    pub fn change_view_count(&self) -> usize {
        filled(&self.change_views)
    }

    pub fn set_key_enabled_height(&mut self, height: u64) {
        self.key_enabled_height = height;
    }

    fn quorum(&self) -> usize {
        // n = 3f + 1  =>  quorum = 2f + 1 = floor(2n/3) + 1
        2 * self.validator_count / 3 + 1
    }

    fn decrypt_threshold(&self) -> usize {
        2 * self.validator_count / 3
    }

    fn signature_threshold(&self) -> usize {
        2 * self.validator_count / 3 + 1
    }

    // --- mempool surface ---

    pub fn pend_legacy_tx(&mut self, tx: Transaction) {
        self.pools.pend_legacy(tx);
    }

    pub fn pend_enveloped_tx(&mut self, tx: Transaction) -> Result<(), AdmissionError> {
        self.pools.pend_envelope(tx, self.key_enabled_height)
    }

    pub fn refresh_envelope_pool(&mut self) {
        self.pools.refresh_envelopes(self.key_enabled_height);
    }

    // --- proposing ---

    /// Leader entry point: snapshot the pools (envelopes first, so carriers
    /// form the list prefix), execute the carrier prefix for a provisional
    /// state root, and broadcast the ordering proposal.
    pub fn propose(&mut self) {
        let envelope_count = self.pools.envelope_len();
        let mut tx_list = self.pools.envelopes().to_vec();
        tx_list.extend_from_slice(self.pools.legacy());
        let tx_hashes: Vec<Hash> = tx_list.iter().map(codec::tx_hash).collect();

        // carriers must have paid for decryption before anything is revealed
        let outcome = self.executor.execute(self.height + 1, &tx_list[..envelope_count]);
        let parent_hash = self
            .blocks
            .get(&self.height)
            .map(|b| b.hash())
            .unwrap_or([0u8; 32]);

        let header = Header {
            parent_hash,
            height: self.height + 1,
            tx_root: self.hasher.tx_root(&tx_list),
            state_root: outcome.state_root,
            receipts_root: outcome.receipts_root,
            timestamp: self.clock.unix_nanos(),
            extra_data: vec![0u8; SEAL_BYTES],
            mix_digest: [0u8; 32],
            nonce: [0u8; 8],
        };

        self.proposal = Some(header.clone());
        self.tx_list = tx_list;
        self.envelope_count = envelope_count;

        self.broadcast(ConsensusBody::PrepareRequest(PrepareRequest {
            sealing_proposal: header,
            tx_hashes,
        }));
    }

    /// Ask peers to move past the current view; an external timer policy
    /// decides when. The vote is not applied locally.
    pub fn broadcast_change_view(&mut self, reason: ChangeViewReason) {
        let body = ConsensusBody::ChangeView(ChangeView {
            new_view_number: self.view.wrapping_add(1),
            timestamp: self.clock.unix_nanos(),
            reason,
        });
        self.broadcast(body);
    }

    fn broadcast(&self, body: ConsensusBody) {
        let message = Message {
            block_index: self.height + 1,
            validator_index: self.index,
            view_number: self.view,
            body,
        };
        let payload = Payload::sign(message, &self.secret);
        for peer in &self.outbound {
            if peer.try_send(NodeEvent::Message(payload.clone())).is_err() {
                warn!(
                    kind = payload.message.body.kind(),
                    "outbound queue full or closed, dropping consensus message"
                );
            }
        }
    }

    // --- event handling ---

    pub fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Message(payload) => self.handle_message(payload),
            NodeEvent::PendLegacy(tx) => self.pend_legacy_tx(tx),
            NodeEvent::PendEnvelope(tx) => {
                if let Err(err) = self.pend_enveloped_tx(tx) {
                    warn!(%err, "envelope rejected at admission");
                }
            }
            NodeEvent::Propose => self.propose(),
        }
    }

    /// Single entry point for consensus traffic. Wrong-epoch, wrong-view,
    /// unknown-sender and unverifiable messages are dropped silently.
    pub fn handle_message(&mut self, payload: Payload) {
        let m = &payload.message;
        if m.block_index != self.height + 1 {
            debug!(
                got = m.block_index,
                want = self.height + 1,
                "dropping message for other block index"
            );
            return;
        }
        if m.view_number != self.view {
            debug!(got = m.view_number, want = self.view, "dropping message for other view");
            return;
        }
        let sender = m.validator_index;
        let pk = match self.peer_keys.get(sender as usize) {
            Some(Some(pk)) => pk.clone(),
            _ => {
                debug!(sender, "dropping message from unknown validator");
                return;
            }
        };
        if !payload.verify(&pk) {
            debug!(sender, "dropping message with bad witness");
            return;
        }

        match payload.message.body {
            ConsensusBody::PrepareRequest(request) => self.on_prepare_request(request),
            ConsensusBody::PrepareResponse(response) => self.on_prepare_response(sender, response),
            ConsensusBody::Finalize(finalize) => self.on_finalize(sender, finalize),
            ConsensusBody::Commit(commit) => self.on_commit(sender, &pk, commit),
            ConsensusBody::ChangeView(change_view) => self.on_change_view(sender, change_view),
        }
    }

    /// Phase 2 entry: adopt the proposed ordering if every hash resolves
    /// locally and the transaction root matches.
    fn on_prepare_request(&mut self, request: PrepareRequest) {
        let mut txs: Vec<Transaction> = Vec::with_capacity(request.tx_hashes.len());
        let mut envelope_count = 0usize;
        for hash in &request.tx_hashes {
            match self.pools.find(hash) {
                Some((tx, true)) => {
                    if txs.len() > envelope_count {
                        debug!("rejecting proposal: carrier after legacy transaction");
                        return;
                    }
                    envelope_count += 1;
                    txs.push(tx.clone());
                }
                Some((tx, false)) => txs.push(tx.clone()),
                None => {
                    debug!("rejecting proposal: unknown transaction hash");
                    return;
                }
            }
        }

        let header = request.sealing_proposal;
        if self.hasher.tx_root(&txs) != header.tx_root {
            debug!("rejecting proposal: transaction root mismatch");
            return;
        }

        let preparation_hash = codec::header_seal_hash(&header);
        self.tx_list = txs;
        self.envelope_count = envelope_count;
        self.proposal = Some(header);

        self.broadcast(ConsensusBody::PrepareResponse(PrepareResponse {
            preparation_hash,
        }));
    }

    fn on_prepare_response(&mut self, sender: u8, response: PrepareResponse) {
        let expected = match &self.proposal {
            Some(header) => codec::header_seal_hash(header),
            None => {
                debug!(sender, "prepare response before any proposal");
                return;
            }
        };
        if response.preparation_hash != expected {
            debug!(sender, "prepare response for different proposal");
            return;
        }
        self.prepare_responses[sender as usize] = Some(response);

        if self.prepare_response_count() < self.quorum() || self.view_lock {
            return;
        }

        // Ordering is now quorum-committed. Reveal our decryption shares;
        // from here a view change could leak plaintext without a block, so
        // the view is locked first.
        let mut shares = Vec::with_capacity(self.envelope_count);
        for tx in &self.tx_list[..self.envelope_count] {
            let envelope = match Envelope::from_bytes(&tx.data) {
                Ok(env) => env,
                Err(_) => continue,
            };
            match self.secret.decrypt_share(&envelope.encrypted_seed) {
                Ok(share) => shares.push(share),
                Err(err) => {
                    debug!(%err, "skipping undecryptable envelope seed");
                    continue;
                }
            }
        }
        self.view_lock = true;
        self.broadcast(ConsensusBody::Finalize(Finalize {
            decrypt_shares: shares,
        }));
    }

    /// Phase 3: collect decryption shares; at quorum, recover the seeds,
    /// decrypt the payloads and commit to the final header. Aggregation
    /// failure means waiting for more shares — never a view change.
    fn on_finalize(&mut self, sender: u8, finalize: Finalize) {
        self.finalizes[sender as usize] = Some(finalize);

        if self.finalize_count() < self.quorum() || self.dbft_finalized {
            return;
        }
        let proposal = match &self.proposal {
            Some(header) => header.clone(),
            None => {
                debug!("finalize quorum without a proposal, ignoring");
                return;
            }
        };

        let mut ciphertexts = Vec::with_capacity(self.envelope_count);
        let mut payloads = Vec::with_capacity(self.envelope_count);
        for tx in &self.tx_list[..self.envelope_count] {
            let envelope = match Envelope::from_bytes(&tx.data) {
                Ok(env) => env,
                Err(_) => continue,
            };
            ciphertexts.push(envelope.encrypted_seed);
            payloads.push(envelope.encrypted_tx);
        }

        let mut shares_by_index = BTreeMap::new();
        for (index, slot) in self.finalizes.iter().enumerate() {
            if let Some(f) = slot {
                shares_by_index.insert(index as u8, f.decrypt_shares.clone());
            }
        }

        let seeds = match tpke::aggregate_decrypt(
            &ciphertexts,
            &shares_by_index,
            &self.global_pk,
            self.decrypt_threshold(),
            self.scaler,
        ) {
            Ok(seeds) => seeds,
            Err(err) => {
                // wait for another finalize message and do not change view
                debug!(%err, "seed aggregation failed, staying in decrypt phase");
                return;
            }
        };
        self.dbft_finalized = true;

        // One bad envelope must not stall consensus: payloads that fail
        // symmetric decryption or transaction decoding are skipped.
        let mut decrypted = Vec::with_capacity(seeds.len());
        for (seed, payload) in seeds.iter().zip(&payloads) {
            let plain = match tpke::aes_decrypt(seed, payload) {
                Ok(p) => p,
                Err(_) => {
                    debug!("envelope payload failed symmetric decryption, skipping");
                    continue;
                }
            };
            match codec::decode_tx(&plain) {
                Ok(tx) => decrypted.push(tx),
                Err(_) => {
                    debug!("decrypted payload is not a transaction, skipping");
                    continue;
                }
            }
        }

        // carriers first, then their revealed payloads, then legacy traffic
        let mut final_list = self.tx_list[..self.envelope_count].to_vec();
        final_list.extend(decrypted);
        final_list.extend_from_slice(&self.tx_list[self.envelope_count..]);

        let mut header = proposal;
        header.tx_root = self.hasher.tx_root(&final_list);
        let outcome = self.executor.execute(self.height + 1, &final_list);
        header.state_root = outcome.state_root;
        header.receipts_root = outcome.receipts_root;

        let final_hash = codec::header_seal_hash(&header);
        self.proposal = Some(header);
        self.final_tx_list = final_list;

        let signature = self.secret.sign_share(&final_hash);
        self.broadcast(ConsensusBody::Commit(Commit {
            final_hash,
            signature,
        }));
    }

    /// Phase 4: collect verified signature shares; at quorum, aggregate the
    /// block signature and seal. Aggregation failure waits, like Finalize.
    fn on_commit(&mut self, sender: u8, pk: &PublicKeyShare, commit: Commit) {
        let local_hash = match &self.proposal {
            Some(header) => codec::header_seal_hash(header),
            None => {
                debug!(sender, "commit before any proposal");
                return;
            }
        };
        if commit.final_hash != local_hash {
            debug!(sender, "commit for different final hash");
            return;
        }
        if !tpke::verify_share(pk, &local_hash, &commit.signature) {
            debug!(sender, "commit signature share does not verify");
            return;
        }
        self.commits[sender as usize] = Some(commit);

        if self.commit_count() < self.quorum() || self.dbft_committed {
            return;
        }

        let selected: BTreeMap<u8, tpke::SignatureShare> = self
            .commits
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|c| (index as u8, c.signature)))
            .take(self.signature_threshold())
            .collect();

        let signature = match tpke::aggregate_and_verify_sig(
            &self.global_pk,
            &local_hash,
            self.signature_threshold(),
            &selected,
            self.scaler,
        ) {
            Ok(sig) => sig,
            Err(err) => {
                // wait for another commit message and do not change view
                debug!(%err, "block signature aggregation failed, staying in commit phase");
                return;
            }
        };
        self.dbft_committed = true;

        let mut signers: SignerBitmap = SignerBitmap::repeat(false, self.validator_count + 1);
        for index in selected.keys() {
            signers.set(*index as usize, true);
        }

        let header = match self.proposal.take() {
            Some(h) => h,
            None => return,
        };
        let sealed = SealedBlock {
            header,
            transactions: std::mem::take(&mut self.final_tx_list),
            signature,
            signers,
        };
        info!(
            height = self.height + 1,
            hash = %hex::encode(sealed.hash()),
            txs = sealed.transactions.len(),
            "sealed block committed"
        );
        self.blocks.insert(self.height + 1, sealed);
        self.height += 1;
        self.view = 0;
        self.view_lock = false;
        self.reset_after_commit();
    }

    /// Change-view votes are refused outright while the view is locked.
    fn on_change_view(&mut self, sender: u8, change_view: ChangeView) {
        if change_view.new_view_number == self.view.wrapping_add(1) && !self.view_lock {
            self.change_views[sender as usize] = Some(change_view);
        }
        if self.change_view_count() >= self.quorum() {
            self.view = self.view.wrapping_add(1);
            self.reset_after_view_change();
        }
    }

    // --- resets ---
    //
    // Finalization and view change both clear the per-round scratch state,
    // but only finalization touches the mempools. Two separate operations on
    // purpose.

    fn reset_after_commit(&mut self) {
        self.clear_round_state();
        self.pools.clear();
    }

    fn reset_after_view_change(&mut self) {
        self.clear_round_state();
    }

    fn clear_round_state(&mut self) {
        let slots = self.validator_count + 1;
        self.tx_list.clear();
        self.envelope_count = 0;
        self.final_tx_list.clear();
        self.proposal = None;
        self.prepare_responses = vec![None; slots];
        self.finalizes = vec![None; slots];
        self.commits = vec![None; slots];
        self.change_views = vec![None; slots];
        self.dbft_finalized = false;
        self.dbft_committed = false;
    }
}
