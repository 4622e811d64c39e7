//! Phase-level behavior of a single validator, driven with hand-built signed
//! payloads and observed through probe peers.

use rand::rngs::ThreadRng;
use rand::thread_rng;
use sealbft::codec;
use sealbft::consensus::{Node, NodeEvent, PeerHandle};
use sealbft::crypto::tpke::{self, DecryptionShare, Dkg};
use sealbft::envelope::Envelope;
use sealbft::executor::{DigestExecutor, Executor, MerkleTxHasher, TxRootHasher};
use sealbft::messages::{
    ChangeView, ChangeViewReason, Commit, ConsensusBody, Finalize, Message, Payload,
    PrepareRequest, PrepareResponse, COMMIT_TYPE, FINALIZE_TYPE, PREPARE_RESPONSE_TYPE,
};
use sealbft::types::{Header, Transaction, ZERO_ADDRESS};
use tokio::sync::mpsc;

const N: usize = 7;
const T: usize = 4;

/// Validator 1 under test; indices 2..=7 are probe endpoints whose queues the
/// test can inspect.
struct Harness {
    node: Node,
    dkg: Dkg,
    probes: Vec<(u8, mpsc::Receiver<NodeEvent>)>,
}

fn harness(rng: &mut ThreadRng) -> Harness {
    let dkg = Dkg::generate(N, T, rng).unwrap();
    let mut node = Node::new(
        dkg.private_share(1).unwrap(),
        dkg.global_public_key(),
        0,
        dkg.scaler(),
        N,
    );
    let mut handles = Vec::new();
    let mut probes = Vec::new();
    for i in 2..=N as u8 {
        let (sender, receiver) = mpsc::channel(100);
        handles.push(PeerHandle {
            index: i,
            sender,
            public_key: dkg.public_share(i).unwrap(),
        });
        probes.push((i, receiver));
    }
    node.connect(&handles);
    Harness { node, dkg, probes }
}

fn signed(dkg: &Dkg, index: u8, block_index: u64, view: u8, body: ConsensusBody) -> Payload {
    Payload::sign(
        Message {
            block_index,
            validator_index: index,
            view_number: view,
            body,
        },
        &dkg.private_share(index).unwrap(),
    )
}

fn make_carrier(dkg: &Dkg, rng: &mut ThreadRng) -> (Transaction, Transaction) {
    let inner = Transaction::new(1, ZERO_ADDRESS, 0, vec![]);
    let seed = tpke::random_seed(rng).unwrap();
    let encrypted_seed = dkg.global_public_key().encrypt(&seed, rng).unwrap();
    let encrypted_tx = tpke::aes_encrypt(&seed, &codec::tx_bytes(&inner), rng).unwrap();
    let envelope = Envelope {
        encrypt_height: 0,
        encrypted_seed,
        encrypted_tx,
    };
    let carrier = Transaction::carrier(0, envelope.compute_fee(), envelope.to_bytes());
    (carrier, inner)
}

/// The ordering proposal a leader would broadcast for a single carrier.
fn proposal_for(carrier: &Transaction) -> Header {
    let txs = std::slice::from_ref(carrier);
    let outcome = DigestExecutor.execute(1, txs);
    let mut header = Header::empty();
    header.height = 1;
    header.tx_root = MerkleTxHasher.tx_root(txs);
    header.state_root = outcome.state_root;
    header.receipts_root = outcome.receipts_root;
    header
}

fn drain_probe(receiver: &mut mpsc::Receiver<NodeEvent>) -> Vec<Payload> {
    let mut out = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let NodeEvent::Message(payload) = event {
            out.push(payload);
        }
    }
    out
}

fn kinds(payloads: &[Payload]) -> Vec<u8> {
    payloads.iter().map(|p| p.message.body.kind()).collect()
}

/// Run validator 1 through PrepareRequest + a full response quorum so that it
/// reveals its decryption shares and locks the view.
fn prepare_and_lock(h: &mut Harness, carrier: &Transaction) -> Header {
    let header = proposal_for(carrier);
    h.node.handle_message(signed(
        &h.dkg,
        2,
        1,
        0,
        ConsensusBody::PrepareRequest(PrepareRequest {
            sealing_proposal: header.clone(),
            tx_hashes: vec![codec::tx_hash(carrier)],
        }),
    ));
    let preparation_hash = codec::header_seal_hash(&header);
    for i in [3u8, 4, 5, 6, 7] {
        h.node.handle_message(signed(
            &h.dkg,
            i,
            1,
            0,
            ConsensusBody::PrepareResponse(PrepareResponse { preparation_hash }),
        ));
    }
    assert!(h.node.view_lock());
    for (_, receiver) in h.probes.iter_mut() {
        drain_probe(receiver);
    }
    header
}

#[test]
fn quorum_cutoff_gates_the_decrypt_phase() {
    let mut rng = thread_rng();
    let mut h = harness(&mut rng);
    let (carrier, _inner) = make_carrier(&h.dkg, &mut rng);
    h.node.pend_enveloped_tx(carrier.clone()).unwrap();

    let header = proposal_for(&carrier);
    h.node.handle_message(signed(
        &h.dkg,
        2,
        1,
        0,
        ConsensusBody::PrepareRequest(PrepareRequest {
            sealing_proposal: header.clone(),
            tx_hashes: vec![codec::tx_hash(&carrier)],
        }),
    ));
    for (_, receiver) in h.probes.iter_mut() {
        assert_eq!(kinds(&drain_probe(receiver)), vec![PREPARE_RESPONSE_TYPE]);
    }

    // one short of quorum: no lock, no share reveal
    let preparation_hash = codec::header_seal_hash(&header);
    for i in [3u8, 4, 5, 6] {
        h.node.handle_message(signed(
            &h.dkg,
            i,
            1,
            0,
            ConsensusBody::PrepareResponse(PrepareResponse { preparation_hash }),
        ));
    }
    assert_eq!(h.node.prepare_response_count(), 4);
    assert!(!h.node.view_lock());
    for (_, receiver) in h.probes.iter_mut() {
        assert!(drain_probe(receiver).is_empty());
    }

    // the quorum-th response triggers exactly one finalize broadcast
    h.node.handle_message(signed(
        &h.dkg,
        7,
        1,
        0,
        ConsensusBody::PrepareResponse(PrepareResponse { preparation_hash }),
    ));
    assert!(h.node.view_lock());
    for (_, receiver) in h.probes.iter_mut() {
        assert_eq!(kinds(&drain_probe(receiver)), vec![FINALIZE_TYPE]);
    }

    // a late response must not re-fire the transition
    h.node.handle_message(signed(
        &h.dkg,
        2,
        1,
        0,
        ConsensusBody::PrepareResponse(PrepareResponse { preparation_hash }),
    ));
    for (_, receiver) in h.probes.iter_mut() {
        assert!(drain_probe(receiver).is_empty());
    }
}

#[test]
fn change_view_votes_are_refused_while_locked() {
    let mut rng = thread_rng();
    let mut h = harness(&mut rng);
    let (carrier, _inner) = make_carrier(&h.dkg, &mut rng);
    h.node.pend_enveloped_tx(carrier.clone()).unwrap();
    prepare_and_lock(&mut h, &carrier);

    for i in [2u8, 3, 4, 5, 6] {
        h.node.handle_message(signed(
            &h.dkg,
            i,
            1,
            0,
            ConsensusBody::ChangeView(ChangeView {
                new_view_number: 1,
                timestamp: 1,
                reason: ChangeViewReason::Timeout,
            }),
        ));
    }
    assert_eq!(h.node.view(), 0, "locked node must not change view");
    assert_eq!(h.node.change_view_count(), 0, "locked node must not record votes");
}

#[test]
fn change_view_quorum_advances_and_keeps_mempools() {
    let mut rng = thread_rng();
    let mut h = harness(&mut rng);
    let (carrier, _inner) = make_carrier(&h.dkg, &mut rng);
    h.node.pend_enveloped_tx(carrier.clone()).unwrap();
    h.node.pend_legacy_tx(Transaction::new(5, ZERO_ADDRESS, 0, vec![7]));

    // adopt a proposal but never reach the response quorum
    let header = proposal_for(&carrier);
    h.node.handle_message(signed(
        &h.dkg,
        2,
        1,
        0,
        ConsensusBody::PrepareRequest(PrepareRequest {
            sealing_proposal: header,
            tx_hashes: vec![codec::tx_hash(&carrier)],
        }),
    ));

    for i in [2u8, 3, 4, 5, 6] {
        h.node.handle_message(signed(
            &h.dkg,
            i,
            1,
            0,
            ConsensusBody::ChangeView(ChangeView {
                new_view_number: 1,
                timestamp: 1,
                reason: ChangeViewReason::Timeout,
            }),
        ));
    }
    assert_eq!(h.node.view(), 1);
    assert_eq!(h.node.change_view_count(), 0, "scratch state cleared");
    assert_eq!(h.node.prepare_response_count(), 0);
    // mempools survive a view change untouched
    assert_eq!(h.node.mempool().envelope_len(), 1);
    assert_eq!(h.node.mempool().legacy_len(), 1);
}

#[test]
fn aggregation_failure_waits_then_full_round_completes() {
    let mut rng = thread_rng();
    let mut h = harness(&mut rng);
    let (carrier, inner) = make_carrier(&h.dkg, &mut rng);
    h.node.pend_enveloped_tx(carrier.clone()).unwrap();
    prepare_and_lock(&mut h, &carrier);

    let envelope = Envelope::from_bytes(&carrier.data).unwrap();
    let share_for = |i: u8| {
        h.dkg
            .private_share(i)
            .unwrap()
            .decrypt_share(&envelope.encrypted_seed)
            .unwrap()
    };

    // quorum of finalizes, but validator 4's share is garbage: the only
    // candidate subset contains it, so aggregation must fail and wait
    for i in [2u8, 3, 4, 5, 6] {
        let share = if i == 4 {
            DecryptionShare(tpke::random_seed(&mut rng).unwrap().0)
        } else {
            share_for(i)
        };
        h.node.handle_message(signed(
            &h.dkg,
            i,
            1,
            0,
            ConsensusBody::Finalize(Finalize {
                decrypt_shares: vec![share],
            }),
        ));
    }
    assert_eq!(h.node.finalize_count(), 5);
    assert!(!h.node.dbft_finalized(), "must stay in decrypt phase");
    assert_eq!(h.node.view(), 0);
    for (_, receiver) in h.probes.iter_mut() {
        assert!(!kinds(&drain_probe(receiver)).contains(&COMMIT_TYPE));
    }

    // one more honest share completes a fully valid subset
    h.node.handle_message(signed(
        &h.dkg,
        7,
        1,
        0,
        ConsensusBody::Finalize(Finalize {
            decrypt_shares: vec![share_for(7)],
        }),
    ));
    assert!(h.node.dbft_finalized());

    let broadcast = drain_probe(&mut h.probes[0].1);
    let commit = broadcast
        .iter()
        .find_map(|p| match &p.message.body {
            ConsensusBody::Commit(c) => Some(c.clone()),
            _ => None,
        })
        .expect("commit broadcast after successful aggregation");

    // drive the commit quorum with signature shares from five peers
    for i in [2u8, 3, 5, 6, 7] {
        let signature = h
            .dkg
            .private_share(i)
            .unwrap()
            .sign_share(&commit.final_hash);
        h.node.handle_message(signed(
            &h.dkg,
            i,
            1,
            0,
            ConsensusBody::Commit(Commit {
                final_hash: commit.final_hash,
                signature,
            }),
        ));
    }

    assert_eq!(h.node.height(), 1);
    assert!(!h.node.view_lock());
    assert!(h.node.mempool().is_empty());
    let block = h.node.block(1).unwrap();
    // carrier order preserved, decrypted payload follows the carrier prefix
    assert_eq!(block.transactions, vec![carrier, inner]);
    assert_eq!(codec::header_seal_hash(&block.header), commit.final_hash);
}
