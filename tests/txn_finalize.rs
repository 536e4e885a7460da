// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! End-to-end finalization scenarios against the in-memory engine,
//! driven the way the dispatcher drives evaluation: snapshot a batch,
//! evaluate, apply on success.

use range_types::{Lease, RangeDescriptor, ReplicaDescriptor};
use txn_types::{IsolationLevel, Span, Transaction, TxnStatus};
use uuid::Uuid;

use rangekv::storage::kv::{Batch, Engine};
use rangekv::storage::txn::commands::{
    CommitTrigger, EvalContext, FinalizeTxn, MergeTrigger, SplitTrigger,
};
use rangekv::storage::txn::eval_result::EvalResult;
use rangekv::storage::{compute_stats_for_range, AbortSpan, BTreeEngine, MvccStats, StateLoader};

fn new_txn(anchor: &[u8], ts: u64) -> Transaction {
    Transaction::new(
        Uuid::new_v4(),
        anchor.to_vec(),
        0,
        ts.into(),
        IsolationLevel::Serializable,
    )
}

fn persist_record(engine: &BTreeEngine, txn: &Transaction) {
    let mut batch = engine.batch();
    let key = keys::transaction_key(&txn.anchor_key, txn.id.as_bytes());
    batch.put_record(None, &key, txn).unwrap();
    engine.write(batch).unwrap();
}

fn finalize(
    engine: &BTreeEngine,
    ctx: &EvalContext,
    cmd: FinalizeTxn,
) -> (EvalResult, Transaction, MvccStats) {
    let mut batch = engine.batch();
    let mut stats = MvccStats::default();
    let (pd, res) = cmd.process_write(&mut batch, ctx, &mut stats);
    let reply = res.unwrap();
    engine.write(batch).unwrap();
    (pd, reply, stats)
}

#[test]
fn test_plain_commit_round_trip() {
    let engine = BTreeEngine::new();
    let desc = RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice());
    let txn = new_txn(b"a", 5);
    persist_record(&engine, &txn);
    for key in [b"a", b"b", b"c"] {
        engine.put_intent(key, txn.id, b"v");
    }

    let ctx = EvalContext::new(desc, MvccStats::default());
    let mut cmd = FinalizeTxn::new(txn.clone(), true);
    cmd.intent_spans = vec![
        Span::from_key(b"a".as_slice()),
        Span::from_key(b"b".as_slice()),
        Span::from_key(b"c".as_slice()),
    ];
    let (pd, reply, _) = finalize(&engine, &ctx, cmd);

    assert_eq!(reply.status, TxnStatus::Committed);
    for key in [b"a", b"b", b"c"] {
        assert_eq!(engine.get_value(key, 5.into()), Some(b"v".to_vec()));
        assert!(!engine.has_intent(key));
    }
    // Auto-GC removed the record.
    let record: Option<Transaction> = engine
        .batch()
        .get_record(&keys::transaction_key(&txn.anchor_key, txn.id.as_bytes()))
        .unwrap();
    assert_eq!(record, None);
    assert!(pd.replicated.split.is_none() && pd.replicated.merge.is_none());
}

#[test]
fn test_split_commit_end_to_end() {
    let engine = BTreeEngine::new();
    let replicas = vec![
        ReplicaDescriptor::new(1, 1, 1),
        ReplicaDescriptor::new(2, 2, 2),
    ];
    let mut pre = RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice());
    pre.replicas = replicas.clone();
    let mut left = RangeDescriptor::new(1, b"a".as_slice(), b"m".as_slice());
    left.replicas = replicas.clone();
    let mut right = RangeDescriptor::new(2, b"m".as_slice(), b"z".as_slice());
    right.replicas = vec![
        ReplicaDescriptor::new(1, 1, 3),
        ReplicaDescriptor::new(2, 2, 4),
    ];

    // Range state the split reads: lease, thresholds, some data.
    let mut setup = engine.batch();
    StateLoader::new(1)
        .set_lease(
            &mut setup,
            None,
            &Lease {
                replica: replicas[0],
                start: 1.into(),
                expiration: 100.into(),
            },
        )
        .unwrap();
    setup
        .put_record(None, &keys::range_descriptor_key(b"a"), &pre)
        .unwrap();
    engine.write(setup).unwrap();
    engine.put_value(b"c", 3.into(), b"left");
    engine.put_value(b"p", 3.into(), b"right");

    // The split transaction holds intents on both descriptor keys; they
    // are range-local and must resolve inside this same batch.
    let txn = new_txn(b"a", 5);
    persist_record(&engine, &txn);
    engine.put_intent(&keys::range_descriptor_key(b"a"), txn.id, &[]);
    engine.put_intent(&keys::range_descriptor_key(b"m"), txn.id, &[]);

    let orig_both = compute_stats_for_range(&pre, &engine.batch()).unwrap();
    let ctx = EvalContext::new(pre, orig_both);

    let mut cmd = FinalizeTxn::new(txn.clone(), true);
    cmd.intent_spans = vec![
        Span::from_key(keys::range_descriptor_key(b"a")),
        Span::from_key(keys::range_descriptor_key(b"m")),
    ];
    cmd.commit_trigger = Some(CommitTrigger::Split(SplitTrigger {
        left_desc: left.clone(),
        right_desc: right.clone(),
    }));
    let (pd, reply, left_delta) = finalize(&engine, &ctx, cmd);

    assert_eq!(reply.status, TxnStatus::Committed);
    assert!(pd.replicated.block_reads);
    assert!(!engine.has_intent(&keys::range_descriptor_key(b"a")));
    assert!(!engine.has_intent(&keys::range_descriptor_key(b"m")));

    // The returned delta moves the LHS from its pre-split absolute
    // stats to its exact post-split absolute stats.
    let batch = engine.batch();
    let mut left_abs = ctx.stats;
    left_abs.add(&left_delta);
    assert_eq!(left_abs, compute_stats_for_range(&left, &batch).unwrap());

    // With no estimates involved, the RHS delta in the replicated
    // payload is the new range's exact absolute stats.
    let split_payload = pd.replicated.split.unwrap();
    assert_eq!(
        split_payload.rhs_delta,
        compute_stats_for_range(&right, &batch).unwrap()
    );

    // The RHS came out fully seeded.
    let right_lease = StateLoader::new(2).load_lease(&batch).unwrap();
    assert_eq!(right_lease.replica, ReplicaDescriptor::new(1, 1, 3));
    assert!(StateLoader::new(2).load_stats(&batch).unwrap().key_count >= 1);
}

#[test]
fn test_merge_commit_resolves_absorbed_intents_locally() {
    let engine = BTreeEngine::new();
    // Pre-merge: this replica owns [a, m); the right-hand [m, z) is
    // being absorbed, along with an intent sitting on its keyspace.
    let lhs = RangeDescriptor::new(1, b"a".as_slice(), b"m".as_slice());
    let merged = RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice());
    let rhs = RangeDescriptor::new(2, b"m".as_slice(), b"z".as_slice());

    let txn = new_txn(b"b", 5);
    persist_record(&engine, &txn);
    engine.put_intent(b"b", txn.id, b"lhs-write");
    engine.put_intent(b"p", txn.id, b"rhs-write");

    let right_stats = compute_stats_for_range(&rhs, &engine.batch()).unwrap();
    let ctx = EvalContext::new(lhs, MvccStats::default());

    let mut cmd = FinalizeTxn::new(txn.clone(), true);
    cmd.intent_spans = vec![
        Span::from_key(b"b".as_slice()),
        Span::from_key(b"p".as_slice()),
    ];
    cmd.commit_trigger = Some(CommitTrigger::Merge(MergeTrigger {
        left_desc: merged,
        right_desc: rhs,
        right_stats,
    }));
    let (pd, reply, _) = finalize(&engine, &ctx, cmd);

    assert_eq!(reply.status, TxnStatus::Committed);
    assert!(pd.replicated.block_reads);
    assert!(pd.replicated.merge.is_some());

    // Both intents resolved in-batch: the merge ran before resolution,
    // so the absorbed key counted as local. Nothing was left external
    // and the record is gone.
    assert_eq!(engine.get_value(b"b", 5.into()), Some(b"lhs-write".to_vec()));
    assert_eq!(engine.get_value(b"p", 5.into()), Some(b"rhs-write".to_vec()));
    let record: Option<Transaction> = engine
        .batch()
        .get_record(&keys::transaction_key(&txn.anchor_key, txn.id.as_bytes()))
        .unwrap();
    assert_eq!(record, None);
}

#[test]
fn test_abort_span_poison_blocks_replay_bookkeeping() {
    let engine = BTreeEngine::new();
    let desc = RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice());
    let txn = new_txn(b"d", 5);
    persist_record(&engine, &txn);
    engine.put_intent(b"d", txn.id, b"w");

    let ctx = EvalContext::new(desc, MvccStats::default());
    let mut cmd = FinalizeTxn::new(txn.clone(), false);
    cmd.poison = true;
    cmd.intent_spans = vec![Span::from_key(b"d".as_slice())];
    let (pd, reply, _) = finalize(&engine, &ctx, cmd);

    assert_eq!(reply.status, TxnStatus::Aborted);
    assert!(pd.local.end_txns[0].always);
    assert_eq!(engine.get_value(b"d", 100.into()), None);
    let entry = AbortSpan::new(1)
        .get(&engine.batch(), txn.id)
        .unwrap()
        .unwrap();
    assert_eq!(entry.key, b"d");
}
