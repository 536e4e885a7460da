// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! The transaction finalization command.

pub(crate) mod change_replicas;
pub(crate) mod finalize_txn;
pub(crate) mod merge;
pub(crate) mod split;

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use range_types::{contains_key, RangeDescriptor, ReplicaDescriptor};
use txn_types::{Span, TimeStamp, Transaction};

use crate::config::ClusterSettings;
use crate::storage::kv::MvccStats;
use crate::storage::txn::spanset::{SpanAccess, SpanSet};

pub use finalize_txn::INTENT_RESOLUTION_BATCH_SIZE;

/// Split payload: the two descriptors the range divides into. The left
/// keeps the current range ID, the right is a fresh range.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitTrigger {
    pub left_desc: RangeDescriptor,
    pub right_desc: RangeDescriptor,
}

/// Merge payload: the left-hand descriptor as it will look after
/// absorbing the right, the right-hand descriptor, and the right's
/// pre-merge stats.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeTrigger {
    pub left_desc: RangeDescriptor,
    pub right_desc: RangeDescriptor,
    pub right_stats: MvccStats,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChangeReplicasTrigger {
    pub updated_replicas: Vec<ReplicaDescriptor>,
    pub next_replica_id: u64,
}

/// A commit that changed range configuration without changing the
/// descriptor. Gossip hints are derived from which system spans it
/// touched.
#[derive(Clone, Debug, PartialEq)]
pub struct ModifiedSpanTrigger {
    pub system_config_span: bool,
    pub node_liveness_span: Option<Span>,
}

/// At most one structural side effect rides along with a commit and is
/// staged atomically with it.
#[derive(Clone, Debug, PartialEq)]
pub enum CommitTrigger {
    Split(SplitTrigger),
    Merge(MergeTrigger),
    ChangeReplicas(ChangeReplicasTrigger),
    ModifiedSpan(ModifiedSpanTrigger),
}

/// Commit or roll back the transaction, resolving its intents on this
/// range in the same batch.
pub struct FinalizeTxn {
    /// The client's view of the transaction.
    pub txn: Transaction,
    pub commit: bool,
    /// On rollback, leave a poison entry in the abort span so stale
    /// replays of this transaction fail loudly.
    pub poison: bool,
    /// The client asserted the batch must commit in one phase; reaching
    /// separate finalization means something upstream went wrong.
    pub require_one_pc: bool,
    /// No read span needs revalidation at a pushed timestamp.
    pub no_refresh_spans: bool,
    pub deadline: Option<TimeStamp>,
    pub intent_spans: Vec<Span>,
    pub commit_trigger: Option<CommitTrigger>,
}

impl FinalizeTxn {
    pub fn new(txn: Transaction, commit: bool) -> FinalizeTxn {
        FinalizeTxn {
            txn,
            commit,
            poison: false,
            require_one_pc: false,
            no_refresh_spans: false,
            deadline: None,
            intent_spans: vec![],
            commit_trigger: None,
        }
    }

    /// Declares every span evaluation may touch, for the command queue.
    /// The intent spans may extend beyond this range; the parts in-range
    /// are resolved eagerly, so they must be declared writable here.
    pub fn declare_keys(&self, desc: &RangeDescriptor, spans: &mut SpanSet) {
        spans.add(
            SpanAccess::ReadWrite,
            Span::from_key(keys::transaction_key(&self.txn.anchor_key, self.txn.id.as_bytes())),
        );
        for span in &self.intent_spans {
            spans.add(SpanAccess::ReadWrite, span.clone());
        }

        let abort_span_access = if !self.commit && self.poison {
            SpanAccess::ReadWrite
        } else {
            SpanAccess::ReadOnly
        };
        spans.add(
            abort_span_access,
            Span::from_key(keys::abort_span_key(desc.range_id, self.txn.id.as_bytes())),
        );

        // Every finalization depends on the descriptor to decide which
        // intents are local to the range.
        spans.add(
            SpanAccess::ReadOnly,
            Span::from_key(keys::range_descriptor_key(&desc.start_key)),
        );

        match &self.commit_trigger {
            Some(CommitTrigger::Split(st)) => {
                // Splits recompute stats from a clean iteration of both
                // sides, so every concurrent write must be blocked: a
                // write to the right would be lost after the split, a
                // write to the left would skew the freshly computed
                // absolute stats.
                spans.add(
                    SpanAccess::ReadWrite,
                    Span::new(st.left_desc.start_key.clone(), st.right_desc.end_key.clone()),
                );
                spans.add(
                    SpanAccess::ReadWrite,
                    Span::new(
                        keys::make_range_key_prefix(&st.left_desc.start_key),
                        keys::next_key(&keys::make_range_key_prefix(&st.right_desc.end_key)),
                    ),
                );

                let left_prefix = keys::range_id_replicated_prefix(desc.range_id);
                spans.add(
                    SpanAccess::ReadOnly,
                    Span::new(left_prefix.clone(), keys::next_key(&left_prefix)),
                );
                let right_prefix = keys::range_id_replicated_prefix(st.right_desc.range_id);
                spans.add(
                    SpanAccess::ReadWrite,
                    Span::new(right_prefix.clone(), keys::next_key(&right_prefix)),
                );
                let right_unreplicated = keys::range_id_unreplicated_prefix(st.right_desc.range_id);
                spans.add(
                    SpanAccess::ReadWrite,
                    Span::new(right_unreplicated.clone(), keys::next_key(&right_unreplicated)),
                );

                spans.add(
                    SpanAccess::ReadOnly,
                    Span::from_key(keys::last_replica_gc_timestamp_key(st.left_desc.range_id)),
                );
                spans.add(
                    SpanAccess::ReadWrite,
                    Span::from_key(keys::last_replica_gc_timestamp_key(st.right_desc.range_id)),
                );

                spans.add(
                    SpanAccess::ReadOnly,
                    Span::new(
                        keys::abort_span_min_key(desc.range_id),
                        keys::abort_span_max_key(desc.range_id),
                    ),
                );
            }
            Some(CommitTrigger::Merge(mt)) => {
                // Merges write the left side's range-ID span and the
                // right side's data and range-local spans, and read the
                // right side's range-ID span.
                let left_prefix = keys::range_id_replicated_prefix(desc.range_id);
                spans.add(
                    SpanAccess::ReadWrite,
                    Span::new(left_prefix.clone(), keys::next_key(&left_prefix)),
                );
                spans.add(
                    SpanAccess::ReadWrite,
                    Span::new(mt.right_desc.start_key.clone(), mt.right_desc.end_key.clone()),
                );
                spans.add(
                    SpanAccess::ReadWrite,
                    Span::new(
                        keys::make_range_key_prefix(&mt.right_desc.start_key),
                        keys::make_range_key_prefix(&mt.right_desc.end_key),
                    ),
                );
                let right_prefix = keys::range_id_replicated_prefix(mt.right_desc.range_id);
                spans.add(
                    SpanAccess::ReadOnly,
                    Span::new(right_prefix.clone(), keys::next_key(&right_prefix)),
                );
            }
            Some(CommitTrigger::ChangeReplicas(_)) | Some(CommitTrigger::ModifiedSpan(_)) | None => {}
        }
    }
}

impl Display for FinalizeTxn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kv::command::finalize_txn {} commit({}) intents({}) @ {}",
            self.txn.short(),
            self.commit,
            self.intent_spans.len(),
            self.txn.timestamp,
        )
    }
}

/// Test-tunable hooks into evaluation.
#[derive(Clone, Default)]
pub struct EvalKnobs {
    /// Counts the keys the ranged intent-resolution primitive touched.
    /// Diagnostic only.
    pub num_keys_evaluated_for_range_intent_resolution: Option<Arc<AtomicI64>>,
}

/// Read-only view of the range an evaluation runs against.
#[derive(Clone, Default)]
pub struct EvalContext {
    pub desc: RangeDescriptor,
    /// The range's absolute stats, excluding the current batch.
    pub stats: MvccStats,
    pub settings: ClusterSettings,
    pub knobs: EvalKnobs,
}

impl EvalContext {
    pub fn new(desc: RangeDescriptor, stats: MvccStats) -> EvalContext {
        EvalContext {
            desc,
            stats,
            settings: ClusterSettings::default(),
            knobs: EvalKnobs::default(),
        }
    }

    pub fn range_id(&self) -> u64 {
        self.desc.range_id
    }

    pub fn is_first_range(&self) -> bool {
        self.desc.is_first_range()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        contains_key(&self.desc, key)
    }
}

#[cfg(test)]
mod tests {
    use txn_types::IsolationLevel;
    use uuid::Uuid;

    use super::*;

    fn sample_cmd(commit: bool) -> (FinalizeTxn, RangeDescriptor) {
        let txn = Transaction::new(
            Uuid::new_v4(),
            b"b".to_vec(),
            0,
            5.into(),
            IsolationLevel::Serializable,
        );
        let mut cmd = FinalizeTxn::new(txn, commit);
        cmd.intent_spans = vec![
            Span::from_key(b"b".as_slice()),
            Span::new(b"c".as_slice(), b"f".as_slice()),
        ];
        (cmd, RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice()))
    }

    #[test]
    fn test_declare_keys_plain() {
        let (cmd, desc) = sample_cmd(true);
        let mut spans = SpanSet::default();
        cmd.declare_keys(&desc, &mut spans);

        let txn_key = Span::from_key(keys::transaction_key(b"b", cmd.txn.id.as_bytes()));
        assert!(spans.contains(SpanAccess::ReadWrite, &txn_key));
        for span in &cmd.intent_spans {
            assert!(spans.contains(SpanAccess::ReadWrite, span));
        }
        assert!(spans.contains(
            SpanAccess::ReadOnly,
            &Span::from_key(keys::abort_span_key(1, cmd.txn.id.as_bytes()))
        ));
        assert!(spans.contains(
            SpanAccess::ReadOnly,
            &Span::from_key(keys::range_descriptor_key(b"a"))
        ));
    }

    #[test]
    fn test_declare_keys_poison_rollback_writes_abort_span() {
        let (mut cmd, desc) = sample_cmd(false);
        cmd.poison = true;
        let mut spans = SpanSet::default();
        cmd.declare_keys(&desc, &mut spans);
        assert!(spans.contains(
            SpanAccess::ReadWrite,
            &Span::from_key(keys::abort_span_key(1, cmd.txn.id.as_bytes()))
        ));
    }

    #[test]
    fn test_declare_keys_split() {
        let (mut cmd, desc) = sample_cmd(true);
        cmd.commit_trigger = Some(CommitTrigger::Split(SplitTrigger {
            left_desc: RangeDescriptor::new(1, b"a".as_slice(), b"m".as_slice()),
            right_desc: RangeDescriptor::new(2, b"m".as_slice(), b"z".as_slice()),
        }));
        let mut spans = SpanSet::default();
        cmd.declare_keys(&desc, &mut spans);

        // The whole pre-split user span is blocked for writes.
        assert!(spans.contains(
            SpanAccess::ReadWrite,
            &Span::new(b"a".as_slice(), b"z".as_slice())
        ));
        let right_prefix = keys::range_id_replicated_prefix(2);
        assert!(spans.contains(
            SpanAccess::ReadWrite,
            &Span::new(right_prefix.clone(), keys::next_key(&right_prefix))
        ));
        let left_prefix = keys::range_id_replicated_prefix(1);
        assert!(spans.contains(
            SpanAccess::ReadOnly,
            &Span::new(left_prefix.clone(), keys::next_key(&left_prefix))
        ));
        assert!(spans.contains(
            SpanAccess::ReadWrite,
            &Span::from_key(keys::last_replica_gc_timestamp_key(2))
        ));
        assert!(spans.contains(
            SpanAccess::ReadOnly,
            &Span::new(keys::abort_span_min_key(1), keys::abort_span_max_key(1))
        ));
    }

    #[test]
    fn test_declare_keys_merge() {
        let (mut cmd, desc) = sample_cmd(true);
        cmd.commit_trigger = Some(CommitTrigger::Merge(MergeTrigger {
            left_desc: RangeDescriptor::new(1, b"a".as_slice(), b"zz".as_slice()),
            right_desc: RangeDescriptor::new(2, b"z".as_slice(), b"zz".as_slice()),
            right_stats: MvccStats::default(),
        }));
        let mut spans = SpanSet::default();
        cmd.declare_keys(&desc, &mut spans);

        assert!(spans.contains(
            SpanAccess::ReadWrite,
            &Span::new(b"z".as_slice(), b"zz".as_slice())
        ));
        let right_prefix = keys::range_id_replicated_prefix(2);
        assert!(spans.contains(
            SpanAccess::ReadOnly,
            &Span::new(right_prefix.clone(), keys::next_key(&right_prefix))
        ));
        let left_prefix = keys::range_id_replicated_prefix(1);
        assert!(spans.contains(
            SpanAccess::ReadWrite,
            &Span::new(left_prefix.clone(), keys::next_key(&left_prefix))
        ));
    }
}
