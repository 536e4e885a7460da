// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! The structured result of one evaluation.
//!
//! The `replicated` compartment is observed by every replica when the
//! batch applies; the `local` compartment only steers the replica that
//! evaluated the command. Results compose via [`EvalResult::merge`],
//! which refuses to combine two results that both carry the same
//! single-occupancy payload.

use range_types::RangeDescriptor;
use txn_types::{Span, Transaction};

use crate::storage::kv::MvccStats;
use crate::storage::txn::commands::{ChangeReplicasTrigger, MergeTrigger, SplitTrigger};
use crate::storage::txn::Result;

/// Split payload replicated through consensus. Carries the stats delta
/// of the right-hand side so the store hosting the new range can account
/// for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Split {
    pub trigger: SplitTrigger,
    pub rhs_delta: MvccStats,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Merge {
    pub trigger: MergeTrigger,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChangeReplicas {
    pub trigger: ChangeReplicasTrigger,
}

#[derive(Debug, Default)]
pub struct Replicated {
    /// Quiesce reads while the range's identity changes underneath them.
    pub block_reads: bool,
    pub split: Option<Split>,
    pub merge: Option<Merge>,
    pub change_replicas: Option<ChangeReplicas>,
    /// Updated range descriptor, when the command changed it.
    pub desc: Option<RangeDescriptor>,
}

/// The finalized transaction and its intents, handed to the asynchronous
/// resolver. With `always` unset the hand-off only happens if the command
/// actually applied, so an abort below consensus cannot leak resolution
/// work for writes that never became durable.
#[derive(Clone, Debug)]
pub struct EndTxnIntents {
    pub txn: Transaction,
    pub always: bool,
    pub poison: bool,
}

#[derive(Debug, Default)]
pub struct Local {
    pub updated_txns: Vec<Transaction>,
    pub end_txns: Vec<EndTxnIntents>,
    pub gossip_first_range: bool,
    pub maybe_add_to_split_queue: bool,
    pub maybe_gossip_system_config: bool,
    pub maybe_gossip_node_liveness: Option<Span>,
}

#[derive(Debug, Default)]
pub struct EvalResult {
    pub replicated: Replicated,
    pub local: Local,
}

impl EvalResult {
    pub fn from_end_txn(txn: Transaction, always: bool, poison: bool) -> EvalResult {
        let mut pd = EvalResult::default();
        pd.local.end_txns.push(EndTxnIntents { txn, always, poison });
        pd
    }

    pub fn is_zero(&self) -> bool {
        let Replicated {
            block_reads,
            split,
            merge,
            change_replicas,
            desc,
        } = &self.replicated;
        let Local {
            updated_txns,
            end_txns,
            gossip_first_range,
            maybe_add_to_split_queue,
            maybe_gossip_system_config,
            maybe_gossip_node_liveness,
        } = &self.local;
        !block_reads
            && split.is_none()
            && merge.is_none()
            && change_replicas.is_none()
            && desc.is_none()
            && updated_txns.is_empty()
            && end_txns.is_empty()
            && !gossip_first_range
            && !maybe_add_to_split_queue
            && !maybe_gossip_system_config
            && maybe_gossip_node_liveness.is_none()
    }

    /// Folds `other` into `self`, consuming it. Fails if both carry the
    /// same single-occupancy payload.
    pub fn merge(&mut self, other: EvalResult) -> Result<()> {
        self.replicated.block_reads |= other.replicated.block_reads;
        merge_opt(&mut self.replicated.split, other.replicated.split, "split")?;
        merge_opt(&mut self.replicated.merge, other.replicated.merge, "merge")?;
        merge_opt(
            &mut self.replicated.change_replicas,
            other.replicated.change_replicas,
            "change replicas",
        )?;
        merge_opt(&mut self.replicated.desc, other.replicated.desc, "descriptor")?;

        self.local.updated_txns.extend(other.local.updated_txns);
        self.local.end_txns.extend(other.local.end_txns);
        self.local.gossip_first_range |= other.local.gossip_first_range;
        self.local.maybe_add_to_split_queue |= other.local.maybe_add_to_split_queue;
        self.local.maybe_gossip_system_config |= other.local.maybe_gossip_system_config;
        merge_opt(
            &mut self.local.maybe_gossip_node_liveness,
            other.local.maybe_gossip_node_liveness,
            "node liveness span",
        )?;
        Ok(())
    }
}

fn merge_opt<T>(dst: &mut Option<T>, src: Option<T>, what: &str) -> Result<()> {
    match (dst.is_some(), src) {
        (true, Some(_)) => Err(box_err!("conflicting {} payloads in evaluation result", what)),
        (_, src) => {
            if src.is_some() {
                *dst = src;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use range_types::RangeDescriptor;

    #[test]
    fn test_zero_value() {
        assert!(EvalResult::default().is_zero());
        let mut pd = EvalResult::default();
        pd.replicated.block_reads = true;
        assert!(!pd.is_zero());
    }

    #[test]
    fn test_merge_combines_compartments() {
        let mut pd = EvalResult::default();
        let mut other = EvalResult::default();
        other.replicated.block_reads = true;
        other.local.maybe_add_to_split_queue = true;
        other.replicated.desc = Some(RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice()));
        pd.merge(other).unwrap();
        assert!(pd.replicated.block_reads);
        assert!(pd.local.maybe_add_to_split_queue);
        assert!(pd.replicated.desc.is_some());
    }

    #[test]
    fn test_merge_rejects_colliding_payloads() {
        let mut pd = EvalResult::default();
        pd.replicated.desc = Some(RangeDescriptor::new(1, b"a".as_slice(), b"m".as_slice()));
        let mut other = EvalResult::default();
        other.replicated.desc = Some(RangeDescriptor::new(2, b"m".as_slice(), b"z".as_slice()));
        assert!(pd.merge(other).is_err());
    }
}
