// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Staging of replica-set changes and modified-span commits. Both are
//! pure bookkeeping: no extra on-disk state beyond what the transaction
//! itself wrote, only a new descriptor and local gossip hints.

use crate::storage::metrics::COMMIT_TRIGGER_COUNTER_VEC;
use crate::storage::txn::commands::{ChangeReplicasTrigger, EvalContext, ModifiedSpanTrigger};
use crate::storage::txn::eval_result::{ChangeReplicas, EvalResult};
use crate::storage::txn::Result;

pub(crate) fn change_replicas_trigger(
    ctx: &EvalContext,
    change: &ChangeReplicasTrigger,
) -> EvalResult {
    COMMIT_TRIGGER_COUNTER_VEC
        .with_label_values(&["change_replicas"])
        .inc();

    let mut pd = EvalResult::default();
    // A split racing with this replica change can fail and would then
    // wait a full scanner cycle to be retried; re-queueing here removes
    // that latency.
    pd.local.maybe_add_to_split_queue = true;

    // The first range's descriptor is gossiped on every change: the
    // lease holder may be the replica being removed, so gossip cannot
    // be left to lease transitions alone.
    pd.local.gossip_first_range = ctx.is_first_range();

    let mut desc = ctx.desc.clone();
    desc.replicas = change.updated_replicas.clone();
    desc.next_replica_id = change.next_replica_id;
    pd.replicated.desc = Some(desc);
    pd.replicated.change_replicas = Some(ChangeReplicas {
        trigger: change.clone(),
    });
    pd
}

pub(crate) fn modified_span_trigger(
    ctx: &EvalContext,
    modified: &ModifiedSpanTrigger,
) -> Result<EvalResult> {
    let mut pd = EvalResult::default();
    if modified.system_config_span {
        // Gossiping the system config can only work on the range that
        // holds the system-config span; a transaction touching system
        // and non-system data must anchor its record on the system
        // span.
        if ctx.contains_key(keys::SYSTEM_CONFIG_KEY) {
            pd.local.maybe_gossip_system_config = true;
        } else {
            error!(
                "system configuration span was modified, but the modification trigger is \
                 executing on a non-system range; configuration changes will not be gossiped";
                "range_id" => ctx.range_id(),
            );
        }
    }
    if let Some(span) = &modified.node_liveness_span {
        pd.local.maybe_gossip_node_liveness = Some(span.clone());
    }
    Ok(pd)
}
