// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Staging of a range split.
//!
//! Runs on a successful commit of a transaction carrying a split
//! trigger. Within the commit's batch it copies the abort span and the
//! last-replica-GC timestamp to the new right-hand range, recomputes
//! absolute stats for the left-hand side (split points are chosen to
//! keep the LHS small, so the iteration is bounded) and derives the
//! right-hand stats arithmetically when no estimates are involved, then
//! seeds the RHS's replicated state so the new consensus group can start
//! from it. The returned stats are the LHS delta; the RHS delta travels
//! in the replicated split payload for the store to account the new
//! range.

use txn_types::TimeStamp;

use crate::storage::abort_span::AbortSpan;
use crate::storage::kv::{compute_stats_for_range, Batch, MvccStats};
use crate::storage::metrics::COMMIT_TRIGGER_COUNTER_VEC;
use crate::storage::state::StateLoader;
use crate::storage::txn::commands::{EvalContext, SplitTrigger};
use crate::storage::txn::eval_result::{EvalResult, Split};
use crate::storage::txn::{Error, Result};

pub(crate) fn split_trigger<B: Batch>(
    ctx: &EvalContext,
    batch: &mut B,
    mut both_delta: MvccStats,
    split: &SplitTrigger,
    ts: TimeStamp,
) -> Result<(MvccStats, EvalResult)> {
    fail_point!("finalize_before_split_staging");
    COMMIT_TRIGGER_COUNTER_VEC.with_label_values(&["split"]).inc();

    let desc = &ctx.desc;
    if desc.start_key != split.left_desc.start_key || desc.end_key != split.right_desc.end_key {
        return Err(box_err!(
            "range does not match splits: {:?} + {:?} != {:?}",
            split.left_desc,
            split.right_desc,
            desc
        ));
    }

    info!(
        "split range";
        "range_id" => ctx.range_id(),
        "new_range_id" => split.right_desc.range_id,
        "split_key" => hex::encode_upper(&split.right_desc.start_key),
        "at" => ts,
    );

    // Absolute stats of the pre-split range, excluding this batch.
    let orig_both = ctx.stats;

    // Absolute LHS stats from a clean iteration over the batch. Nothing
    // below may write to the LHS.
    let left_ms = compute_stats_for_range(&split.left_desc, batch)
        .map_err(|e| -> Error { box_err!("unable to compute stats for LHS range after split: {}", e) })?;

    // The last-replica-GC timestamp is unreplicated, which is why no
    // stats accumulator is involved in the copy.
    let replica_gc_ts = StateLoader::new(ctx.range_id()).load_last_replica_gc_timestamp(batch)?;
    StateLoader::new(split.right_desc.range_id)
        .set_last_replica_gc_timestamp(batch, replica_gc_ts)
        .map_err(|e| -> Error { box_err!("unable to copy last replica GC timestamp: {}", e) })?;

    // Seed the RHS abort span from the LHS's, preserving replay
    // protection for keys that change ownership.
    AbortSpan::new(ctx.range_id()).copy_to(batch, &mut both_delta, split.right_desc.range_id)?;

    let mut right_ms = if orig_both.contains_estimates || both_delta.contains_estimates {
        // Estimated inputs rule out arithmetic; recompute by iterating
        // the RHS. The result carries no estimates.
        compute_stats_for_range(&split.right_desc, batch).map_err(|e| -> Error {
            box_err!("unable to compute stats for RHS range after split: {}", e)
        })?
    } else {
        //   rhs = orig_both - lhs_absolute + both_delta
        // and none of the inputs contains estimates, so neither does
        // the result.
        let mut ms = orig_both;
        ms.subtract(&left_ms);
        ms.add(&both_delta);
        ms
    };

    {
        let pre_right_ms = right_ms;

        // The RHS must start with the LHS's lease translated to its own
        // replica set: a replica's lease is never uninitialized, and the
        // lease holder is where the new range's timestamp state carries
        // over from.
        let left_loader = StateLoader::new(ctx.range_id());
        let left_lease = left_loader
            .load_lease(batch)
            .map_err(|e| -> Error { box_err!("unable to load lease: {}", e) })?;
        if left_lease.is_empty() {
            return Err(box_err!("LHS of split has no lease"));
        }
        let replica = split
            .right_desc
            .replica_by_store(left_lease.replica.store_id)
            .ok_or_else(|| -> Error {
                box_err!(
                    "pre-split lease holder {:?} not found in post-split descriptor {:?}",
                    left_lease.replica,
                    split.right_desc
                )
            })?;
        let mut right_lease = left_lease;
        right_lease.replica = replica;

        let gc_threshold = left_loader.load_gc_threshold(batch)?;
        if gc_threshold.is_zero() {
            debug!("LHS's GC threshold of split is not set");
        }
        let txn_span_gc_threshold = left_loader.load_txn_span_gc_threshold(batch)?;
        if txn_span_gc_threshold.is_zero() {
            debug!("LHS's txn span GC threshold of split is not set");
        }

        let right_loader = StateLoader::new(split.right_desc.range_id);
        right_ms = right_loader
            .write_initial_replicated_state(
                batch,
                right_ms,
                &split.right_desc,
                &right_lease,
                gc_threshold,
                txn_span_gc_threshold,
            )
            .map_err(|e| -> Error { box_err!("unable to write initial replica state: {}", e) })?;

        if !ctx.settings.split_hard_state_below_raft {
            // Peers lacking the downstream-of-consensus writer crash on
            // a split without a hard state; write one here even though
            // downstream application may clobber it.
            right_loader
                .synthesize_hard_state(batch)
                .map_err(|e| -> Error { box_err!("unable to synthesize initial hard state: {}", e) })?;
        }

        // The init writes above went to the RHS inside this batch; fold
        // their effect into the batch-wide delta.
        both_delta.subtract(&pre_right_ms);
        both_delta.add(&right_ms);
    }

    // Turn the recomputed absolute LHS stats into the delta the caller
    // propagates upward.
    let mut left_delta = left_ms;
    left_delta.subtract(&orig_both);
    left_delta.contains_estimates = false; // recomputation removed any

    // The RHS has no replica yet to apply its delta; it rides in the
    // trigger for the store's running counters.
    let mut right_delta = both_delta;
    right_delta.subtract(&left_delta);

    let mut pd = EvalResult::default();
    pd.replicated.block_reads = true;
    pd.replicated.split = Some(Split {
        trigger: split.clone(),
        rhs_delta: right_delta,
    });
    Ok((left_delta, pd))
}
