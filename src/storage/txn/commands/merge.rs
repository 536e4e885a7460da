// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Staging of a range merge.
//!
//! Runs before intent resolution (see the evaluator): the right-hand
//! data being absorbed contains intents that must already count as local
//! when they are resolved. The right's abort span is re-homed under the
//! left range ID, and the left's stats absorb the right's pre-merge
//! stats minus the right's replicated range-ID bookkeeping, which is not
//! carried over (except for the abort span entries, accounted by the
//! copy itself).

use txn_types::TimeStamp;

use crate::storage::abort_span::AbortSpan;
use crate::storage::kv::{Batch, MvccStats};
use crate::storage::metrics::COMMIT_TRIGGER_COUNTER_VEC;
use crate::storage::txn::commands::{EvalContext, MergeTrigger};
use crate::storage::txn::eval_result::{EvalResult, Merge};
use crate::storage::txn::Result;

pub(crate) fn merge_trigger<B: Batch>(
    ctx: &EvalContext,
    batch: &mut B,
    stats: &mut MvccStats,
    merge: &MergeTrigger,
    ts: TimeStamp,
) -> Result<EvalResult> {
    fail_point!("finalize_before_merge_staging");

    let desc = &ctx.desc;
    if desc.start_key != merge.left_desc.start_key {
        return Err(box_err!(
            "LHS range start keys do not match: {} != {}",
            hex::encode_upper(&desc.start_key),
            hex::encode_upper(&merge.left_desc.start_key)
        ));
    }
    if !(desc.end_key < merge.left_desc.end_key) {
        return Err(box_err!(
            "original LHS end key is not less than the post merge end key: {} >= {}",
            hex::encode_upper(&desc.end_key),
            hex::encode_upper(&merge.left_desc.end_key)
        ));
    }

    COMMIT_TRIGGER_COUNTER_VEC.with_label_values(&["merge"]).inc();
    info!(
        "merge range";
        "range_id" => ctx.range_id(),
        "absorbed_range_id" => merge.right_desc.range_id,
        "at" => ts,
    );

    AbortSpan::new(merge.right_desc.range_id).copy_to(
        batch,
        stats,
        merge.left_desc.range_id,
    )?;

    // The merged range's stats are LHS + RHS, less the RHS's replicated
    // range-ID span: only the abort span entries were carried over, and
    // the copy above already accounted for them.
    stats.add(&merge.right_stats);
    let rid_prefix = keys::range_id_replicated_prefix(merge.right_desc.range_id);
    let sys_ms = batch.compute_stats(&rid_prefix, &keys::next_key(&rid_prefix))?;
    stats.subtract(&sys_ms);

    let mut pd = EvalResult::default();
    pd.replicated.block_reads = true;
    pd.replicated.merge = Some(Merge {
        trigger: merge.clone(),
    });
    Ok(pd)
}

#[cfg(test)]
mod tests {
    use range_types::RangeDescriptor;
    use uuid::Uuid;

    use super::*;
    use crate::storage::abort_span::AbortSpanEntry;
    use crate::storage::kv::{compute_stats_for_range, BTreeEngine, Engine};

    fn merge_trigger_payload() -> MergeTrigger {
        MergeTrigger {
            left_desc: RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice()),
            right_desc: RangeDescriptor::new(2, b"m".as_slice(), b"z".as_slice()),
            right_stats: MvccStats::default(),
        }
    }

    fn lhs_ctx() -> EvalContext {
        EvalContext::new(
            RangeDescriptor::new(1, b"a".as_slice(), b"m".as_slice()),
            MvccStats::default(),
        )
    }

    #[test]
    fn test_merge_validates_descriptors() {
        let engine = BTreeEngine::new();
        let mut batch = engine.batch();
        let mut stats = MvccStats::default();

        // Start keys must line up.
        let mut ctx = lhs_ctx();
        ctx.desc.start_key = b"b".to_vec();
        let err = merge_trigger(&ctx, &mut batch, &mut stats, &merge_trigger_payload(), 9.into())
            .unwrap_err();
        assert!(format!("{}", err).contains("start keys do not match"));

        // The post-merge end key must extend past the current one.
        let ctx = EvalContext::new(
            RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice()),
            MvccStats::default(),
        );
        let err = merge_trigger(&ctx, &mut batch, &mut stats, &merge_trigger_payload(), 9.into())
            .unwrap_err();
        assert!(format!("{}", err).contains("not less than"));
    }

    #[test]
    fn test_merge_absorbs_rhs_and_corrects_stats() {
        let engine = BTreeEngine::new();
        // RHS user data plus RHS range-ID bookkeeping that must not
        // carry over.
        engine.put_value(b"p", 5.into(), b"right");
        let txn_id = Uuid::new_v4();
        let mut setup = engine.batch();
        AbortSpan::new(2)
            .put(
                &mut setup,
                None,
                txn_id,
                &AbortSpanEntry {
                    key: b"p".to_vec(),
                    timestamp: 3.into(),
                },
            )
            .unwrap();
        crate::storage::state::StateLoader::new(2)
            .set_gc_threshold(&mut setup, None, 2.into())
            .unwrap();
        engine.write(setup).unwrap();

        let right_desc = RangeDescriptor::new(2, b"m".as_slice(), b"z".as_slice());
        let right_stats = compute_stats_for_range(&right_desc, &engine.batch()).unwrap();

        let ctx = lhs_ctx();
        let mut batch = engine.batch();
        let mut stats = MvccStats::default();
        let merge = MergeTrigger {
            left_desc: RangeDescriptor::new(1, b"a".as_slice(), b"z".as_slice()),
            right_desc,
            right_stats,
        };
        let pd = merge_trigger(&ctx, &mut batch, &mut stats, &merge, 9.into()).unwrap();

        assert!(pd.replicated.block_reads);
        assert!(pd.replicated.merge.is_some());

        // Replay protection carried over under the LHS range ID.
        assert!(AbortSpan::new(1).get(&batch, txn_id).unwrap().is_some());

        // The delta equals exactly what the merged LHS gains: the RHS
        // user data plus the copied abort span entry; the RHS's own
        // range-ID records (abort span original, GC threshold) are
        // subtracted out.
        let merged_desc = merge.left_desc.clone();
        engine.write(batch).unwrap();
        let mut expected = compute_stats_for_range(&merged_desc, &engine.batch()).unwrap();
        let pre_merge_lhs = MvccStats::default(); // LHS engine state was empty
        expected.subtract(&pre_merge_lhs);
        assert_eq!(stats, expected);
    }
}
