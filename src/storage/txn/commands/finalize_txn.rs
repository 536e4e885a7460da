// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Evaluation of [`FinalizeTxn`]: commits or rolls back an extant
//! transaction. Rolling back an already rolled-back transaction is ok.

use std::sync::atomic::Ordering;

use range_types::{contains_key, intersect_span};
use txn_types::{AbortReason, Intent, RetryReason, Span, TimeStamp, Transaction, TxnStatus};

use crate::storage::abort_span::AbortSpan;
use crate::storage::kv::{Batch, IterOptions, MvccStats};
use crate::storage::metrics::{
    FINALIZE_TXN_COUNTER_VEC, INTENT_KEYS_RESOLVED, INTENT_SPANS_DEFERRED,
};
use crate::storage::txn::commands::{change_replicas, merge, split};
use crate::storage::txn::commands::{CommitTrigger, EvalContext, FinalizeTxn};
use crate::storage::txn::eval_result::EvalResult;
use crate::storage::txn::{txn_auto_gc, Error, Result};

/// Cap on intent-key resolutions performed inside the batch. The
/// consensus log imposes a practical limit on batch size; everything
/// past the allowance is deferred to asynchronous resolution.
pub const INTENT_RESOLUTION_BATCH_SIZE: u64 = 500;

macro_rules! try_eval {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return (EvalResult::default(), Err(Error::from(e))),
        }
    };
}

fn evaluation_error(e: Error) -> (EvalResult, Result<Transaction>) {
    (EvalResult::default(), Err(e))
}

impl FinalizeTxn {
    /// Evaluates the finalization against `batch`. Every write lands in
    /// the batch; `stats` accumulates the batch's stats delta. On error
    /// the batch must be discarded — except that an abort discovered in
    /// the record still surfaces the intents through the returned
    /// result so the asynchronous resolver can clean them up.
    pub fn process_write<B: Batch>(
        self,
        batch: &mut B,
        ctx: &EvalContext,
        stats: &mut MvccStats,
    ) -> (EvalResult, Result<Transaction>) {
        fail_point!("finalize_txn_process_write");

        if !self.txn.is_initialized() {
            return evaluation_error(Error::TxnStatus("transaction not initialized".to_owned()));
        }
        // A one-phase-commit attempt that fell through to separate
        // finalization already failed its promise.
        if self.require_one_pc {
            return evaluation_error(Error::TxnStatus(
                "could not commit in one phase as requested".to_owned(),
            ));
        }

        let record_key = keys::transaction_key(&self.txn.anchor_key, self.txn.id.as_bytes());
        let mut reply: Transaction = match try_eval!(batch.get_record(&record_key)) {
            Some(txn) => txn,
            None => {
                if self.commit {
                    return evaluation_error(Error::TxnNotFound(self.txn.id));
                }
                // Rollbacks for transactions whose record was never
                // written are accepted without fuss; there is nothing
                // durable to undo.
                return (EvalResult::default(), Ok(self.txn.clone()));
            }
        };

        match reply.status {
            TxnStatus::Committed => {
                return evaluation_error(Error::TxnCommitted);
            }
            TxnStatus::Aborted if !self.commit => {
                // Someone else aborted it first. The client wanted an
                // abort anyway, so finish the job instead of erroring.
                let external =
                    try_eval!(resolve_local_intents(batch, ctx, stats, &self, &reply));
                try_eval!(update_txn_record(batch, stats, &mut reply, external));
                // The transaction is definitely aborted no matter what
                // happens to this command, hence always = true.
                let pd = EvalResult::from_end_txn(reply.clone(), true, self.poison);
                return (pd, Ok(reply));
            }
            TxnStatus::Aborted => {
                // A concurrent pusher aborted the record while the
                // intents were still being written; only now are they
                // all known. Surface them for asynchronous resolution.
                reply.intents = self.intent_spans.clone();
                let pd = EvalResult::from_end_txn(reply.clone(), true, self.poison);
                return (pd, Err(Error::TxnAborted(AbortReason::AbortedRecordFound)));
            }
            TxnStatus::Pending => {
                if self.txn.epoch < reply.epoch {
                    return evaluation_error(Error::TxnStatus(format!(
                        "epoch regression: {}",
                        self.txn.epoch
                    )));
                }
                if self.txn.epoch == reply.epoch && reply.timestamp < self.txn.orig_timestamp {
                    // The record can only ever be pushed forward.
                    return evaluation_error(Error::TxnStatus(format!(
                        "timestamp regression: {}",
                        self.txn.orig_timestamp
                    )));
                }
            }
        }

        // Fold the client's newer view into the record.
        reply.update(&self.txn);

        let mut pd = EvalResult::default();

        if self.commit {
            if let Some(reason) = is_finalize_triggering_retry(&reply, self.no_refresh_spans) {
                return evaluation_error(Error::TxnRetry(reason));
            }
            if is_finalize_exceeding_deadline(reply.timestamp, self.deadline) {
                // The record stays PENDING; the client is expected to
                // issue a rollback that aborts and cleans up.
                return evaluation_error(Error::TxnStatus(
                    "transaction deadline exceeded".to_owned(),
                ));
            }

            reply.status = TxnStatus::Committed;

            // Merge triggers run before intent resolution: the
            // right-hand data being absorbed contains intents that
            // become locally owned once the descriptor widens, and a
            // committed transaction must never leave intents on local
            // range metadata.
            if let Some(CommitTrigger::Merge(mt)) = &self.commit_trigger {
                let merge_result =
                    try_eval!(merge::merge_trigger(ctx, batch, stats, mt, reply.timestamp));
                try_eval!(pd.merge(merge_result));
            }
        } else {
            reply.status = TxnStatus::Aborted;
        }

        let external = try_eval!(resolve_local_intents(batch, ctx, stats, &self, &reply));
        try_eval!(update_txn_record(batch, stats, &mut reply, external));

        if reply.status == TxnStatus::Committed {
            // Past this point the record is COMMITTED in-batch; a
            // trigger failure leaves disk and belief out of sync.
            let trigger_result = match run_commit_trigger(ctx, batch, stats, &self, &reply) {
                Ok(r) => r,
                Err(e) => {
                    error!(
                        "commit trigger failed after status moved to COMMITTED";
                        "range_id" => ctx.range_id(),
                        "txn" => reply.short(),
                        "err" => %e,
                    );
                    return evaluation_error(Error::ReplicaCorruption(format!(
                        "commit trigger failed: {}",
                        e
                    )));
                }
            };
            try_eval!(pd.merge(trigger_result));
        }

        FINALIZE_TXN_COUNTER_VEC
            .with_label_values(&[if self.commit { "commit" } else { "rollback" }])
            .inc();

        // always = false: if the commit fails below consensus, the
        // intents must not be up for resolution, or writes that never
        // became durable could be lost.
        let mut intents_result = EvalResult::from_end_txn(reply.clone(), false, self.poison);
        intents_result.local.updated_txns = vec![reply.clone()];
        try_eval!(pd.merge(intents_result));
        (pd, Ok(reply))
    }
}

/// Whether the commit must return a retry error instead of proceeding.
pub fn is_finalize_triggering_retry(
    txn: &Transaction,
    no_refresh_spans: bool,
) -> Option<RetryReason> {
    let mut reason = None;
    if txn.write_too_old {
        // A write-too-old commit would admit lost updates.
        reason = Some(RetryReason::WriteTooOld);
    } else {
        let mut effective_orig = txn.orig_timestamp;
        effective_orig.forward(txn.refreshed_timestamp);
        let is_pushed = txn.timestamp != effective_orig;
        if is_pushed {
            if txn.is_serializable() {
                reason = Some(RetryReason::Serializable);
            } else if txn.retry_on_push {
                reason = Some(RetryReason::DeleteRange);
            }
        }
    }

    // A serializable transaction can still avoid the retry if its
    // original timestamp never leaked to a client and no read span needs
    // revalidation at the pushed timestamp.
    if reason.is_some()
        && txn.is_serializable()
        && can_forward_serializable_timestamp(txn, no_refresh_spans)
    {
        reason = None;
    }
    reason
}

pub fn can_forward_serializable_timestamp(txn: &Transaction, no_refresh_spans: bool) -> bool {
    !txn.orig_timestamp_was_observed && no_refresh_spans
}

pub fn is_finalize_exceeding_deadline(commit_ts: TimeStamp, deadline: Option<TimeStamp>) -> bool {
    deadline.map_or(false, |d| d < commit_ts)
}

/// Synchronously resolves the intents local to this range inside the
/// batch; collects the remainder for asynchronous resolution. At most
/// [`INTENT_RESOLUTION_BATCH_SIZE`] intent keys are resolved in-batch so
/// the batch stays within what the consensus log accepts; local intents
/// past the allowance are treated as external.
pub(crate) fn resolve_local_intents<B: Batch>(
    batch: &mut B,
    ctx: &EvalContext,
    stats: &mut MvccStats,
    args: &FinalizeTxn,
    txn: &Transaction,
) -> Result<Vec<Span>> {
    fail_point!("finalize_before_intent_resolution");

    let mut desc = &ctx.desc;
    if let Some(CommitTrigger::Merge(mt)) = &args.commit_trigger {
        // Under a merge, locality is decided by the post-merge
        // descriptor so the absorbed right-hand keys count as local.
        // (For a split the pre-split descriptor is the larger one and
        // is the right one to use.)
        desc = &mt.left_desc;
    }

    let (min_ts, max_ts) = txn.inclusive_time_bounds();
    let opts = IterOptions {
        min_timestamp_hint: min_ts,
        max_timestamp_hint: max_ts,
        upper_bound: desc.end_key.clone(),
    };

    let mut external = Vec::new();
    let mut allowance = INTENT_RESOLUTION_BATCH_SIZE;
    let mut resolved = 0u64;
    for span in &args.intent_spans {
        if allowance == 0 {
            external.push(span.clone());
            continue;
        }
        let mut intent = Intent::new(span.clone(), txn.id, txn.timestamp, txn.status);
        if span.is_point() {
            // Key-addressing aware containment: a range-local intent
            // (e.g. on a range descriptor) counts by its anchor key.
            if !contains_key(desc, &span.start) {
                external.push(span.clone());
                continue;
            }
            allowance -= 1;
            resolved += 1;
            batch
                .resolve_intent(&opts, Some(&mut *stats), &intent)
                .map_err(|e| corruption_resolving(span, txn, e))?;
        } else {
            // Cut the span into the part inside the range and the parts
            // outside. Resolve inside, delegate the rest. An intent
            // range over range-local data lands inside correctly.
            let (inside, outside) = intersect_span(span, desc);
            external.extend(outside);
            if let Some(in_span) = inside {
                intent.span = in_span;
                let (num, resume_span) = batch
                    .resolve_intent_range(&opts, Some(&mut *stats), &intent, allowance)
                    .map_err(|e| corruption_resolving(span, txn, e))?;
                if let Some(counter) = &ctx.knobs.num_keys_evaluated_for_range_intent_resolution {
                    counter.fetch_add(num as i64, Ordering::Relaxed);
                }
                allowance -= num;
                resolved += num;
                if let Some(resume) = resume_span {
                    if allowance != 0 {
                        return Err(Error::ReplicaCorruption(format!(
                            "expected resolve allowance to be exactly 0 resolving {:?}; got {}",
                            intent.span, allowance
                        )));
                    }
                    external.push(resume);
                }
            }
        }
    }

    if args.poison && txn.status == TxnStatus::Aborted {
        AbortSpan::new(ctx.range_id()).poison(batch, Some(stats), txn)?;
    }

    INTENT_KEYS_RESOLVED.inc_by(resolved);
    if !external.is_empty() {
        INTENT_SPANS_DEFERRED.inc_by(external.len() as u64);
    }
    Ok(external)
}

fn corruption_resolving(span: &Span, txn: &Transaction, e: crate::storage::kv::Error) -> Error {
    Error::ReplicaCorruption(format!(
        "error resolving intent at {:?} on finalize [{:?}]: {}",
        span, txn.status, e
    ))
}

/// Persists the record with its new status, or deletes it right away
/// when auto-GC is on and no intents remain for anyone to look up.
pub(crate) fn update_txn_record<B: Batch>(
    batch: &mut B,
    stats: &mut MvccStats,
    txn: &mut Transaction,
    external_intents: Vec<Span>,
) -> Result<()> {
    let record_key = keys::transaction_key(&txn.anchor_key, txn.id.as_bytes());
    if txn_auto_gc() && external_intents.is_empty() {
        debug!("auto-gc'ed transaction record"; "txn" => txn.short());
        batch.delete_record(Some(stats), &record_key)?;
    } else {
        txn.intents = external_intents;
        batch.put_record(Some(stats), &record_key, txn)?;
    }
    Ok(())
}

/// Stages the structural side effects of a successful commit.
pub(crate) fn run_commit_trigger<B: Batch>(
    ctx: &EvalContext,
    batch: &mut B,
    stats: &mut MvccStats,
    args: &FinalizeTxn,
    txn: &Transaction,
) -> Result<EvalResult> {
    let trigger = match &args.commit_trigger {
        None => return Ok(EvalResult::default()),
        Some(ct) => ct,
    };
    match trigger {
        CommitTrigger::Split(st) => {
            let (new_stats, pd) = split::split_trigger(ctx, batch, *stats, st, txn.timestamp)?;
            *stats = new_stats;
            Ok(pd)
        }
        CommitTrigger::ChangeReplicas(crt) => {
            Ok(change_replicas::change_replicas_trigger(ctx, crt))
        }
        CommitTrigger::ModifiedSpan(mst) => change_replicas::modified_span_trigger(ctx, mst),
        // Merge triggers were handled earlier, before intent resolution.
        CommitTrigger::Merge(_) => Ok(EvalResult::default()),
    }
}
