// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! The slice of the MVCC storage engine the finalization path relies on.
//!
//! The engine itself (LSM plumbing, raw MVCC encoding, the resolve
//! machinery) lives behind these traits; evaluation only ever sees an
//! exclusively-owned write batch with read-your-writes semantics that
//! becomes durable atomically at apply time.

mod btree_engine;
mod stats;

use std::error;
use std::result;

use codec::Record;
use range_types::RangeDescriptor;
use thiserror::Error;
use txn_types::{Intent, Span, TimeStamp};

pub use btree_engine::{BTreeBatch, BTreeEngine};
pub use stats::MvccStats;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Engine {0}")]
    Engine(String),
    #[error("Codec {0}")]
    Codec(#[from] codec::Error),
    #[error("{0:?}")]
    Other(#[from] Box<dyn error::Error + Sync + Send>),
}

pub type Result<T> = result::Result<T, Error>;

/// Iterator bounds for intent resolution. Built once per evaluation and
/// passed to every resolve call so the engine can reuse one time-bounded
/// iterator across all spans.
#[derive(Clone, Debug, Default)]
pub struct IterOptions {
    pub min_timestamp_hint: TimeStamp,
    pub max_timestamp_hint: TimeStamp,
    pub upper_bound: Vec<u8>,
}

/// A write batch over a point-in-time view of the engine. Reads observe
/// the batch's own writes. An empty `end` key means the scan is
/// unbounded.
///
/// Mutations take an optional stats accumulator; `None` is reserved for
/// unreplicated keys, which are excluded from a range's replicated
/// statistics.
pub trait Batch {
    fn get_record<R: Record>(&self, key: &[u8]) -> Result<Option<R>>;

    fn put_record<R: Record>(
        &mut self,
        stats: Option<&mut MvccStats>,
        key: &[u8],
        record: &R,
    ) -> Result<()>;

    fn delete_record(&mut self, stats: Option<&mut MvccStats>, key: &[u8]) -> Result<()>;

    /// Ordered scan of the inline records in `[start, end)`.
    fn scan_records(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Resolves the intent at the single key `intent.span.start`:
    /// upgrades it to a committed value at `intent.timestamp` or removes
    /// it, per `intent.status`. Resolving an absent intent is a no-op.
    fn resolve_intent(
        &mut self,
        opts: &IterOptions,
        stats: Option<&mut MvccStats>,
        intent: &Intent,
    ) -> Result<()>;

    /// Resolves up to `max_keys` intents of `intent.txn_id` inside
    /// `intent.span`. Returns the number of intent keys resolved and,
    /// when the cap cut the scan short, the span that remains.
    fn resolve_intent_range(
        &mut self,
        opts: &IterOptions,
        stats: Option<&mut MvccStats>,
        intent: &Intent,
        max_keys: u64,
    ) -> Result<(u64, Option<Span>)>;

    /// Iteration-derived absolute stats of `[start, end)`.
    fn compute_stats(&self, start: &[u8], end: &[u8]) -> Result<MvccStats>;
}

pub trait Engine: Send + Sync {
    type Batch: Batch;

    fn batch(&self) -> Self::Batch;

    /// Applies the batch atomically.
    fn write(&self, batch: Self::Batch) -> Result<()>;
}

/// Absolute stats of all replicated data of a range: its replicated
/// range-ID span, its range-local span and its user span. Unreplicated
/// range-ID keys are deliberately not part of a range's stats.
pub fn compute_stats_for_range<B: Batch>(desc: &RangeDescriptor, batch: &B) -> Result<MvccStats> {
    let mut ms = MvccStats::default();

    let repl = keys::range_id_replicated_prefix(desc.range_id);
    ms.add(&batch.compute_stats(&repl, &keys::next_key(&repl))?);

    let local_start = keys::make_range_key_prefix(&desc.start_key);
    let local_end = if desc.end_key.is_empty() {
        keys::range_local_max_key()
    } else {
        keys::make_range_key_prefix(&desc.end_key)
    };
    ms.add(&batch.compute_stats(&local_start, &local_end)?);

    let user_start = if desc.start_key.as_slice() < keys::LOCAL_MAX_KEY {
        keys::LOCAL_MAX_KEY
    } else {
        desc.start_key.as_slice()
    };
    ms.add(&batch.compute_stats(user_start, &desc.end_key)?);

    Ok(ms)
}
