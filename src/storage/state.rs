// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Loads and writes a range's replicated state records: lease, GC
//! thresholds, stats, plus the unreplicated per-store slots. The split
//! trigger uses this to seed a fresh right-hand range.

use range_types::{Lease, RangeDescriptor, RangeHardState};
use txn_types::TimeStamp;

use crate::storage::kv::{Batch, MvccStats, Result};

/// Log position a freshly split right-hand range starts from. Non-zero
/// so peers that voted before applying the split are served a snapshot
/// instead of an empty log.
pub const RAFT_INITIAL_LOG_INDEX: u64 = 10;
pub const RAFT_INITIAL_LOG_TERM: u64 = 5;

#[derive(Clone, Copy, Debug)]
pub struct StateLoader {
    range_id: u64,
}

impl StateLoader {
    pub fn new(range_id: u64) -> StateLoader {
        StateLoader { range_id }
    }

    pub fn load_lease<B: Batch>(&self, batch: &B) -> Result<Lease> {
        Ok(batch
            .get_record(&keys::range_lease_key(self.range_id))?
            .unwrap_or_default())
    }

    pub fn set_lease<B: Batch>(
        &self,
        batch: &mut B,
        stats: Option<&mut MvccStats>,
        lease: &Lease,
    ) -> Result<()> {
        batch.put_record(stats, &keys::range_lease_key(self.range_id), lease)
    }

    pub fn load_gc_threshold<B: Batch>(&self, batch: &B) -> Result<TimeStamp> {
        Ok(batch
            .get_record(&keys::gc_threshold_key(self.range_id))?
            .unwrap_or_else(TimeStamp::zero))
    }

    pub fn set_gc_threshold<B: Batch>(
        &self,
        batch: &mut B,
        stats: Option<&mut MvccStats>,
        threshold: TimeStamp,
    ) -> Result<()> {
        batch.put_record(stats, &keys::gc_threshold_key(self.range_id), &threshold)
    }

    pub fn load_txn_span_gc_threshold<B: Batch>(&self, batch: &B) -> Result<TimeStamp> {
        Ok(batch
            .get_record(&keys::txn_span_gc_threshold_key(self.range_id))?
            .unwrap_or_else(TimeStamp::zero))
    }

    pub fn set_txn_span_gc_threshold<B: Batch>(
        &self,
        batch: &mut B,
        stats: Option<&mut MvccStats>,
        threshold: TimeStamp,
    ) -> Result<()> {
        batch.put_record(stats, &keys::txn_span_gc_threshold_key(self.range_id), &threshold)
    }

    pub fn load_stats<B: Batch>(&self, batch: &B) -> Result<MvccStats> {
        Ok(batch
            .get_record(&keys::range_stats_key(self.range_id))?
            .unwrap_or_default())
    }

    pub fn set_stats<B: Batch>(
        &self,
        batch: &mut B,
        stats: Option<&mut MvccStats>,
        ms: &MvccStats,
    ) -> Result<()> {
        batch.put_record(stats, &keys::range_stats_key(self.range_id), ms)
    }

    /// Unreplicated: never counted in range stats.
    pub fn load_last_replica_gc_timestamp<B: Batch>(&self, batch: &B) -> Result<TimeStamp> {
        Ok(batch
            .get_record(&keys::last_replica_gc_timestamp_key(self.range_id))?
            .unwrap_or_else(TimeStamp::zero))
    }

    pub fn set_last_replica_gc_timestamp<B: Batch>(
        &self,
        batch: &mut B,
        ts: TimeStamp,
    ) -> Result<()> {
        batch.put_record(None, &keys::last_replica_gc_timestamp_key(self.range_id), &ts)
    }

    /// Writes a fresh range's complete replicated state: descriptor,
    /// lease, GC thresholds and stats. `ms` is the range's absolute
    /// stats before this call; the returned stats fold in the writes
    /// made here, which themselves count against the range.
    pub fn write_initial_replicated_state<B: Batch>(
        &self,
        batch: &mut B,
        mut ms: MvccStats,
        desc: &RangeDescriptor,
        lease: &Lease,
        gc_threshold: TimeStamp,
        txn_span_gc_threshold: TimeStamp,
    ) -> Result<MvccStats> {
        debug_assert_eq!(self.range_id, desc.range_id);
        batch.put_record(
            Some(&mut ms),
            &keys::range_descriptor_key(&desc.start_key),
            desc,
        )?;
        self.set_lease(batch, Some(&mut ms), lease)?;
        self.set_gc_threshold(batch, Some(&mut ms), gc_threshold)?;
        self.set_txn_span_gc_threshold(batch, Some(&mut ms), txn_span_gc_threshold)?;
        let snapshot = ms;
        self.set_stats(batch, Some(&mut ms), &snapshot)?;
        Ok(ms)
    }

    /// Writes an initial consensus hard state upstream of consensus.
    /// Only needed while peers lacking the downstream writer may replay
    /// the split; downstream application may clobber it later.
    pub fn synthesize_hard_state<B: Batch>(&self, batch: &mut B) -> Result<()> {
        let hs = RangeHardState {
            term: RAFT_INITIAL_LOG_TERM,
            vote: 0,
            commit: RAFT_INITIAL_LOG_INDEX,
        };
        batch.put_record(None, &keys::raft_hard_state_key(self.range_id), &hs)
    }
}
