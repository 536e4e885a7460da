// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! The abort span: per-range records asserting that a transaction is
//! known to be aborted. A poisoned entry makes stale replays of the
//! transaction's writes fail loudly instead of succeeding silently.

use codec::prelude::*;
use codec::{Record, Result as CodecResult};
use txn_types::{TimeStamp, Transaction};
use uuid::Uuid;

use crate::storage::kv::{Batch, Error, MvccStats, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortSpanEntry {
    /// The aborted transaction's anchor key.
    pub key: Vec<u8>,
    pub timestamp: TimeStamp,
}

impl Record for AbortSpanEntry {
    fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(self.key.len() + 10);
        b.encode_compact_bytes(&self.key).unwrap();
        b.encode_var_u64(self.timestamp.into_inner()).unwrap();
        b
    }

    fn parse(buf: &[u8]) -> CodecResult<AbortSpanEntry> {
        let mut b = buf;
        Ok(AbortSpanEntry {
            key: b.decode_compact_bytes()?,
            timestamp: b.decode_var_u64()?.into(),
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AbortSpan {
    range_id: u64,
}

impl AbortSpan {
    pub fn new(range_id: u64) -> AbortSpan {
        AbortSpan { range_id }
    }

    pub fn min_key(&self) -> Vec<u8> {
        keys::abort_span_min_key(self.range_id)
    }

    pub fn max_key(&self) -> Vec<u8> {
        keys::abort_span_max_key(self.range_id)
    }

    pub fn get<B: Batch>(&self, batch: &B, txn_id: Uuid) -> Result<Option<AbortSpanEntry>> {
        batch.get_record(&keys::abort_span_key(self.range_id, txn_id.as_bytes()))
    }

    pub fn put<B: Batch>(
        &self,
        batch: &mut B,
        stats: Option<&mut MvccStats>,
        txn_id: Uuid,
        entry: &AbortSpanEntry,
    ) -> Result<()> {
        batch.put_record(stats, &keys::abort_span_key(self.range_id, txn_id.as_bytes()), entry)
    }

    /// Writes the poison entry for an aborted transaction.
    pub fn poison<B: Batch>(
        &self,
        batch: &mut B,
        stats: Option<&mut MvccStats>,
        txn: &Transaction,
    ) -> Result<()> {
        self.put(
            batch,
            stats,
            txn.id,
            &AbortSpanEntry {
                key: txn.anchor_key.clone(),
                timestamp: txn.timestamp,
            },
        )
    }

    /// Copies every entry of this range's abort span to
    /// `dest_range_id`, preserving replay protection when key ownership
    /// moves during splits and merges. Each entry's key is rebuilt from
    /// the owning transaction id, so the copy lands under the
    /// destination's abort span regardless of key layout details.
    pub fn copy_to<B: Batch>(
        &self,
        batch: &mut B,
        stats: &mut MvccStats,
        dest_range_id: u64,
    ) -> Result<usize> {
        let dest = AbortSpan::new(dest_range_id);
        let entries = batch.scan_records(&self.min_key(), &self.max_key())?;
        let count = entries.len();
        for (key, value) in entries {
            let txn_id = keys::decode_abort_span_key(self.range_id, &key)
                .map_err(|e| Error::Engine(e.to_string()))?;
            let entry = AbortSpanEntry::parse(&value)?;
            dest.put(batch, Some(&mut *stats), Uuid::from_bytes(txn_id), &entry)?;
        }
        debug!(
            "abort span copied";
            "from_range_id" => self.range_id,
            "to_range_id" => dest_range_id,
            "entries" => count,
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::{BTreeEngine, Engine};
    use txn_types::IsolationLevel;

    #[test]
    fn test_put_get_round_trip() {
        let engine = BTreeEngine::new();
        let mut batch = engine.batch();
        let span = AbortSpan::new(1);
        let txn_id = Uuid::new_v4();
        assert_eq!(span.get(&batch, txn_id).unwrap(), None);

        let entry = AbortSpanEntry {
            key: b"anchor".to_vec(),
            timestamp: 9.into(),
        };
        span.put(&mut batch, None, txn_id, &entry).unwrap();
        assert_eq!(span.get(&batch, txn_id).unwrap(), Some(entry));
        assert_eq!(span.get(&batch, Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_poison_uses_txn_state() {
        let engine = BTreeEngine::new();
        let mut batch = engine.batch();
        let txn = Transaction::new(
            Uuid::new_v4(),
            b"a".to_vec(),
            0,
            7.into(),
            IsolationLevel::Serializable,
        );
        AbortSpan::new(4).poison(&mut batch, None, &txn).unwrap();
        let entry = AbortSpan::new(4).get(&batch, txn.id).unwrap().unwrap();
        assert_eq!(entry.key, b"a");
        assert_eq!(entry.timestamp, 7.into());
    }

    #[test]
    fn test_copy_to_rehomes_all_entries() {
        let engine = BTreeEngine::new();
        let mut batch = engine.batch();
        let src = AbortSpan::new(10);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            let entry = AbortSpanEntry {
                key: vec![b'k', i as u8],
                timestamp: (i as u64).into(),
            };
            src.put(&mut batch, None, *id, &entry).unwrap();
        }

        let mut ms = MvccStats::default();
        assert_eq!(src.copy_to(&mut batch, &mut ms, 20).unwrap(), 3);
        assert_eq!(ms.sys_count, 3);

        let dst = AbortSpan::new(20);
        for (i, id) in ids.iter().enumerate() {
            let entry = dst.get(&batch, *id).unwrap().unwrap();
            assert_eq!(entry.key, vec![b'k', i as u8]);
        }
        // Source entries stay put.
        assert_eq!(batch.scan_records(&src.min_key(), &src.max_key()).unwrap().len(), 3);
    }
}
