// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! An in-memory engine over a `BTreeMap`.
//!
//! Supports the full `Engine`/`Batch` surface with exact stats
//! bookkeeping: every mutation goes through one accounting helper, so
//! incrementally-maintained stats always agree with
//! [`Batch::compute_stats`] recomputation. Backs the test suite and
//! single-process tooling; not built for production durability.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use codec::Record;
use txn_types::{Intent, Span, TimeStamp, TxnStatus};
use uuid::Uuid;

use super::{Batch, Engine, Error, IterOptions, MvccStats, Result};

const VERSION_KEY_OVERHEAD: i64 = 8;

#[derive(Clone, Debug, Default)]
struct MvccEntry {
    /// Timestamp-less metadata record.
    inline: Option<Vec<u8>>,
    /// At most one unresolved provisional write.
    intent: Option<IntentValue>,
    /// Committed versions, ascending by timestamp.
    versions: Vec<(TimeStamp, Vec<u8>)>,
}

#[derive(Clone, Debug)]
struct IntentValue {
    txn_id: Uuid,
    value: Vec<u8>,
}

impl MvccEntry {
    fn is_empty(&self) -> bool {
        self.inline.is_none() && self.intent.is_none() && self.versions.is_empty()
    }

    /// The entry's contribution to span stats, per the rules documented
    /// on [`MvccStats`].
    fn stats(&self, key: &[u8]) -> MvccStats {
        let mut ms = MvccStats::default();
        let key_len = key.len() as i64;
        if let Some(v) = &self.inline {
            ms.sys_bytes += key_len + v.len() as i64;
            ms.sys_count += 1;
        }
        if !self.versions.is_empty() {
            ms.key_count += 1;
            for (_, v) in &self.versions {
                ms.key_bytes += key_len + VERSION_KEY_OVERHEAD;
                ms.val_bytes += v.len() as i64;
                ms.val_count += 1;
            }
            let (_, newest) = self.versions.last().unwrap();
            ms.live_bytes += key_len + newest.len() as i64;
            ms.live_count += 1;
        }
        if let Some(iv) = &self.intent {
            ms.intent_bytes += key_len + iv.value.len() as i64;
            ms.intent_count += 1;
        }
        ms
    }
}

type Store = BTreeMap<Vec<u8>, MvccEntry>;

fn range_of<'a>(
    map: &'a Store,
    start: &[u8],
    end: &[u8],
) -> impl Iterator<Item = (&'a Vec<u8>, &'a MvccEntry)> {
    let hi = if end.is_empty() {
        Bound::Unbounded
    } else {
        Bound::Excluded(end.to_vec())
    };
    map.range((Bound::Included(start.to_vec()), hi))
}

#[derive(Clone, Default)]
pub struct BTreeEngine {
    inner: Arc<RwLock<Store>>,
}

impl BTreeEngine {
    pub fn new() -> BTreeEngine {
        BTreeEngine::default()
    }

    /// Writes a committed version, bypassing the transactional machinery.
    pub fn put_value(&self, key: &[u8], ts: TimeStamp, value: &[u8]) {
        let mut map = self.inner.write().unwrap();
        let entry = map.entry(key.to_vec()).or_default();
        entry.versions.push((ts, value.to_vec()));
        entry.versions.sort_by_key(|(ts, _)| *ts);
    }

    /// Plants an unresolved intent owned by `txn_id`.
    pub fn put_intent(&self, key: &[u8], txn_id: Uuid, value: &[u8]) {
        let mut map = self.inner.write().unwrap();
        map.entry(key.to_vec()).or_default().intent = Some(IntentValue {
            txn_id,
            value: value.to_vec(),
        });
    }

    /// The newest committed version at or below `ts`.
    pub fn get_value(&self, key: &[u8], ts: TimeStamp) -> Option<Vec<u8>> {
        let map = self.inner.read().unwrap();
        map.get(key).and_then(|e| {
            e.versions
                .iter()
                .rev()
                .find(|(vts, _)| *vts <= ts)
                .map(|(_, v)| v.clone())
        })
    }

    pub fn has_intent(&self, key: &[u8]) -> bool {
        let map = self.inner.read().unwrap();
        map.get(key).map_or(false, |e| e.intent.is_some())
    }
}

impl Engine for BTreeEngine {
    type Batch = BTreeBatch;

    fn batch(&self) -> BTreeBatch {
        BTreeBatch {
            map: self.inner.read().unwrap().clone(),
        }
    }

    fn write(&self, batch: BTreeBatch) -> Result<()> {
        *self.inner.write().unwrap() = batch.map;
        Ok(())
    }
}

/// A batch over a full snapshot of the engine; `Engine::write` swaps the
/// mutated snapshot back in, which makes application trivially atomic.
pub struct BTreeBatch {
    map: Store,
}

impl BTreeBatch {
    fn mutate_entry<F>(&mut self, stats: Option<&mut MvccStats>, key: &[u8], f: F)
    where
        F: FnOnce(&mut MvccEntry),
    {
        let entry = self.map.entry(key.to_vec()).or_default();
        let before = entry.stats(key);
        f(&mut *entry);
        let after = entry.stats(key);
        if self.map.get(key).map_or(false, MvccEntry::is_empty) {
            self.map.remove(key);
        }
        if let Some(ms) = stats {
            ms.subtract(&before);
            ms.add(&after);
        }
    }

    fn resolve_one(
        &mut self,
        stats: Option<&mut MvccStats>,
        key: &[u8],
        intent: &Intent,
    ) -> Result<()> {
        match intent.status {
            TxnStatus::Committed => {
                let ts = intent.timestamp;
                self.mutate_entry(stats, key, |e| {
                    if let Some(iv) = e.intent.take() {
                        e.versions.push((ts, iv.value));
                        e.versions.sort_by_key(|(ts, _)| *ts);
                    }
                });
                Ok(())
            }
            TxnStatus::Aborted => {
                self.mutate_entry(stats, key, |e| {
                    e.intent = None;
                });
                Ok(())
            }
            TxnStatus::Pending => Err(Error::Engine(format!(
                "cannot resolve intent at {} with pending status",
                hex::encode_upper(key)
            ))),
        }
    }

    fn owns_intent(&self, key: &[u8], txn_id: Uuid) -> bool {
        self.map
            .get(key)
            .and_then(|e| e.intent.as_ref())
            .map_or(false, |iv| iv.txn_id == txn_id)
    }
}

impl Batch for BTreeBatch {
    fn get_record<R: Record>(&self, key: &[u8]) -> Result<Option<R>> {
        match self.map.get(key).and_then(|e| e.inline.as_ref()) {
            Some(bytes) => Ok(Some(R::parse(bytes)?)),
            None => Ok(None),
        }
    }

    fn put_record<R: Record>(
        &mut self,
        stats: Option<&mut MvccStats>,
        key: &[u8],
        record: &R,
    ) -> Result<()> {
        let bytes = record.to_bytes();
        self.mutate_entry(stats, key, |e| {
            e.inline = Some(bytes);
        });
        Ok(())
    }

    fn delete_record(&mut self, stats: Option<&mut MvccStats>, key: &[u8]) -> Result<()> {
        self.mutate_entry(stats, key, |e| {
            e.inline = None;
        });
        Ok(())
    }

    fn scan_records(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(range_of(&self.map, start, end)
            .filter_map(|(k, e)| e.inline.as_ref().map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn resolve_intent(
        &mut self,
        _opts: &IterOptions,
        stats: Option<&mut MvccStats>,
        intent: &Intent,
    ) -> Result<()> {
        let key = intent.span.start.clone();
        if !self.owns_intent(&key, intent.txn_id) {
            return Ok(());
        }
        self.resolve_one(stats, &key, intent)
    }

    fn resolve_intent_range(
        &mut self,
        _opts: &IterOptions,
        mut stats: Option<&mut MvccStats>,
        intent: &Intent,
        max_keys: u64,
    ) -> Result<(u64, Option<Span>)> {
        let pending: Vec<Vec<u8>> = range_of(&self.map, &intent.span.start, &intent.span.end)
            .filter(|(_, e)| {
                e.intent
                    .as_ref()
                    .map_or(false, |iv| iv.txn_id == intent.txn_id)
            })
            .map(|(k, _)| k.clone())
            .collect();
        let mut num = 0;
        for key in pending {
            if num == max_keys {
                return Ok((num, Some(Span::new(key, intent.span.end.clone()))));
            }
            self.resolve_one(stats.as_deref_mut(), &key, intent)?;
            num += 1;
        }
        Ok((num, None))
    }

    fn compute_stats(&self, start: &[u8], end: &[u8]) -> Result<MvccStats> {
        let mut ms = MvccStats::default();
        for (k, e) in range_of(&self.map, start, end) {
            ms.add(&e.stats(k));
        }
        Ok(ms)
    }
}
