// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::fmt;

use codec::prelude::*;
use codec::{Record, Result as CodecResult};
use txn_types::Span;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplicaDescriptor {
    pub node_id: u64,
    pub store_id: u64,
    pub replica_id: u64,
}

impl ReplicaDescriptor {
    pub fn new(node_id: u64, store_id: u64, replica_id: u64) -> ReplicaDescriptor {
        ReplicaDescriptor {
            node_id,
            store_id,
            replica_id,
        }
    }
}

/// Identity of a range: its ID, the user-key span it covers and the
/// replica set managing it. Treated as immutable within an evaluation;
/// topology changes produce new descriptors.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RangeDescriptor {
    pub range_id: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub replicas: Vec<ReplicaDescriptor>,
    pub next_replica_id: u64,
}

impl RangeDescriptor {
    pub fn new(range_id: u64, start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        RangeDescriptor {
            range_id,
            start_key: start_key.into(),
            end_key: end_key.into(),
            replicas: vec![],
            next_replica_id: 1,
        }
    }

    /// Whether the already-addressed `key` falls in `[start_key,
    /// end_key)`. An empty end key is unbounded.
    pub fn contains_addressed_key(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && (self.end_key.is_empty() || key < self.end_key.as_slice())
    }

    pub fn replica_by_store(&self, store_id: u64) -> Option<ReplicaDescriptor> {
        self.replicas.iter().copied().find(|r| r.store_id == store_id)
    }

    /// The first range holds the head of the keyspace, including the
    /// range addressing metadata that must be gossiped.
    pub fn is_first_range(&self) -> bool {
        self.start_key.is_empty()
    }
}

impl Record for RangeDescriptor {
    fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(32 + self.start_key.len() + self.end_key.len());
        b.encode_var_u64(self.range_id).unwrap();
        b.encode_compact_bytes(&self.start_key).unwrap();
        b.encode_compact_bytes(&self.end_key).unwrap();
        b.encode_var_u64(self.replicas.len() as u64).unwrap();
        for r in &self.replicas {
            b.encode_var_u64(r.node_id).unwrap();
            b.encode_var_u64(r.store_id).unwrap();
            b.encode_var_u64(r.replica_id).unwrap();
        }
        b.encode_var_u64(self.next_replica_id).unwrap();
        b
    }

    fn parse(buf: &[u8]) -> CodecResult<RangeDescriptor> {
        let mut b = buf;
        let range_id = b.decode_var_u64()?;
        let start_key = b.decode_compact_bytes()?;
        let end_key = b.decode_compact_bytes()?;
        let n = b.decode_var_u64()? as usize;
        let mut replicas = Vec::with_capacity(n);
        for _ in 0..n {
            replicas.push(ReplicaDescriptor {
                node_id: b.decode_var_u64()?,
                store_id: b.decode_var_u64()?,
                replica_id: b.decode_var_u64()?,
            });
        }
        let next_replica_id = b.decode_var_u64()?;
        Ok(RangeDescriptor {
            range_id,
            start_key,
            end_key,
            replicas,
            next_replica_id,
        })
    }
}

impl fmt::Debug for RangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r{} [{}, {}), {} replicas",
            self.range_id,
            hex::encode_upper(&self.start_key),
            hex::encode_upper(&self.end_key),
            self.replicas.len()
        )
    }
}

/// Whether the range owns `key`, accounting for the store's key
/// addressing: range-ID keys belong to their range by ID, range-local
/// keys to whichever range covers their embedded anchor.
pub fn contains_key(desc: &RangeDescriptor, key: &[u8]) -> bool {
    if keys::is_range_id_key(key) {
        return key.starts_with(&keys::range_id_prefix(desc.range_id));
    }
    match keys::addr(key) {
        Ok(addr) => desc.contains_addressed_key(&addr),
        Err(_) => false,
    }
}

/// Cuts a key-range span into the part the range owns (possibly none) and
/// the parts outside it (zero, one or two). A span of range-local keys is
/// compared against the range-local image of the range's bounds, so an
/// intent range over range-local data lands inside its owning range.
pub fn intersect_span(span: &Span, desc: &RangeDescriptor) -> (Option<Span>, Vec<Span>) {
    debug_assert!(!span.is_point());
    let (start, end);
    if keys::is_local(&span.start) {
        if !keys::is_local(&span.end) {
            // A local span cannot reach into the global keyspace. Not a
            // resolvable shape; hand the whole thing off.
            return (None, vec![span.clone()]);
        }
        start = keys::make_range_key_prefix(&desc.start_key);
        end = if desc.end_key.is_empty() {
            Vec::new()
        } else {
            keys::make_range_key_prefix(&desc.end_key)
        };
    } else {
        start = desc.start_key.clone();
        end = desc.end_key.clone();
    }

    let mut outside = Vec::new();
    if span.start < start {
        let left_end = if span.end < start { span.end.clone() } else { start.clone() };
        outside.push(Span::new(span.start.clone(), left_end));
    }
    if !end.is_empty() && span.end > end {
        let right_start = if span.start > end { span.start.clone() } else { end.clone() };
        outside.push(Span::new(right_start, span.end.clone()));
    }
    let in_start = if span.start > start { span.start.clone() } else { start };
    let in_end = if end.is_empty() || span.end < end {
        span.end.clone()
    } else {
        end
    };
    let inside = if in_start < in_end {
        Some(Span::new(in_start, in_end))
    } else {
        None
    };
    (inside, outside)
}
