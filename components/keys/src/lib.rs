// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Key layout of the store.
//!
//! The keyspace is split into a local span and the global span. Local keys
//! start with [`LOCAL_PREFIX`] and sort before every global key; they hold
//! per-range metadata and are invisible to clients. Local keys come in two
//! families:
//!
//! - range-ID keys, addressed by the owning range's integer ID. Replicated
//!   variants (abort span, lease, GC thresholds, stats) are written through
//!   consensus; unreplicated variants (hard state, last-replica-GC
//!   timestamp) are per-store.
//! - range-local keys, addressed by an embedded global key (the range
//!   descriptor at the range's start key, transaction records at their
//!   anchor key). The embedded key is memcomparable-encoded so range-local
//!   keys sort together with their anchors.

use std::borrow::Cow;

use thiserror::Error;

pub const LOCAL_PREFIX: u8 = 0x01;
/// The first global key; everything below is local.
pub const LOCAL_MAX_KEY: &[u8] = &[0x02];

const RANGE_ID_INFIX: u8 = b'i';
const RANGE_LOCAL_INFIX: u8 = b'k';
const REPLICATED_INFIX: u8 = b'r';
const UNREPLICATED_INFIX: u8 = b'u';

const ABORT_SPAN_SUFFIX: &[u8] = b"abrt";
const RANGE_LEASE_SUFFIX: &[u8] = b"rlse";
const GC_THRESHOLD_SUFFIX: &[u8] = b"lgct";
const TXN_SPAN_GC_THRESHOLD_SUFFIX: &[u8] = b"tgct";
const RANGE_STATS_SUFFIX: &[u8] = b"stat";
const HARD_STATE_SUFFIX: &[u8] = b"rfth";
const LAST_REPLICA_GC_TS_SUFFIX: &[u8] = b"rlgc";

const RANGE_DESCRIPTOR_SUFFIX: &[u8] = b"rdsc";
const TRANSACTION_SUFFIX: &[u8] = b"txn-";

/// The key under which the cluster's system configuration lives. Ranges
/// covering it gossip configuration changes committed on them.
pub const SYSTEM_CONFIG_KEY: &[u8] = b"\x02syscfg";

#[derive(Debug, Error)]
pub enum Error {
    #[error("local key {} malformed, not addressable", hex::encode_upper(.0))]
    NotAddressable(Vec<u8>),
    #[error("key {} is not an abort span key of range {}", hex::encode_upper(.0), .1)]
    InvalidAbortSpanKey(Vec<u8>, u64),
    #[error("Codec {0}")]
    Codec(#[from] codec::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn is_local(key: &[u8]) -> bool {
    key.first() == Some(&LOCAL_PREFIX)
}

/// Whether `key` belongs to the range-ID family of local keys.
pub fn is_range_id_key(key: &[u8]) -> bool {
    key.len() >= 2 && key[0] == LOCAL_PREFIX && key[1] == RANGE_ID_INFIX
}

pub fn range_id_prefix(range_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.push(LOCAL_PREFIX);
    key.push(RANGE_ID_INFIX);
    key.extend_from_slice(&range_id.to_be_bytes());
    key
}

pub fn range_id_replicated_prefix(range_id: u64) -> Vec<u8> {
    let mut key = range_id_prefix(range_id);
    key.push(REPLICATED_INFIX);
    key
}

pub fn range_id_unreplicated_prefix(range_id: u64) -> Vec<u8> {
    let mut key = range_id_prefix(range_id);
    key.push(UNREPLICATED_INFIX);
    key
}

pub fn abort_span_prefix(range_id: u64) -> Vec<u8> {
    let mut key = range_id_replicated_prefix(range_id);
    key.extend_from_slice(ABORT_SPAN_SUFFIX);
    key
}

pub fn abort_span_key(range_id: u64, txn_id: &[u8; 16]) -> Vec<u8> {
    let mut key = abort_span_prefix(range_id);
    key.extend_from_slice(txn_id);
    key
}

/// First possible abort span key of the range.
pub fn abort_span_min_key(range_id: u64) -> Vec<u8> {
    abort_span_prefix(range_id)
}

/// First key past every abort span key of the range.
pub fn abort_span_max_key(range_id: u64) -> Vec<u8> {
    next_key(&abort_span_prefix(range_id))
}

/// Extracts the transaction id out of one of `range_id`'s abort span
/// keys. Used to rebuild an entry's key under another range ID when
/// abort span entries are re-homed during splits and merges.
pub fn decode_abort_span_key(range_id: u64, key: &[u8]) -> Result<[u8; 16]> {
    let suffix = key
        .strip_prefix(abort_span_prefix(range_id).as_slice())
        .ok_or_else(|| Error::InvalidAbortSpanKey(key.to_vec(), range_id))?;
    if suffix.len() != 16 {
        return Err(Error::InvalidAbortSpanKey(key.to_vec(), range_id));
    }
    let mut txn_id = [0; 16];
    txn_id.copy_from_slice(suffix);
    Ok(txn_id)
}

pub fn range_lease_key(range_id: u64) -> Vec<u8> {
    let mut key = range_id_replicated_prefix(range_id);
    key.extend_from_slice(RANGE_LEASE_SUFFIX);
    key
}

pub fn gc_threshold_key(range_id: u64) -> Vec<u8> {
    let mut key = range_id_replicated_prefix(range_id);
    key.extend_from_slice(GC_THRESHOLD_SUFFIX);
    key
}

pub fn txn_span_gc_threshold_key(range_id: u64) -> Vec<u8> {
    let mut key = range_id_replicated_prefix(range_id);
    key.extend_from_slice(TXN_SPAN_GC_THRESHOLD_SUFFIX);
    key
}

pub fn range_stats_key(range_id: u64) -> Vec<u8> {
    let mut key = range_id_replicated_prefix(range_id);
    key.extend_from_slice(RANGE_STATS_SUFFIX);
    key
}

pub fn raft_hard_state_key(range_id: u64) -> Vec<u8> {
    let mut key = range_id_unreplicated_prefix(range_id);
    key.extend_from_slice(HARD_STATE_SUFFIX);
    key
}

pub fn last_replica_gc_timestamp_key(range_id: u64) -> Vec<u8> {
    let mut key = range_id_unreplicated_prefix(range_id);
    key.extend_from_slice(LAST_REPLICA_GC_TS_SUFFIX);
    key
}

/// First key past the whole range-local key family.
pub fn range_local_max_key() -> Vec<u8> {
    vec![LOCAL_PREFIX, RANGE_LOCAL_INFIX + 1]
}

/// The prefix under which every range-local key anchored at `key` sorts.
pub fn make_range_key_prefix(key: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(2 + key.len() + 9);
    prefix.push(LOCAL_PREFIX);
    prefix.push(RANGE_LOCAL_INFIX);
    codec::bytes::encode_bytes(&mut prefix, key);
    prefix
}

pub fn range_descriptor_key(start_key: &[u8]) -> Vec<u8> {
    let mut key = make_range_key_prefix(start_key);
    key.extend_from_slice(RANGE_DESCRIPTOR_SUFFIX);
    key
}

pub fn transaction_key(anchor_key: &[u8], txn_id: &[u8; 16]) -> Vec<u8> {
    let mut key = make_range_key_prefix(anchor_key);
    key.extend_from_slice(TRANSACTION_SUFFIX);
    key.extend_from_slice(txn_id);
    key
}

/// Maps a key to the global key that determines which range owns it.
/// Global keys address to themselves; range-local keys address to their
/// embedded anchor. Range-ID keys carry no anchor and are not addressable.
pub fn addr(key: &[u8]) -> Result<Cow<'_, [u8]>> {
    if !is_local(key) {
        return Ok(Cow::Borrowed(key));
    }
    if key.len() >= 2 && key[1] == RANGE_LOCAL_INFIX {
        let mut remaining = &key[2..];
        let anchor = codec::bytes::decode_bytes(&mut remaining)?;
        return Ok(Cow::Owned(anchor));
    }
    Err(Error::NotAddressable(key.to_vec()))
}

/// `(key_prefix, name)` with `name` as the last element of `key_prefix`
/// plus 1. Extracted from `next_key` for reuse without allocation.
pub fn next_key_no_alloc(key: &[u8]) -> Option<(&[u8], u8)> {
    let pos = key.iter().rposition(|b| *b != 0xff)?;
    Some((&key[..pos], key[pos] + 1))
}

/// Computes the smallest key that is greater than every key prefixed by
/// `key`. An empty return stands for the end of the keyspace.
pub fn next_key(key: &[u8]) -> Vec<u8> {
    if let Some((prefix, last)) = next_key_no_alloc(key) {
        let mut res = Vec::with_capacity(prefix.len() + 1);
        res.extend_from_slice(prefix);
        res.push(last);
        res
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_sorts_before_global() {
        assert!(range_id_prefix(u64::MAX).as_slice() < LOCAL_MAX_KEY);
        assert!(make_range_key_prefix(b"zzzz").as_slice() < LOCAL_MAX_KEY);
        assert!(!is_local(b"a"));
        assert!(is_local(&transaction_key(b"a", &[0; 16])));
    }

    #[test]
    fn test_range_id_key_layout() {
        let repl = range_id_replicated_prefix(7);
        let unrepl = range_id_unreplicated_prefix(7);
        assert!(repl.starts_with(&range_id_prefix(7)));
        assert!(unrepl.starts_with(&range_id_prefix(7)));
        assert!(repl < unrepl);
        assert!(abort_span_key(7, &[1; 16]).starts_with(&abort_span_prefix(7)));
        assert!(abort_span_min_key(7) < abort_span_key(7, &[0; 16]));
        assert!(abort_span_key(7, &[0xff; 16]) < abort_span_max_key(7));
        // Keys of different ranges never interleave.
        assert!(abort_span_max_key(7) < range_id_prefix(8));
    }

    #[test]
    fn test_decode_abort_span_key() {
        let txn_id = [7u8; 16];
        let key = abort_span_key(9, &txn_id);
        assert_eq!(decode_abort_span_key(9, &key).unwrap(), txn_id);
        // A different range's key does not decode.
        assert!(matches!(
            decode_abort_span_key(8, &key),
            Err(Error::InvalidAbortSpanKey(..))
        ));
        // Truncated transaction id.
        assert!(decode_abort_span_key(9, &key[..key.len() - 1]).is_err());
        // Some other metadata key of the same range.
        assert!(decode_abort_span_key(9, &range_lease_key(9)).is_err());
        // Ids at the byte extremes survive the round trip.
        for txn_id in [[0u8; 16], [0xff; 16]] {
            let key = abort_span_key(u64::MAX, &txn_id);
            assert_eq!(decode_abort_span_key(u64::MAX, &key).unwrap(), txn_id);
        }
    }

    #[test]
    fn test_range_local_sorts_with_anchor() {
        let a = make_range_key_prefix(b"a");
        let ab = make_range_key_prefix(b"ab");
        let b = make_range_key_prefix(b"b");
        assert!(a < ab && ab < b);
        let txn = transaction_key(b"ab", &[3; 16]);
        assert!(a < txn && txn < b);
    }

    #[test]
    fn test_addr() {
        assert_eq!(addr(b"user-key").unwrap().as_ref(), b"user-key");
        assert_eq!(addr(&transaction_key(b"anchor", &[9; 16])).unwrap().as_ref(), b"anchor");
        assert_eq!(addr(&range_descriptor_key(b"m")).unwrap().as_ref(), b"m");
        assert!(matches!(addr(&abort_span_key(1, &[0; 16])), Err(Error::NotAddressable(_))));
    }

    #[test]
    fn test_next_key() {
        assert_eq!(next_key(b"123"), b"124");
        assert_eq!(next_key(b"12\xff"), b"13");
        assert_eq!(next_key(b"\xff"), b"");
        assert_eq!(next_key(b""), b"");
    }
}
