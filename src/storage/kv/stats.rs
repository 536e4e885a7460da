// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use codec::prelude::*;
use codec::{Record, Result as CodecResult};

/// The MVCC statistics of a key span.
///
/// Accounting rules, shared by incremental updates and iteration-derived
/// recomputation:
///
/// - an inline (timestamp-less) record contributes `key len + value len`
///   to `sys_bytes` and 1 to `sys_count`;
/// - every version of a versioned key contributes `key len + 8` to
///   `key_bytes`, its value length to `val_bytes` and 1 to `val_count`;
///   the key itself contributes 1 to `key_count`; the newest version
///   contributes `key len + value len` to `live_bytes` and 1 to
///   `live_count`;
/// - an unresolved intent contributes `key len + value len` to
///   `intent_bytes` and 1 to `intent_count`.
///
/// A range's persisted stats must equal the true iteration-derived stats
/// unless `contains_estimates` is set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MvccStats {
    pub contains_estimates: bool,
    pub live_bytes: i64,
    pub live_count: i64,
    pub key_bytes: i64,
    pub key_count: i64,
    pub val_bytes: i64,
    pub val_count: i64,
    pub intent_bytes: i64,
    pub intent_count: i64,
    pub sys_bytes: i64,
    pub sys_count: i64,
}

impl MvccStats {
    pub fn add(&mut self, other: &MvccStats) {
        self.contains_estimates |= other.contains_estimates;
        self.live_bytes += other.live_bytes;
        self.live_count += other.live_count;
        self.key_bytes += other.key_bytes;
        self.key_count += other.key_count;
        self.val_bytes += other.val_bytes;
        self.val_count += other.val_count;
        self.intent_bytes += other.intent_bytes;
        self.intent_count += other.intent_count;
        self.sys_bytes += other.sys_bytes;
        self.sys_count += other.sys_count;
    }

    pub fn subtract(&mut self, other: &MvccStats) {
        self.contains_estimates |= other.contains_estimates;
        self.live_bytes -= other.live_bytes;
        self.live_count -= other.live_count;
        self.key_bytes -= other.key_bytes;
        self.key_count -= other.key_count;
        self.val_bytes -= other.val_bytes;
        self.val_count -= other.val_count;
        self.intent_bytes -= other.intent_bytes;
        self.intent_count -= other.intent_count;
        self.sys_bytes -= other.sys_bytes;
        self.sys_count -= other.sys_count;
    }

    pub fn is_zero(&self) -> bool {
        *self == MvccStats::default()
    }
}

impl Record for MvccStats {
    fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(81);
        b.encode_u8(self.contains_estimates as u8).unwrap();
        for v in [
            self.live_bytes,
            self.live_count,
            self.key_bytes,
            self.key_count,
            self.val_bytes,
            self.val_count,
            self.intent_bytes,
            self.intent_count,
            self.sys_bytes,
            self.sys_count,
        ] {
            b.encode_u64(v as u64).unwrap();
        }
        b
    }

    fn parse(buf: &[u8]) -> CodecResult<MvccStats> {
        let mut b = buf;
        let contains_estimates = b.decode_u8()? != 0;
        let mut fields = [0i64; 10];
        for f in &mut fields {
            *f = b.decode_u64()? as i64;
        }
        Ok(MvccStats {
            contains_estimates,
            live_bytes: fields[0],
            live_count: fields[1],
            key_bytes: fields[2],
            key_count: fields[3],
            val_bytes: fields[4],
            val_count: fields[5],
            intent_bytes: fields[6],
            intent_count: fields[7],
            sys_bytes: fields[8],
            sys_count: fields[9],
        })
    }
}
