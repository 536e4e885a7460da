// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::fmt;

use codec::prelude::*;
use codec::{Error as CodecError, Record, Result as CodecResult};
use uuid::Uuid;

use crate::timestamp::TimeStamp;
use crate::types::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    Pending,
    Committed,
    Aborted,
}

const FLAG_PENDING: u8 = b'P';
const FLAG_COMMITTED: u8 = b'C';
const FLAG_ABORTED: u8 = b'A';

impl TxnStatus {
    fn from_u8(b: u8) -> Option<TxnStatus> {
        match b {
            FLAG_PENDING => Some(TxnStatus::Pending),
            FLAG_COMMITTED => Some(TxnStatus::Committed),
            FLAG_ABORTED => Some(TxnStatus::Aborted),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            TxnStatus::Pending => FLAG_PENDING,
            TxnStatus::Committed => FLAG_COMMITTED,
            TxnStatus::Aborted => FLAG_ABORTED,
        }
    }

    pub fn is_finalized(self) -> bool {
        self != TxnStatus::Pending
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
    Snapshot,
}

impl IsolationLevel {
    fn from_u8(b: u8) -> Option<IsolationLevel> {
        match b {
            b'R' => Some(IsolationLevel::Serializable),
            b'S' => Some(IsolationLevel::Snapshot),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            IsolationLevel::Serializable => b'R',
            IsolationLevel::Snapshot => b'S',
        }
    }
}

/// Why a commit could not proceed and the client must restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryReason {
    WriteTooOld,
    Serializable,
    DeleteRange,
}

/// Why an attempt to commit found the transaction aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    AbortedRecordFound,
}

const FLAG_WRITE_TOO_OLD: u8 = 0x01;
const FLAG_RETRY_ON_PUSH: u8 = 0x02;
const FLAG_ORIG_TS_OBSERVED: u8 = 0x04;

/// The persisted transaction record, keyed by
/// `keys::transaction_key(anchor_key, id)`.
///
/// Created by the begin-transaction command, pushed forward by conflicting
/// operations, finalized (COMMITTED or ABORTED) by the finalization
/// command, then deleted or rewritten with the intents that remain for
/// asynchronous resolution.
#[derive(Clone, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    /// The key that owns the record; the record lives on whichever range
    /// covers this key.
    pub anchor_key: Vec<u8>,
    pub status: TxnStatus,
    /// Incremented on every transaction restart. Writes from older epochs
    /// must be discarded.
    pub epoch: u32,
    /// The read timestamp the transaction was born with.
    pub orig_timestamp: TimeStamp,
    /// The highest timestamp to which the transaction has refreshed all
    /// of its reads. Zero if it never refreshed.
    pub refreshed_timestamp: TimeStamp,
    /// The provisional commit timestamp. Starts at `orig_timestamp` and
    /// only moves forward under pushes.
    pub timestamp: TimeStamp,
    pub isolation: IsolationLevel,
    pub write_too_old: bool,
    /// Set by operations (e.g. ranged deletions) that cannot safely
    /// replay at a timestamp other than the one they executed at.
    pub retry_on_push: bool,
    /// Set once `orig_timestamp` has been returned to a client, at which
    /// point silently committing at a forwarded timestamp is no longer
    /// safe.
    pub orig_timestamp_was_observed: bool,
    pub sequence: u64,
    /// Spans still holding this transaction's intents, kept for the
    /// asynchronous resolver.
    pub intents: Vec<Span>,
}

impl Transaction {
    pub fn new(
        id: Uuid,
        anchor_key: Vec<u8>,
        epoch: u32,
        ts: TimeStamp,
        isolation: IsolationLevel,
    ) -> Transaction {
        Transaction {
            id,
            anchor_key,
            status: TxnStatus::Pending,
            epoch,
            orig_timestamp: ts,
            refreshed_timestamp: TimeStamp::zero(),
            timestamp: ts,
            isolation,
            write_too_old: false,
            retry_on_push: false,
            orig_timestamp_was_observed: false,
            sequence: 0,
            intents: vec![],
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.id.is_nil() && !self.anchor_key.is_empty()
    }

    pub fn is_serializable(&self) -> bool {
        self.isolation == IsolationLevel::Serializable
    }

    /// Folds the newer fields of `other` (a fresher view of the same
    /// transaction, usually the client-supplied copy) into `self`.
    /// Timestamps only move forward, flags only latch on, counters only
    /// grow.
    pub fn update(&mut self, other: &Transaction) {
        if self.epoch < other.epoch {
            self.epoch = other.epoch;
        }
        self.orig_timestamp.forward(other.orig_timestamp);
        self.refreshed_timestamp.forward(other.refreshed_timestamp);
        self.timestamp.forward(other.timestamp);
        self.write_too_old |= other.write_too_old;
        self.retry_on_push |= other.retry_on_push;
        self.orig_timestamp_was_observed |= other.orig_timestamp_was_observed;
        if self.sequence < other.sequence {
            self.sequence = other.sequence;
        }
    }

    /// The inclusive timestamp bounds between which this transaction's
    /// intents live, usable as iterator hints.
    pub fn inclusive_time_bounds(&self) -> (TimeStamp, TimeStamp) {
        (self.orig_timestamp, self.timestamp)
    }

    /// Abbreviated id for logs.
    pub fn short(&self) -> String {
        let mut buf = Uuid::encode_buffer();
        self.id.to_simple().encode_lower(&mut buf)[..8].to_string()
    }
}

impl Record for Transaction {
    fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(64 + self.anchor_key.len());
        b.extend_from_slice(self.id.as_bytes());
        b.encode_compact_bytes(&self.anchor_key).unwrap();
        b.encode_u8(self.status.to_u8()).unwrap();
        b.encode_var_u64(u64::from(self.epoch)).unwrap();
        b.encode_var_u64(self.orig_timestamp.into_inner()).unwrap();
        b.encode_var_u64(self.refreshed_timestamp.into_inner()).unwrap();
        b.encode_var_u64(self.timestamp.into_inner()).unwrap();
        b.encode_u8(self.isolation.to_u8()).unwrap();
        let mut flags = 0;
        if self.write_too_old {
            flags |= FLAG_WRITE_TOO_OLD;
        }
        if self.retry_on_push {
            flags |= FLAG_RETRY_ON_PUSH;
        }
        if self.orig_timestamp_was_observed {
            flags |= FLAG_ORIG_TS_OBSERVED;
        }
        b.encode_u8(flags).unwrap();
        b.encode_var_u64(self.sequence).unwrap();
        b.encode_var_u64(self.intents.len() as u64).unwrap();
        for span in &self.intents {
            span.encode_into(&mut b);
        }
        b
    }

    fn parse(buf: &[u8]) -> CodecResult<Transaction> {
        let mut b = buf;
        if b.len() < 16 {
            return Err(CodecError::BufferTooShort);
        }
        let id = Uuid::from_slice(&b[..16]).map_err(|_| CodecError::BadFormat("txn id"))?;
        b = &b[16..];
        let anchor_key = b.decode_compact_bytes()?;
        let status =
            TxnStatus::from_u8(b.decode_u8()?).ok_or(CodecError::BadFormat("txn status"))?;
        let epoch = b.decode_var_u64()? as u32;
        let orig_timestamp = b.decode_var_u64()?.into();
        let refreshed_timestamp = b.decode_var_u64()?.into();
        let timestamp = b.decode_var_u64()?.into();
        let isolation = IsolationLevel::from_u8(b.decode_u8()?)
            .ok_or(CodecError::BadFormat("isolation level"))?;
        let flags = b.decode_u8()?;
        let sequence = b.decode_var_u64()?;
        let n = b.decode_var_u64()? as usize;
        let mut intents = Vec::with_capacity(n);
        for _ in 0..n {
            intents.push(Span::decode_from(&mut b)?);
        }
        Ok(Transaction {
            id,
            anchor_key,
            status,
            epoch,
            orig_timestamp,
            refreshed_timestamp,
            timestamp,
            isolation,
            write_too_old: flags & FLAG_WRITE_TOO_OLD != 0,
            retry_on_push: flags & FLAG_RETRY_ON_PUSH != 0,
            orig_timestamp_was_observed: flags & FLAG_ORIG_TS_OBSERVED != 0,
            sequence,
            intents,
        })
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.short())
            .field("anchor_key", &hex::encode_upper(&self.anchor_key))
            .field("status", &self.status)
            .field("epoch", &self.epoch)
            .field("orig_timestamp", &self.orig_timestamp)
            .field("refreshed_timestamp", &self.refreshed_timestamp)
            .field("timestamp", &self.timestamp)
            .field("isolation", &self.isolation)
            .field("write_too_old", &self.write_too_old)
            .field("retry_on_push", &self.retry_on_push)
            .field("intents", &self.intents.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_txn() -> Transaction {
        let mut txn = Transaction::new(
            Uuid::new_v4(),
            b"anchor".to_vec(),
            2,
            TimeStamp::new(10),
            IsolationLevel::Serializable,
        );
        txn.refreshed_timestamp = 12.into();
        txn.timestamp = 12.into();
        txn.write_too_old = true;
        txn.sequence = 9;
        txn.intents = vec![
            Span::from_key(b"a".as_slice()),
            Span::new(b"b".as_slice(), b"d".as_slice()),
        ];
        txn
    }

    #[test]
    fn test_record_round_trip() {
        let txn = sample_txn();
        let parsed = Transaction::parse(&txn.to_bytes()).unwrap();
        assert_eq!(parsed, txn);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(Transaction::parse(b"short").is_err());
        let mut bytes = sample_txn().to_bytes();
        bytes.truncate(20);
        assert!(Transaction::parse(&bytes).is_err());
    }

    #[test]
    fn test_update_is_monotonic() {
        let mut txn = sample_txn();
        let mut newer = txn.clone();
        newer.epoch = 3;
        newer.timestamp = 20.into();
        newer.sequence = 11;
        newer.orig_timestamp_was_observed = true;
        txn.update(&newer);
        assert_eq!(txn.epoch, 3);
        assert_eq!(txn.timestamp, 20.into());
        assert_eq!(txn.sequence, 11);
        assert!(txn.orig_timestamp_was_observed);

        // Stale views cannot move anything backwards.
        let mut older = txn.clone();
        older.epoch = 1;
        older.timestamp = 5.into();
        older.sequence = 2;
        let before = txn.clone();
        txn.update(&older);
        assert_eq!(txn, before);
    }

    #[test]
    fn test_uninitialized() {
        assert!(!Transaction::new(
            Uuid::nil(),
            b"k".to_vec(),
            0,
            TimeStamp::zero(),
            IsolationLevel::Snapshot
        )
        .is_initialized());
        assert!(sample_txn().is_initialized());
    }
}
