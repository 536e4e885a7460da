// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::fmt;

use codec::prelude::*;
use uuid::Uuid;

use crate::timestamp::TimeStamp;
use crate::txn::TxnStatus;

/// A single key (empty `end`) or a half-open key span `[start, end)`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Span {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl Span {
    pub fn from_key(start: impl Into<Vec<u8>>) -> Span {
        Span {
            start: start.into(),
            end: Vec::new(),
        }
    }

    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Span {
        Span {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn is_point(&self) -> bool {
        self.end.is_empty()
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.encode_compact_bytes(&self.start).unwrap();
        buf.encode_compact_bytes(&self.end).unwrap();
    }

    pub fn decode_from(buf: &mut &[u8]) -> codec::Result<Span> {
        let start = buf.decode_compact_bytes()?;
        let end = buf.decode_compact_bytes()?;
        Ok(Span { start, end })
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_point() {
            write!(f, "{}", hex::encode_upper(&self.start))
        } else {
            write!(
                f,
                "[{}, {})",
                hex::encode_upper(&self.start),
                hex::encode_upper(&self.end)
            )
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A tentative write plus the state of the transaction that owns it,
/// handed to the engine's resolve primitives.
#[derive(Clone, Debug)]
pub struct Intent {
    pub span: Span,
    pub txn_id: Uuid,
    pub timestamp: TimeStamp,
    pub status: TxnStatus,
}

impl Intent {
    pub fn new(span: Span, txn_id: Uuid, timestamp: TimeStamp, status: TxnStatus) -> Intent {
        Intent {
            span,
            txn_id,
            timestamp,
            status,
        }
    }
}
