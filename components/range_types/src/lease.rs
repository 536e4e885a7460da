// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use codec::prelude::*;
use codec::{Record, Result as CodecResult};
use txn_types::TimeStamp;

use crate::descriptor::ReplicaDescriptor;

/// The range lease, read here only so a split can seed the right-hand
/// side with a lease held by the same store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Lease {
    pub replica: ReplicaDescriptor,
    pub start: TimeStamp,
    pub expiration: TimeStamp,
}

impl Lease {
    pub fn is_empty(&self) -> bool {
        *self == Lease::default()
    }
}

impl Record for Lease {
    fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(24);
        b.encode_var_u64(self.replica.node_id).unwrap();
        b.encode_var_u64(self.replica.store_id).unwrap();
        b.encode_var_u64(self.replica.replica_id).unwrap();
        b.encode_var_u64(self.start.into_inner()).unwrap();
        b.encode_var_u64(self.expiration.into_inner()).unwrap();
        b
    }

    fn parse(buf: &[u8]) -> CodecResult<Lease> {
        let mut b = buf;
        Ok(Lease {
            replica: ReplicaDescriptor {
                node_id: b.decode_var_u64()?,
                store_id: b.decode_var_u64()?,
                replica_id: b.decode_var_u64()?,
            },
            start: b.decode_var_u64()?.into(),
            expiration: b.decode_var_u64()?.into(),
        })
    }
}

/// Persisted consensus hard state, synthesized upstream of consensus for
/// a freshly split right-hand range when old peers still expect it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeHardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

impl Record for RangeHardState {
    fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(12);
        b.encode_var_u64(self.term).unwrap();
        b.encode_var_u64(self.vote).unwrap();
        b.encode_var_u64(self.commit).unwrap();
        b
    }

    fn parse(buf: &[u8]) -> CodecResult<RangeHardState> {
        let mut b = buf;
        Ok(RangeHardState {
            term: b.decode_var_u64()?,
            vote: b.decode_var_u64()?,
            commit: b.decode_var_u64()?,
        })
    }
}
