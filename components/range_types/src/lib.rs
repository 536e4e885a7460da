// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Range-level metadata types: descriptors, leases and the consensus hard
//! state record, plus key-containment helpers that understand the store's
//! key addressing.

mod descriptor;
mod lease;

pub use descriptor::{contains_key, intersect_span, RangeDescriptor, ReplicaDescriptor};
pub use lease::{Lease, RangeHardState};
