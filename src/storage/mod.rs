// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! The storage layer: the engine interface the evaluator drives, the
//! per-range metadata subsystems it stages writes through, and the
//! transaction finalization command itself.

pub mod abort_span;
pub mod kv;
pub mod metrics;
pub mod state;
pub mod txn;

pub use abort_span::{AbortSpan, AbortSpanEntry};
pub use kv::{compute_stats_for_range, BTreeEngine, Batch, Engine, IterOptions, MvccStats};
pub use state::StateLoader;
