// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Transaction-level types shared across the store: timestamps, spans,
//! intents and the persisted transaction record.

mod timestamp;
mod txn;
mod types;

pub use timestamp::TimeStamp;
pub use txn::{AbortReason, IsolationLevel, RetryReason, Transaction, TxnStatus};
pub use types::{Intent, Span};
