// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! The transaction finalization engine of a range-partitioned MVCC
//! key-value store.
//!
//! Commits and rollbacks arrive here after the command queue has
//! serialized them against conflicting commands (see
//! [`storage::txn::commands::FinalizeTxn::declare_keys`]). Evaluation
//! validates the transition against the persisted transaction record,
//! resolves the transaction's in-range intents inside the same write
//! batch, persists or garbage-collects the record, and — when the commit
//! carries a structural trigger — stages the on-disk side effects of a
//! range split, merge or replica-set change atomically with the commit.

#[macro_use(
    slog_kv,
    slog_error,
    slog_warn,
    slog_info,
    slog_debug,
    slog_log,
    slog_record,
    slog_b,
    slog_record_static
)]
extern crate slog;
#[macro_use]
extern crate slog_global;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate fail;

/// Boxes an ad-hoc error message, recording where it was raised.
#[macro_export]
macro_rules! box_err {
    ($e:expr) => ({
        let e: Box<dyn std::error::Error + Sync + Send> =
            format!("[{}:{}]: {}", file!(), line!(), $e).into();
        e.into()
    });
    ($f:tt, $($arg:expr),+) => ({
        box_err!(format!($f, $($arg),+))
    });
}

pub mod config;
pub mod storage;

pub use config::{ClusterSettings, Config};
