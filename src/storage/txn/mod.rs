// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Transaction finalization: command definition, evaluation and the
//! structural commit triggers.

pub mod commands;
pub mod eval_result;
pub mod spanset;

use std::error;
use std::result;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use txn_types::{AbortReason, RetryReason};
use uuid::Uuid;

use crate::storage::kv;

/// Whether transaction records whose intents all resolved locally are
/// deleted right away. Once nothing remains for asynchronous resolution,
/// no pusher or resolver will ever look the record up again, so it is
/// garbage the moment it is written. Certain tests become simpler with
/// this turned off.
static TXN_AUTO_GC: AtomicBool = AtomicBool::new(true);

pub fn txn_auto_gc() -> bool {
    TXN_AUTO_GC.load(Ordering::Relaxed)
}

/// Flips the auto-GC switch, returning the previous value. Test-only;
/// production runs with the configured default.
pub fn set_txn_auto_gc(enable: bool) -> bool {
    TXN_AUTO_GC.swap(enable, Ordering::Relaxed)
}

#[derive(Debug, Error)]
pub enum Error {
    /// The request's transaction is in the wrong shape for this
    /// operation: uninitialized, regressed, past its deadline, or the
    /// record is in a state the transition table has no edge for.
    #[error("transaction status error: {0}")]
    TxnStatus(String),
    #[error("txn record not found for transaction {0}")]
    TxnNotFound(Uuid),
    #[error("transaction already committed")]
    TxnCommitted,
    #[error("transaction aborted: {0:?}")]
    TxnAborted(AbortReason),
    #[error("retry transaction: {0:?}")]
    TxnRetry(RetryReason),
    /// A commit trigger failed after the record was moved to COMMITTED
    /// in-batch; the replica's on-disk state no longer matches what the
    /// commit promised and the replica must be quarantined.
    #[error("replica corruption: {0}")]
    ReplicaCorruption(String),
    #[error("Engine {0}")]
    Engine(#[from] kv::Error),
    #[error("Codec {0}")]
    Codec(#[from] codec::Error),
    #[error("{0:?}")]
    Other(#[from] Box<dyn error::Error + Sync + Send>),
}

pub type Result<T> = result::Result<T, Error>;
