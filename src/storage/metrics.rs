// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use prometheus::*;

lazy_static! {
    pub static ref FINALIZE_TXN_COUNTER_VEC: IntCounterVec = register_int_counter_vec!(
        "rangekv_finalize_txn_total",
        "Total finalized transactions, by outcome.",
        &["outcome"]
    )
    .unwrap();
    pub static ref COMMIT_TRIGGER_COUNTER_VEC: IntCounterVec = register_int_counter_vec!(
        "rangekv_commit_trigger_total",
        "Total structural commit triggers staged, by kind.",
        &["kind"]
    )
    .unwrap();
    pub static ref INTENT_KEYS_RESOLVED: IntCounter = register_int_counter!(
        "rangekv_finalize_intent_keys_resolved_total",
        "Intent keys resolved synchronously during finalization."
    )
    .unwrap();
    pub static ref INTENT_SPANS_DEFERRED: IntCounter = register_int_counter!(
        "rangekv_finalize_intent_spans_deferred_total",
        "Intent spans handed off to asynchronous resolution."
    )
    .unwrap();
}
