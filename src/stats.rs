//! Process-wide diagnostic counters.
//!
//! These are incremented atomically from the dispatch path and never reset.
//! They count conditions that are survivable but worth surfacing: lost
//! capture context for reassembled bytes, and packets dropped by the
//! per-packet panic trap.

use std::sync::atomic::{AtomicU64, Ordering};

/// Times no capture context was available for the first byte handed to a
/// newly accepted parser. The affected bytes are reported as dropped.
pub static MISSING_CONTEXT_ON_ACCEPT: AtomicU64 = AtomicU64::new(0);

/// Times a capture context of an unexpected shape was seen. Kept for parity
/// with the original counters; typed dispatch cannot produce one.
pub static BAD_CONTEXT_TYPE: AtomicU64 = AtomicU64::new(0);

/// Times a parse completed without a capture context for its final delivery,
/// typically after a timed flush. The completion timestamp falls back to the
/// parse start.
pub static MISSING_CONTEXT_AFTER_PARSE: AtomicU64 = AtomicU64::new(0);

/// Packets discarded by the per-packet panic trap.
pub static PACKETS_DROPPED_BY_TRAP: AtomicU64 = AtomicU64::new(0);

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time snapshot of all diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub missing_context_on_accept: u64,
    pub bad_context_type: u64,
    pub missing_context_after_parse: u64,
    pub packets_dropped_by_trap: u64,
}

/// Reads every counter once.
pub fn snapshot() -> StatsSnapshot {
    StatsSnapshot {
        missing_context_on_accept: MISSING_CONTEXT_ON_ACCEPT.load(Ordering::Relaxed),
        bad_context_type: BAD_CONTEXT_TYPE.load(Ordering::Relaxed),
        missing_context_after_parse: MISSING_CONTEXT_AFTER_PARSE.load(Ordering::Relaxed),
        packets_dropped_by_trap: PACKETS_DROPPED_BY_TRAP.load(Ordering::Relaxed),
    }
}
