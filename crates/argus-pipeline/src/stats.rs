//! Pipeline counters.
//!
//! Shared between the tick path and the worker thread, so everything is a
//! relaxed atomic; the snapshot is advisory, not a consistent cut.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for the capture/process/dispatch path.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    frames_handed_off: AtomicU64,
    frames_dropped_busy: AtomicU64,
    frames_dropped_stale: AtomicU64,
    results_dispatched: AtomicU64,
    handler_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_handed_off: u64,
    pub frames_dropped_busy: u64,
    pub frames_dropped_stale: u64,
    pub results_dispatched: u64,
    pub handler_failures: u64,
}

impl PipelineStats {
    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handed_off(&self) {
        self.frames_handed_off.fetch_add(1, Ordering::Relaxed);
    }

    /// Frame dropped because the worker slot was occupied.
    pub fn record_dropped_busy(&self) {
        self.frames_dropped_busy.fetch_add(1, Ordering::Relaxed);
    }

    /// Frame dropped for staleness: pose too old, origin mismatch, wrong
    /// geometry during a format switch, or timestamp regression.
    pub fn record_dropped_stale(&self) {
        self.frames_dropped_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_results_dispatched(&self, count: u64) {
        self.results_dispatched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_handed_off: self.frames_handed_off.load(Ordering::Relaxed),
            frames_dropped_busy: self.frames_dropped_busy.load(Ordering::Relaxed),
            frames_dropped_stale: self.frames_dropped_stale.load(Ordering::Relaxed),
            results_dispatched: self.results_dispatched.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}
