//! Message types for acton-reactive actor communication.
//!
//! Ranks report to the [`TraceMonitor`](crate::actors::TraceMonitor) by
//! direct send on its handle; the monitor needs no replies.

use crate::tracker::RankStats;

/// Periodic progress from a rank, sent every `progress_interval` steps.
#[derive(Debug, Clone)]
pub struct RankProgress {
    pub rank: usize,
    /// Integration steps taken so far
    pub steps: u64,
    /// Particles waiting in the local queue
    pub queued: usize,
    pub migrated: u64,
    pub terminated: u64,
}

/// A rank has reconciled its output and will send nothing more.
#[derive(Debug, Clone)]
pub struct RankFinished {
    pub stats: RankStats,
}
