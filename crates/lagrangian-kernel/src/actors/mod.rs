//! Acton-reactive actors observing a tracing run.
//!
//! ```text
//! rank task ── RankProgress (every N steps) ──► TraceMonitor
//! rank task ── RankFinished (after reconcile) ─► TraceMonitor
//!                                               └─ TraceSummary ─► mpsc ─► TraceRun
//! ```
//!
//! The ranks themselves are plain tokio tasks talking over the fabric; the
//! monitor only aggregates what they report.

mod monitor;

pub use monitor::{TraceMonitor, TraceMonitorState};
