//! Error type shared by every kernel operation.
//!
//! All of these are fatal for the run: the protocol assumes a reliable
//! transport and agreed configuration, so nothing here is retried.

use thiserror::Error;

/// Failures surfaced by the tracing kernel.
#[derive(Debug, Error)]
pub enum TraceError {
    /// Seed-data array layouts disagree between ranks.
    #[error("seed data schema mismatch on rank {rank}: {reason}")]
    SchemaMismatch { rank: usize, reason: String },

    /// A received buffer does not match the agreed wire layout.
    #[error("malformed {what} message: {reason}")]
    MalformedMessage { what: &'static str, reason: String },

    /// Configuration values that cannot describe a valid run.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A peer's mailbox was dropped before a message could be delivered.
    #[error("rank {0} is no longer reachable")]
    PeerDisconnected(usize),

    /// A collective operation could not complete on every rank.
    #[error("collective {op} failed: {reason}")]
    Collective { op: &'static str, reason: String },

    /// A rank task panicked or was cancelled by the runtime.
    #[error("rank {rank} aborted: {reason}")]
    RankAborted { rank: usize, reason: String },
}

impl TraceError {
    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            what,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = TraceError> = std::result::Result<T, E>;
