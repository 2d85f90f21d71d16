//! Message passing between ranks.
//!
//! The kernel only needs tagged point-to-point messages with non-blocking
//! sends and receives, a barrier, and an all-gather. [`LocalFabric`] provides
//! them for ranks running as tasks in one process.
//!
//! ```text
//! Rank r ──isend(dest, Particle, bytes)──► mailbox[dest][Particle]
//!        ──isend(0, Flag, bytes)─────────► mailbox[0][Flag]
//!        ◄─try_recv_into(tag, buf)─────── mailbox[r][tag]
//! ```

mod local;

use std::future::Future;

use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};

use crate::error::{Result, TraceError};

pub use local::{LocalComm, LocalFabric};

/// Message class carried on a point-to-point channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// One wire-codec particle buffer.
    Particle,
    /// One termination-detection report.
    Flag,
    /// The seed-data schema, sent once at startup.
    Schema,
}

/// Handle on an in-flight non-blocking send.
#[derive(Debug)]
pub struct SendRequest {
    dest: usize,
    handle: JoinHandle<Result<()>>,
}

impl SendRequest {
    pub fn new(dest: usize, handle: JoinHandle<Result<()>>) -> Self {
        Self { dest, handle }
    }

    /// Non-blocking completion test.
    pub fn is_complete(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait until the message has been handed to the destination mailbox.
    pub async fn wait(self) -> Result<()> {
        let dest = self.dest;
        joined(dest, self.handle.await)
    }

    /// Result of a finished send without giving up the handle.
    ///
    /// `None` while the send is running, and also when the runtime's task
    /// budget keeps a finished result from being observed on this poll.
    pub fn try_result(&mut self) -> Option<Result<()>> {
        let result = (&mut self.handle).now_or_never()?;
        Some(joined(self.dest, result))
    }
}

fn joined(dest: usize, result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match result {
        Ok(result) => result,
        Err(e) => Err(TraceError::Collective {
            op: "send",
            reason: format!("send task to rank {} failed: {}", dest, e),
        }),
    }
}

/// Rank-local view of the message fabric.
///
/// Collectives must be called by every rank in the same order.
pub trait Communicator: Send + Sync + 'static {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Queue `payload` for `dest` without waiting for delivery.
    fn isend(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> SendRequest;

    /// Receive one pending message with `tag` into `buf`, if any.
    ///
    /// Returns the source rank. Never waits.
    fn try_recv_into(&self, tag: Tag, buf: &mut Vec<u8>) -> Option<usize>;

    fn barrier(&self) -> impl Future<Output = Result<()>> + Send;

    /// Every rank contributes one buffer; every rank receives all of them,
    /// indexed by rank.
    fn all_gather(&self, payload: Vec<u8>) -> impl Future<Output = Result<Vec<Vec<u8>>>> + Send;
}
