//! TraceMonitor: collects rank progress and completion.
//!
//! Bridges the rank tasks with the run harness: when every expected rank
//! has sent [`RankFinished`], the monitor forwards a [`TraceSummary`] to an
//! mpsc channel.

use std::collections::HashMap;

use acton_reactive::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::kernel::TraceSummary;
use crate::messages::{RankFinished, RankProgress};
use crate::tracker::RankStats;

/// Actor state for TraceMonitor.
#[derive(Default, Clone)]
pub struct TraceMonitorState {
    expected_ranks: usize,
    /// Latest progress of ranks still tracing
    progress: HashMap<usize, RankProgress>,
    finished: Vec<RankStats>,
    tx: Option<mpsc::Sender<TraceSummary>>,
}

impl std::fmt::Debug for TraceMonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceMonitorState")
            .field("expected_ranks", &self.expected_ranks)
            .field("tracing", &self.progress.len())
            .field("finished", &self.finished.len())
            .field("has_tx", &self.tx.is_some())
            .finish()
    }
}

/// Actor that aggregates per-rank reports into one summary.
pub struct TraceMonitor {
    expected_ranks: usize,
    tx: mpsc::Sender<TraceSummary>,
}

impl TraceMonitor {
    pub fn new(expected_ranks: usize, tx: mpsc::Sender<TraceSummary>) -> Self {
        Self { expected_ranks, tx }
    }

    /// Spawn the actor in the runtime.
    ///
    /// Ranks send their messages straight to the returned handle.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor = runtime.new_actor_with_name::<TraceMonitorState>("TraceMonitor".to_string());

        actor.model.expected_ranks = self.expected_ranks;
        actor.model.tx = Some(self.tx);

        actor.mutate_on::<RankProgress>(|actor, context| {
            let msg = context.message().clone();
            debug!(
                rank = msg.rank,
                steps = msg.steps,
                queued = msg.queued,
                migrated = msg.migrated,
                terminated = msg.terminated,
                "Rank progress"
            );
            actor.model.progress.insert(msg.rank, msg);
            Reply::ready()
        });

        actor.mutate_on::<RankFinished>(|actor, context| {
            let stats = context.message().stats.clone();
            info!(
                rank = stats.rank,
                steps = stats.steps,
                terminated = stats.terminated(),
                reconciled = stats.reconciled,
                "Rank finished"
            );
            actor.model.progress.remove(&stats.rank);
            actor.model.finished.push(stats);

            if actor.model.finished.len() < actor.model.expected_ranks {
                return Reply::ready();
            }

            let summary = TraceSummary::from_ranks(std::mem::take(&mut actor.model.finished));
            let tx = actor.model.tx.take();

            Reply::pending(async move {
                if let Some(tx) = tx {
                    // Ignore send errors - the harness may have given up
                    let _ = tx.send(summary).await;
                }
            })
        });

        actor.start().await
    }
}
