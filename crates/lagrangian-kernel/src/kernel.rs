//! The run harness: every rank as a tokio task on one in-process fabric.
//!
//! ## Usage
//!
//! ```ignore
//! use lagrangian_kernel::{RankInput, TraceRun, TracerConfig};
//!
//! let outcome = TraceRun::new(TracerConfig::default())
//!     .add_rank(RankInput::new(seeds_0, integrator_0, locator_0))
//!     .add_rank(RankInput::new(seeds_1, integrator_1, locator_1))
//!     .run()
//!     .await?;
//!
//! println!("{} particles terminated", outcome.summary.terminated());
//! ```
//!
//! Each rank agrees the seed schema, builds its tracker, seeds, tracks until
//! global termination, and reconciles its paths. A [`TraceMonitor`] actor
//! gathers their reports into a [`TraceSummary`].

use std::sync::Arc;

use acton_reactive::prelude::*;
use anyhow::{bail, Context, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actors::TraceMonitor;
use crate::comm::{Communicator, LocalFabric};
use crate::config::TracerConfig;
use crate::error::TraceError;
use crate::model::{Integrator, Locator};
use crate::particle::Seed;
use crate::schema::{reconcile_schema, SeedSchema};
use crate::tracker::{ParticleTracker, RankReport, RankStats};

/// Aggregate of every rank's statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Per-rank statistics, ordered by rank
    pub ranks: Vec<RankStats>,
}

impl TraceSummary {
    pub fn from_ranks(mut ranks: Vec<RankStats>) -> Self {
        ranks.sort_by_key(|s| s.rank);
        Self { ranks }
    }

    fn total(&self, field: impl Fn(&RankStats) -> u64) -> u64 {
        self.ranks.iter().map(field).sum()
    }

    pub fn steps(&self) -> u64 {
        self.total(|s| s.steps)
    }

    /// Seeds that entered the domain on some rank.
    pub fn seeds(&self) -> u64 {
        self.total(|s| (s.seeds_local + s.seeds_forwarded) as u64)
    }

    pub fn spawned(&self) -> u64 {
        self.total(|s| s.spawned as u64)
    }

    pub fn migrations(&self) -> u64 {
        self.total(|s| s.migrated)
    }

    pub fn terminated(&self) -> u64 {
        self.total(RankStats::terminated)
    }

    /// Particles that left the global domain.
    pub fn exited(&self) -> u64 {
        self.total(|s| s.exited)
    }

    pub fn discarded(&self) -> u64 {
        self.total(|s| s.discarded)
    }
}

/// What one rank starts with.
#[derive(Debug)]
pub struct RankInput<I, L> {
    pub seeds: Vec<Seed>,
    /// Local seed-data layout; may be empty on ranks without seeds.
    pub schema: SeedSchema,
    pub integrator: I,
    pub locator: L,
}

impl<I, L> RankInput<I, L> {
    pub fn new(seeds: Vec<Seed>, integrator: I, locator: L) -> Self {
        Self {
            seeds,
            schema: SeedSchema::default(),
            integrator,
            locator,
        }
    }

    pub fn with_schema(mut self, schema: SeedSchema) -> Self {
        self.schema = schema;
        self
    }
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceOutcome {
    pub run_id: Uuid,
    pub summary: TraceSummary,
    /// Per-rank output, ordered by rank
    pub reports: Vec<RankReport>,
}

/// Builder for a distributed trace over an in-process fabric.
pub struct TraceRun<I, L> {
    config: TracerConfig,
    ranks: Vec<RankInput<I, L>>,
}

impl<I, L> TraceRun<I, L>
where
    I: Integrator + 'static,
    L: Locator + 'static,
{
    pub fn new(config: TracerConfig) -> Self {
        Self {
            config,
            ranks: Vec::new(),
        }
    }

    /// Add the next rank; ranks are numbered in the order added.
    pub fn add_rank(mut self, input: RankInput<I, L>) -> Self {
        self.ranks.push(input);
        self
    }

    /// Run every rank to completion.
    ///
    /// If any rank fails, the remaining ranks are aborted and the first
    /// error is returned.
    pub async fn run(self) -> Result<TraceOutcome> {
        self.config.validate().context("invalid tracer configuration")?;
        let size = self.ranks.len();
        if size == 0 {
            bail!("a trace needs at least one rank");
        }

        let run_id = Uuid::new_v4();
        info!(%run_id, ranks = size, "Starting distributed trace");

        let mut runtime = ActonApp::launch_async().await;
        let (summary_tx, mut summary_rx) = mpsc::channel::<TraceSummary>(1);
        let monitor = TraceMonitor::new(size, summary_tx).spawn(&mut runtime).await;

        let fabric = LocalFabric::new(size, self.config.channel_capacity)?;
        let tasks: Vec<_> = fabric
            .into_comms()
            .into_iter()
            .zip(self.ranks)
            .map(|(comm, input)| {
                let config = self.config.clone();
                let monitor = monitor.clone();
                tokio::spawn(run_rank(Arc::new(comm), config, input, monitor))
            })
            .collect();
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();

        let joined = try_join_all(tasks.into_iter().enumerate().map(|(rank, task)| async move {
            match task.await {
                Ok(report) => report.with_context(|| format!("rank {} failed", rank)),
                Err(e) => Err(TraceError::RankAborted {
                    rank,
                    reason: e.to_string(),
                }
                .into()),
            }
        }))
        .await;

        let reports = match joined {
            Ok(reports) => reports,
            Err(e) => {
                warn!(%run_id, error = %e, "Rank failed, aborting the others");
                for abort in &aborts {
                    abort.abort();
                }
                let _ = runtime.shutdown_all().await;
                return Err(e);
            }
        };

        let summary = summary_rx
            .recv()
            .await
            .context("monitor stopped before summarizing the run")?;
        let _ = runtime.shutdown_all().await;

        info!(
            %run_id,
            steps = summary.steps(),
            terminated = summary.terminated(),
            exited = summary.exited(),
            migrations = summary.migrations(),
            "Distributed trace complete"
        );

        Ok(TraceOutcome {
            run_id,
            summary,
            reports,
        })
    }
}

/// One rank, from schema agreement to reconciled paths.
pub async fn run_rank<C, I, L>(
    comm: Arc<C>,
    config: TracerConfig,
    input: RankInput<I, L>,
    monitor: ActorHandle,
) -> Result<RankReport, TraceError>
where
    C: Communicator,
    I: Integrator,
    L: Locator,
{
    let RankInput {
        seeds,
        schema,
        integrator,
        locator,
    } = input;

    let schema = reconcile_schema(comm.as_ref(), schema).await?;
    let tracker = ParticleTracker::new(comm, config, schema, integrator, locator)
        .await?
        .with_monitor(monitor);
    tracker.run(&seeds).await
}
