//! Tracking orchestrator: owns the local work queue of one rank.
//!
//! ```text
//! seeds ──► generate_particles ──► queue ──► integrator.step
//!                                    ▲            │
//!                                    │ Continuing ┤ OutOfDomain ──► router
//!                                    │            │ final ────────► results
//!           receive_particles ◄──────┴── queue empty: detector.wait_for_work
//! ```
//!
//! Particle ids are allocated rank-striped: rank `r` of `n` hands out
//! `r, r + n, r + 2n, ...`, so ids never collide and no rank ever asks
//! another for one.

use std::collections::VecDeque;
use std::sync::Arc;

use acton_reactive::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::codec::WireCodec;
use crate::comm::Communicator;
use crate::config::{QueueOrder, TracerConfig};
use crate::error::{Result, TraceError};
use crate::messages::{RankFinished, RankProgress};
use crate::model::{Integrator, Locator};
use crate::particle::{ParticleId, ParticleRecord, Seed, Termination};
use crate::paths::ParticlePaths;
use crate::reconcile::reconcile_outcomes;
use crate::router::Router;
use crate::schema::SeedSchema;
use crate::termination::{TerminationDetector, WorkSource, WorkStatus};

/// Per-rank counters, reported to the monitor and kept in the rank report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankStats {
    pub rank: usize,
    /// Seeds whose position this rank owns.
    pub seeds_local: usize,
    /// Seeds handed to the router at startup.
    pub seeds_forwarded: usize,
    /// Seeds no rank's bounding box contains.
    pub seeds_outside: usize,
    /// Particles split off by the integrator.
    pub spawned: usize,
    pub steps: u64,
    /// Particles migrated to at least one other rank.
    pub migrated: u64,
    /// Particles that left the global domain.
    pub exited: u64,
    /// Arrivals kept after the containment check.
    pub accepted: u64,
    /// Arrivals dropped by the containment check.
    pub discarded: u64,
    pub converged: u64,
    pub absorbed: u64,
    pub max_steps_reached: u64,
    /// Path segments whose provisional outcome was patched.
    pub reconciled: usize,
}

impl RankStats {
    /// Particles that stopped for good on this rank.
    pub fn terminated(&self) -> u64 {
        self.converged + self.absorbed + self.max_steps_reached
    }

    fn count(&mut self, termination: Termination) {
        match termination {
            Termination::Converged => self.converged += 1,
            Termination::Absorbed => self.absorbed += 1,
            Termination::MaxStepsReached => self.max_steps_reached += 1,
            Termination::Continuing | Termination::OutOfDomain => {}
        }
    }
}

/// Everything a rank produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankReport {
    pub rank: usize,
    pub stats: RankStats,
    /// Final outcomes observed on this rank.
    pub outcomes: Vec<(ParticleId, Termination)>,
    pub paths: ParticlePaths,
}

/// Drives one rank from seeding to reconciled output.
pub struct ParticleTracker<C: Communicator, I: Integrator, L: Locator> {
    comm: Arc<C>,
    config: TracerConfig,
    schema: SeedSchema,
    integrator: I,
    locator: L,
    router: Router<C>,
    detector: TerminationDetector<C>,
    queue: VecDeque<ParticleRecord>,
    paths: ParticlePaths,
    outcomes: Vec<(ParticleId, Termination)>,
    next_id: ParticleId,
    stats: RankStats,
    monitor: Option<ActorHandle>,
}

impl<C: Communicator, I: Integrator, L: Locator> std::fmt::Debug for ParticleTracker<C, I, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticleTracker")
            .field("rank", &self.comm.rank())
            .field("queued", &self.queue.len())
            .field("next_id", &self.next_id)
            .field("stats", &self.stats)
            .field("has_monitor", &self.monitor.is_some())
            .finish()
    }
}

impl<C: Communicator, I: Integrator, L: Locator> ParticleTracker<C, I, L> {
    /// Build the rank's router and detector. Collective: every rank must call
    /// this with the same reconciled schema.
    pub async fn new(
        comm: Arc<C>,
        config: TracerConfig,
        schema: SeedSchema,
        integrator: I,
        locator: L,
    ) -> Result<Self> {
        config.validate()?;
        let codec = WireCodec::new(
            config.model.number_of_variables,
            config.model.number_of_tracked_user_data,
            &schema,
        );
        let router = Router::new(comm.clone(), codec, locator.bounds()).await?;
        let detector = TerminationDetector::new(comm.clone());
        let rank = comm.rank();

        Ok(Self {
            comm,
            config,
            schema,
            integrator,
            locator,
            router,
            detector,
            queue: VecDeque::new(),
            paths: ParticlePaths::new(),
            outcomes: Vec::new(),
            next_id: rank as ParticleId,
            stats: RankStats {
                rank,
                ..RankStats::default()
            },
            monitor: None,
        })
    }

    /// Send progress and completion messages to `monitor`.
    pub fn with_monitor(mut self, monitor: ActorHandle) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn stats(&self) -> &RankStats {
        &self.stats
    }

    pub fn paths(&self) -> &ParticlePaths {
        &self.paths
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Next globally unique id for this rank.
    pub fn allocate_id(&mut self) -> ParticleId {
        let id = self.next_id;
        self.next_id += self.comm.size() as ParticleId;
        id
    }

    /// Seeding, tracking and reconciliation in one go.
    pub async fn run(mut self, seeds: &[Seed]) -> Result<RankReport> {
        self.generate_particles(seeds).await?;
        self.track().await?;
        self.finalize().await?;
        Ok(self.into_report())
    }

    /// Turn this rank's seeds into particles.
    ///
    /// Seeds in owned cells are queued; the rest are offered to the ranks
    /// whose boxes contain them. Collective: ends with a barrier and a first
    /// receive.
    pub async fn generate_particles(&mut self, seeds: &[Seed]) -> Result<()> {
        let n_var = self.config.model.number_of_variables;
        let n_tracked = self.config.model.number_of_tracked_user_data;

        for (seed_id, seed) in seeds.iter().enumerate() {
            if seed.variables.len() != n_var {
                return Err(TraceError::InvalidConfig(format!(
                    "seed {} has {} variables, the model has {}",
                    seed_id,
                    seed.variables.len(),
                    n_var
                )));
            }
            self.schema.check_data(&seed.seed_data)?;

            let id = self.allocate_id();
            let particle = ParticleRecord::from_seed(id, seed_id as i64, seed, n_tracked);
            if self.locator.contains(particle.position()) {
                self.stats.seeds_local += 1;
                self.queue.push_back(particle);
            } else if self.router.route(particle)? > 0 {
                self.stats.seeds_forwarded += 1;
            } else {
                debug!(rank = self.rank(), seed_id, "Seed lies outside every rank's bounds");
                self.stats.seeds_outside += 1;
            }
        }

        self.comm.barrier().await?;
        let arrived = self.receive_particles()?;

        info!(
            rank = self.rank(),
            local = self.stats.seeds_local,
            forwarded = self.stats.seeds_forwarded,
            arrived,
            "Particles generated"
        );
        Ok(())
    }

    /// Drain inbound particles; keep those this rank's locator owns.
    pub fn receive_particles(&mut self) -> Result<usize> {
        self.intake().poll_work()
    }

    /// Work the queue until every rank agrees nothing is left.
    pub async fn track(&mut self) -> Result<()> {
        loop {
            let next = match self.config.queue_order {
                QueueOrder::Fifo => self.queue.pop_front(),
                QueueOrder::Lifo => self.queue.pop_back(),
            };

            match next {
                Some(particle) => {
                    self.integrate(particle)?;
                    self.maybe_report_progress().await;
                }
                None => {
                    let mut intake = Intake {
                        router: &mut self.router,
                        integrator: &mut self.integrator,
                        locator: &self.locator,
                        queue: &mut self.queue,
                        stats: &mut self.stats,
                    };
                    if self.detector.wait_for_work(&mut intake).await? == WorkStatus::Finished {
                        break;
                    }
                }
            }
        }

        info!(
            rank = self.rank(),
            steps = self.stats.steps,
            terminated = self.stats.terminated(),
            migrated = self.stats.migrated,
            "Tracking finished"
        );
        Ok(())
    }

    /// Advance one particle by one sub-step and act on the outcome.
    fn integrate(&mut self, mut particle: ParticleRecord) -> Result<()> {
        self.paths.begin(&mut particle);
        let mut termination = self.integrator.step(&mut particle);
        self.stats.steps += 1;

        for mut child in self.integrator.take_spawned() {
            child.id = self.allocate_id();
            child.parent_id = particle.id;
            child.seed_id = particle.seed_id;
            trace!(parent = particle.id, child = child.id, "Particle split");
            self.stats.spawned += 1;
            self.queue.push_back(child);
        }

        if termination == Termination::Continuing {
            if let Some(max) = self.config.max_steps {
                if particle.step_count >= max as i64 {
                    termination = Termination::MaxStepsReached;
                }
            }
        }

        match termination {
            Termination::Continuing => {
                self.paths.record(&particle);
                self.queue.push_back(particle);
            }
            Termination::OutOfDomain => {
                if !particle.manual_shift {
                    particle.insert_previous_position = true;
                }
                let id = particle.id;
                self.paths.close(id, Termination::OutOfDomain);
                if self.router.route(particle)? > 0 {
                    self.stats.migrated += 1;
                } else {
                    trace!(rank = self.rank(), particle_id = id, "Particle left the domain");
                    self.stats.exited += 1;
                }
            }
            outcome => {
                self.paths.record(&particle);
                self.paths.close(particle.id, outcome);
                self.outcomes.push((particle.id, outcome));
                self.stats.count(outcome);
                trace!(rank = self.rank(), particle_id = particle.id, ?outcome, "Particle terminated");
            }
        }
        Ok(())
    }

    /// Patch provisional path outcomes with the true ones. Collective.
    pub async fn finalize(&mut self) -> Result<()> {
        self.stats.reconciled =
            reconcile_outcomes(self.comm.as_ref(), &self.outcomes, &mut self.paths).await?;

        if let Some(monitor) = &self.monitor {
            monitor
                .send(RankFinished {
                    stats: self.stats.clone(),
                })
                .await;
        }
        Ok(())
    }

    pub fn into_report(self) -> RankReport {
        RankReport {
            rank: self.comm.rank(),
            stats: self.stats,
            outcomes: self.outcomes,
            paths: self.paths,
        }
    }

    async fn maybe_report_progress(&mut self) {
        let interval = self.config.progress_interval;
        if interval == 0 || self.stats.steps % interval != 0 {
            return;
        }
        if let Some(monitor) = &self.monitor {
            monitor
                .send(RankProgress {
                    rank: self.rank(),
                    steps: self.stats.steps,
                    queued: self.queue.len(),
                    migrated: self.stats.migrated,
                    terminated: self.stats.terminated(),
                })
                .await;
        }
    }

    fn intake(&mut self) -> Intake<'_, C, I, L> {
        Intake {
            router: &mut self.router,
            integrator: &mut self.integrator,
            locator: &self.locator,
            queue: &mut self.queue,
            stats: &mut self.stats,
        }
    }
}

/// Borrowed view of a tracker the detector polls for new work.
struct Intake<'a, C: Communicator, I, L> {
    router: &'a mut Router<C>,
    integrator: &'a mut I,
    locator: &'a L,
    queue: &'a mut VecDeque<ParticleRecord>,
    stats: &'a mut RankStats,
}

impl<C: Communicator, I: Integrator, L: Locator> WorkSource for Intake<'_, C, I, L> {
    fn poll_work(&mut self) -> Result<usize> {
        let mut kept = 0;
        for particle in self.router.drain(&*self.integrator)? {
            if self.locator.contains(particle.position()) {
                self.queue.push_back(particle);
                self.stats.accepted += 1;
                kept += 1;
            } else {
                trace!(particle_id = particle.id, "Arrived particle not owned here, dropped");
                self.stats.discarded += 1;
            }
        }
        Ok(kept)
    }

    fn counters(&self) -> (u64, u64) {
        (self.router.sent(), self.router.received())
    }
}
