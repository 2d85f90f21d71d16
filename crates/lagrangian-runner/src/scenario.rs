//! Slab-partitioned box scenario.
//!
//! The global domain `[0, ranks * slab_width) x [0, height) x [0, height)` is
//! cut into one slab per rank along x. Particles carry position and velocity
//! (six variables) and one tracked scalar, the distance travelled. Each step
//! applies linear drag and gravity:
//!
//! - hitting the floor (`z <= 0`) absorbs the particle,
//! - slowing below `converge_speed` converges it,
//! - leaving the slab hands it to the router, wrapping around in x when the
//!   scenario is periodic.

use anyhow::{bail, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use lagrangian_kernel::{
    BoundingBox, BoxLocator, Integrator, Locator, ModelConfig, ParticleRecord, RankInput,
    ScalarType, Seed, SeedArray, SeedData, SeedSchema, Termination, TraceRun, TracerConfig,
};

/// Parameters of a scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub ranks: usize,
    pub seeds_per_rank: usize,
    /// Seed for the ChaCha8 generator placing the seeds
    pub rng_seed: u64,
    pub slab_width: f64,
    pub height: f64,
    pub dt: f64,
    pub drag: f64,
    pub gravity: f64,
    pub converge_speed: f64,
    pub max_speed: f64,
    /// Wrap particles leaving the last slab back into the first one
    pub periodic: bool,
    /// Split every seeded particle once, at this step
    pub split_at_step: Option<i64>,
    /// Ranks that get no seeds (and no seed-data schema)
    pub seedless_ranks: Vec<usize>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            ranks: 4,
            seeds_per_rank: 25,
            rng_seed: 42,
            slab_width: 1.0,
            height: 1.0,
            dt: 0.05,
            drag: 0.4,
            gravity: 0.3,
            converge_speed: 0.05,
            max_speed: 2.0,
            periodic: false,
            split_at_step: None,
            seedless_ranks: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ranks == 0 {
            bail!("a scenario needs at least one rank");
        }
        if self.periodic && self.ranks < 2 {
            bail!("a periodic scenario needs at least two ranks");
        }
        if self.slab_width <= 0.0 || self.height <= 0.0 || self.dt <= 0.0 || self.max_speed <= 0.0 {
            bail!("slab_width, height, dt and max_speed must be positive");
        }
        if let Some(&rank) = self.seedless_ranks.iter().find(|&&r| r >= self.ranks) {
            bail!("seedless rank {} does not exist", rank);
        }
        Ok(())
    }

    /// Model shape every rank runs with.
    pub fn model() -> ModelConfig {
        ModelConfig {
            number_of_variables: 6,
            number_of_tracked_user_data: 1,
        }
    }

    pub fn schema() -> SeedSchema {
        SeedSchema::new(vec![
            SeedArray::new("Diameter", ScalarType::Float64, 1),
            SeedArray::new("InitialVelocity", ScalarType::Float64, 3)
                .with_component_names(&["X", "Y", "Z"]),
        ])
    }

    pub fn global_bounds(&self) -> BoundingBox {
        BoundingBox::new(
            [0.0, 0.0, 0.0],
            [self.ranks as f64 * self.slab_width, self.height, self.height],
        )
    }

    pub fn locator(&self, rank: usize) -> BoxLocator {
        let x = rank as f64 * self.slab_width;
        BoxLocator::new([x, 0.0, 0.0], [x + self.slab_width, self.height, self.height])
    }

    pub fn integrator(&self, rank: usize) -> FlowIntegrator {
        FlowIntegrator {
            dt: self.dt,
            drag: self.drag,
            gravity: self.gravity,
            converge_speed: self.converge_speed,
            local: self.locator(rank),
            global: self.global_bounds(),
            periodic: self.periodic,
            split_at_step: self.split_at_step,
            spawned: Vec::new(),
        }
    }

    /// Seeds for every rank, placed anywhere in the global domain.
    pub fn seeds(&self) -> Vec<Vec<Seed>> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.rng_seed);
        let extent = self.global_bounds();

        (0..self.ranks)
            .map(|rank| {
                if self.seedless_ranks.contains(&rank) {
                    return Vec::new();
                }
                (0..self.seeds_per_rank)
                    .map(|_| {
                        let position = [
                            rng.random_range(0.0..extent.max[0]),
                            rng.random_range(0.2 * self.height..0.8 * self.height),
                            rng.random_range(0.2 * self.height..0.8 * self.height),
                        ];
                        let velocity = [
                            rng.random_range(-self.max_speed..self.max_speed),
                            rng.random_range(-0.1 * self.max_speed..0.1 * self.max_speed),
                            rng.random_range(0.0..0.5 * self.max_speed),
                        ];
                        let diameter = rng.random_range(0.001..0.01);
                        Seed {
                            variables: position.iter().chain(&velocity).copied().collect(),
                            integration_time: 0.0,
                            seed_data: SeedData::new(vec![vec![diameter], velocity.to_vec()]),
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Build the run. The model shape of `config` is replaced by the
    /// scenario's own.
    pub fn trace_run(&self, mut config: TracerConfig) -> Result<TraceRun<FlowIntegrator, BoxLocator>> {
        self.validate()?;
        config.model = Self::model();

        let run = self
            .seeds()
            .into_iter()
            .enumerate()
            .fold(TraceRun::new(config), |run, (rank, seeds)| {
                let schema = if seeds.is_empty() {
                    SeedSchema::default()
                } else {
                    Self::schema()
                };
                run.add_rank(
                    RankInput::new(seeds, self.integrator(rank), self.locator(rank))
                        .with_schema(schema),
                )
            });
        Ok(run)
    }
}

/// Drag-and-gravity stepper confined to one slab.
#[derive(Debug, Clone)]
pub struct FlowIntegrator {
    dt: f64,
    drag: f64,
    gravity: f64,
    converge_speed: f64,
    local: BoxLocator,
    global: BoundingBox,
    periodic: bool,
    split_at_step: Option<i64>,
    spawned: Vec<ParticleRecord>,
}

impl FlowIntegrator {
    fn period(&self) -> f64 {
        self.global.max[0] - self.global.min[0]
    }
}

impl Integrator for FlowIntegrator {
    fn step(&mut self, particle: &mut ParticleRecord) -> Termination {
        let dt = self.dt;
        let damping = (1.0 - self.drag * dt).max(0.0);

        particle.next_variables.copy_from_slice(&particle.variables);
        let next = &mut particle.next_variables;
        for axis in 0..3 {
            next[axis] += particle.variables[axis + 3] * dt;
            next[axis + 3] *= damping;
        }
        next[5] -= self.gravity * dt;

        let speed = particle.variables[3..6]
            .iter()
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt();
        if let (Some(distance), Some(&travelled)) = (
            particle.next_tracked_user_data.first_mut(),
            particle.tracked_user_data.first(),
        ) {
            *distance = travelled + speed * dt;
        }

        particle.advance(dt);
        let position = particle.position();
        let speed = particle.variables[3..6]
            .iter()
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt();

        if position[2] <= self.global.min[2] {
            return Termination::Absorbed;
        }
        if speed < self.converge_speed {
            return Termination::Converged;
        }
        if self.periodic && position[0] >= self.global.max[0] {
            let wrapped = [position[0] - self.period(), position[1], position[2]];
            // Leaving through a side wall at the same time is a plain exit
            particle.manual_shift = self.global.contains(wrapped);
            return Termination::OutOfDomain;
        }
        if !self.local.contains(position) {
            return Termination::OutOfDomain;
        }

        if self.split_at_step == Some(particle.step_count) && particle.parent_id == particle.id {
            let mut child = particle.clone();
            child.variables[4] = -child.variables[4];
            child.next_variables.copy_from_slice(&child.variables);
            self.spawned.push(child);
        }
        Termination::Continuing
    }

    fn manual_shift(&self, particle: &mut ParticleRecord) {
        let mut position = particle.position();
        position[0] -= self.period();
        particle.set_position(position);
    }

    fn take_spawned(&mut self) -> Vec<ParticleRecord> {
        std::mem::take(&mut self.spawned)
    }
}
