//! Particle records: the unit of state that moves between ranks.

use serde::{Deserialize, Serialize};

/// Globally unique particle identifier, allocated rank-striped.
pub type ParticleId = i64;

/// Outcome reported for a particle after one integration sub-step.
///
/// `Continuing` is never stored as a final outcome; every other variant
/// ends tracking of the particle on the rank that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Termination {
    Continuing = 0,
    /// Left this rank's subdomain (or the global domain when no rank owns it).
    OutOfDomain = 1,
    Converged = 2,
    Absorbed = 3,
    MaxStepsReached = 4,
}

impl Termination {
    /// Wire code used in reconciliation tables.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Continuing),
            1 => Some(Self::OutOfDomain),
            2 => Some(Self::Converged),
            3 => Some(Self::Absorbed),
            4 => Some(Self::MaxStepsReached),
            _ => None,
        }
    }

    /// Whether tracking stops for good on the rank that observed this outcome.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::Converged | Self::Absorbed | Self::MaxStepsReached
        )
    }
}

/// One tuple per seed-data array, copied from the originating seed point.
///
/// Its shape must match the agreed [`SeedSchema`](crate::schema::SeedSchema).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    pub tuples: Vec<Vec<f64>>,
}

impl SeedData {
    pub fn new(tuples: Vec<Vec<f64>>) -> Self {
        Self { tuples }
    }
}

/// A seed point handed to a rank before tracing starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    /// Initial integration variables; the first three are the position.
    pub variables: Vec<f64>,
    pub integration_time: f64,
    pub seed_data: SeedData,
}

/// Complete particle state.
///
/// The first three entries of each variable vector are the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub id: ParticleId,
    pub seed_id: i64,
    pub parent_id: ParticleId,
    pub step_count: i64,
    pub integration_time: f64,
    pub prev_integration_time: f64,
    /// Opaque caller tag.
    pub user_flag: i32,
    pub prev_variables: Vec<f64>,
    pub variables: Vec<f64>,
    pub next_variables: Vec<f64>,
    pub prev_tracked_user_data: Vec<f64>,
    pub tracked_user_data: Vec<f64>,
    pub next_tracked_user_data: Vec<f64>,
    /// The receiving rank inserts the previous point before continuing the path.
    pub insert_previous_position: bool,
    /// Broadcast to every rank instead of only bounding-box matches.
    pub manual_shift: bool,
    pub seed_data: SeedData,
}

impl ParticleRecord {
    /// Create a fresh particle from a seed. `parent_id` starts out as `id`.
    pub fn from_seed(
        id: ParticleId,
        seed_id: i64,
        seed: &Seed,
        number_of_tracked_user_data: usize,
    ) -> Self {
        Self {
            id,
            seed_id,
            parent_id: id,
            step_count: 0,
            integration_time: seed.integration_time,
            prev_integration_time: seed.integration_time,
            user_flag: 0,
            prev_variables: seed.variables.clone(),
            variables: seed.variables.clone(),
            next_variables: seed.variables.clone(),
            prev_tracked_user_data: vec![0.0; number_of_tracked_user_data],
            tracked_user_data: vec![0.0; number_of_tracked_user_data],
            next_tracked_user_data: vec![0.0; number_of_tracked_user_data],
            insert_previous_position: false,
            manual_shift: false,
            seed_data: seed.seed_data.clone(),
        }
    }

    pub fn position(&self) -> [f64; 3] {
        position_of(&self.variables)
    }

    pub fn previous_position(&self) -> [f64; 3] {
        position_of(&self.prev_variables)
    }

    pub fn set_position(&mut self, position: [f64; 3]) {
        for (slot, value) in self.variables.iter_mut().zip(position) {
            *slot = value;
        }
    }

    /// Rotate prev/current/next after an accepted sub-step.
    pub fn advance(&mut self, dt: f64) {
        std::mem::swap(&mut self.prev_variables, &mut self.variables);
        std::mem::swap(&mut self.variables, &mut self.next_variables);
        self.next_variables.copy_from_slice(&self.variables);
        std::mem::swap(&mut self.prev_tracked_user_data, &mut self.tracked_user_data);
        std::mem::swap(&mut self.tracked_user_data, &mut self.next_tracked_user_data);
        self.next_tracked_user_data
            .copy_from_slice(&self.tracked_user_data);
        self.prev_integration_time = self.integration_time;
        self.integration_time += dt;
        self.step_count += 1;
    }
}

fn position_of(variables: &[f64]) -> [f64; 3] {
    let mut position = [0.0; 3];
    for (slot, value) in position.iter_mut().zip(variables) {
        *slot = *value;
    }
    position
}
