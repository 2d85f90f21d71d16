//! Per-rank path output: one polyline segment per visit of a particle.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::particle::{ParticleId, ParticleRecord, Termination};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub position: [f64; 3],
    pub variables: Vec<f64>,
    pub integration_time: f64,
}

/// Points emitted on this rank for one particle between arrival and
/// termination or migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub particle_id: ParticleId,
    pub seed_id: i64,
    pub parent_id: ParticleId,
    pub points: Vec<PathPoint>,
    /// `Continuing` while open; provisional `OutOfDomain` until reconciled.
    pub termination: Termination,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticlePaths {
    segments: Vec<PathSegment>,
    #[serde(skip)]
    open: HashMap<ParticleId, usize>,
}

impl ParticlePaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a segment for `particle` unless one is already open, and emit
    /// its starting point(s).
    ///
    /// A particle arriving with `insert_previous_position` gets its previous
    /// point duplicated first so the path stays contiguous across ranks; the
    /// flag is cleared.
    pub fn begin(&mut self, particle: &mut ParticleRecord) {
        if self.open.contains_key(&particle.id) {
            return;
        }

        let mut points = Vec::with_capacity(2);
        if particle.insert_previous_position {
            points.push(PathPoint {
                position: particle.previous_position(),
                variables: particle.prev_variables.clone(),
                integration_time: particle.prev_integration_time,
            });
            particle.insert_previous_position = false;
        }
        points.push(point_of(particle));

        self.open.insert(particle.id, self.segments.len());
        self.segments.push(PathSegment {
            particle_id: particle.id,
            seed_id: particle.seed_id,
            parent_id: particle.parent_id,
            points,
            termination: Termination::Continuing,
        });
    }

    /// Append the particle's current point to its open segment.
    pub fn record(&mut self, particle: &ParticleRecord) {
        if let Some(&idx) = self.open.get(&particle.id) {
            self.segments[idx].points.push(point_of(particle));
        }
    }

    /// Close the open segment of `id` with `termination`.
    pub fn close(&mut self, id: ParticleId, termination: Termination) {
        if let Some(idx) = self.open.remove(&id) {
            self.segments[idx].termination = termination;
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [PathSegment] {
        &mut self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Segments belonging to one particle, in emission order.
    pub fn for_particle(&self, id: ParticleId) -> impl Iterator<Item = &PathSegment> {
        self.segments.iter().filter(move |s| s.particle_id == id)
    }
}

fn point_of(particle: &ParticleRecord) -> PathPoint {
    PathPoint {
        position: particle.position(),
        variables: particle.variables.clone(),
        integration_time: particle.integration_time,
    }
}
