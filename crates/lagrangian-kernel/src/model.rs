//! Collaborator interfaces consumed by the tracker.
//!
//! The kernel does not integrate anything itself. An [`Integrator`] advances
//! one particle by one sub-step and reports why it stopped, and a [`Locator`]
//! answers whether a position lies in the cells this rank owns.
//!
//! Both are synchronous local computations: no I/O, no messaging.

use crate::bounds::BoundingBox;
use crate::particle::{ParticleRecord, Termination};

/// Advances particles through the local subdomain.
pub trait Integrator: Send {
    /// Advance `particle` by one sub-step, mutating it in place.
    ///
    /// Return [`Termination::OutOfDomain`] when the step leaves the cells
    /// owned by this rank; set `particle.manual_shift` as well if the
    /// particle must be offered to every rank (periodic wrap).
    fn step(&mut self, particle: &mut ParticleRecord) -> Termination;

    /// Position correction applied once by a rank receiving a manually
    /// shifted particle, before containment is tested.
    fn manual_shift(&self, _particle: &mut ParticleRecord) {}

    /// Particles created by the last step (splits), without ids yet.
    fn take_spawned(&mut self) -> Vec<ParticleRecord> {
        Vec::new()
    }
}

/// Answers ownership questions for this rank's cells.
pub trait Locator: Send + Sync {
    fn contains(&self, position: [f64; 3]) -> bool;

    /// Extent of the owned cells, exchanged once at startup.
    fn bounds(&self) -> BoundingBox;
}

/// Locator over a single half-open box `[min, max)`.
///
/// Adjacent boxes sharing a face never both claim a point on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxLocator {
    pub bounds: BoundingBox,
}

impl BoxLocator {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self {
            bounds: BoundingBox::new(min, max),
        }
    }
}

impl Locator for BoxLocator {
    fn contains(&self, position: [f64; 3]) -> bool {
        (0..3).all(|axis| {
            self.bounds.min[axis] <= position[axis] && position[axis] < self.bounds.max[axis]
        })
    }

    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}
