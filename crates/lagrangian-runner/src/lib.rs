//! Lagrangian Runner: slab-partitioned tracing scenarios.
//!
//! This crate drives the kernel with a concrete model:
//! - a drag-and-gravity integrator confined to one slab per rank
//! - reproducible seeding from a ChaCha8 generator
//! - JSON results with every particle's reconciled fate

pub mod results;
pub mod scenario;

pub use results::{ParticleFate, RunResults};
pub use scenario::{FlowIntegrator, ScenarioConfig};
