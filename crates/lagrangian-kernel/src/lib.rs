//! Lagrangian Kernel: distributed particle tracing over a partitioned domain
//!
//! Ranks each own a spatial subdomain. Particles are integrated locally,
//! migrated between ranks as fixed-stride binary messages when they leave
//! a subdomain, and a coordinator-based protocol decides when no particle is
//! left anywhere. Path segments recorded before a particle's fate was known
//! are reconciled at the end.

pub mod actors;
pub mod bounds;
pub mod codec;
pub mod comm;
pub mod config;
pub mod error;
pub mod kernel;
pub mod messages;
pub mod model;
pub mod particle;
pub mod paths;
pub mod reconcile;
pub mod router;
pub mod schema;
pub mod termination;
pub mod tracker;

pub use bounds::BoundingBox;
pub use codec::WireCodec;
pub use comm::{Communicator, LocalComm, LocalFabric, Tag};
pub use config::{ModelConfig, QueueOrder, TracerConfig};
pub use error::{Result, TraceError};
pub use kernel::{RankInput, TraceOutcome, TraceRun, TraceSummary};
pub use model::{BoxLocator, Integrator, Locator};
pub use particle::{ParticleId, ParticleRecord, Seed, SeedData, Termination};
pub use paths::{ParticlePaths, PathPoint, PathSegment};
pub use router::Router;
pub use schema::{ScalarType, SeedArray, SeedSchema};
pub use termination::{RankFlag, TerminationDetector, WorkStatus};
pub use tracker::{ParticleTracker, RankReport, RankStats};
