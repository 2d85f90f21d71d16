//! Results collection and output for scenario runs.
//!
//! Captures:
//! - the scenario and tracer configuration
//! - the aggregated per-rank statistics
//! - the final outcome of every particle
//! - optionally, the reconciled path segments of every rank

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lagrangian_kernel::{ParticleId, PathSegment, Termination, TraceOutcome, TraceSummary, TracerConfig};

use crate::scenario::ScenarioConfig;

/// Final fate of one particle, as seen after reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleFate {
    pub particle_id: ParticleId,
    pub seed_id: i64,
    pub parent_id: ParticleId,
    /// Ranks that emitted a path segment for it, in rank order
    pub ranks: Vec<usize>,
    pub termination: Termination,
}

/// Results from a single scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub scenario: ScenarioConfig,
    pub tracer: TracerConfig,
    pub summary: TraceSummary,
    pub particles: Vec<ParticleFate>,
    /// Path segments per rank, only when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<Vec<PathSegment>>>,
}

impl RunResults {
    pub fn from_outcome(
        outcome: &TraceOutcome,
        scenario: ScenarioConfig,
        tracer: TracerConfig,
        started_at: DateTime<Utc>,
        include_paths: bool,
    ) -> Self {
        let paths = include_paths.then(|| {
            outcome
                .reports
                .iter()
                .map(|r| r.paths.segments().to_vec())
                .collect()
        });

        Self {
            run_id: outcome.run_id,
            started_at,
            ended_at: Utc::now(),
            scenario,
            tracer,
            summary: outcome.summary.clone(),
            particles: particle_fates(outcome),
            paths,
        }
    }

    /// Particles per final outcome.
    pub fn outcome_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for fate in &self.particles {
            *counts.entry(format!("{:?}", fate.termination)).or_insert(0) += 1;
        }
        counts
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}

/// One fate per particle id.
///
/// After reconciliation every segment of a particle carries the same
/// outcome, so the last segment in rank order decides.
pub fn particle_fates(outcome: &TraceOutcome) -> Vec<ParticleFate> {
    let mut fates: BTreeMap<ParticleId, ParticleFate> = BTreeMap::new();
    for report in &outcome.reports {
        for segment in report.paths.segments() {
            let fate = fates.entry(segment.particle_id).or_insert_with(|| ParticleFate {
                particle_id: segment.particle_id,
                seed_id: segment.seed_id,
                parent_id: segment.parent_id,
                ranks: Vec::new(),
                termination: segment.termination,
            });
            if fate.ranks.last() != Some(&report.rank) {
                fate.ranks.push(report.rank);
            }
            fate.termination = segment.termination;
        }
    }
    fates.into_values().collect()
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}
