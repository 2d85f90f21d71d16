//! Integration tests for distributed tracing over the in-process fabric.
//!
//! Tests the full flow of:
//! - seeding on every rank, including ranks without seeds
//! - migration between slabs and periodic wrap-around
//! - global termination and outcome reconciliation, including a single
//!   particle handed from one rank to the next
//! - the TraceMonitor actor summarizing rank reports

use std::collections::{HashMap, HashSet};

use acton_reactive::prelude::*;
use tokio::sync::mpsc;
use tokio::time::Duration;

use lagrangian_kernel::actors::TraceMonitor;
use lagrangian_kernel::messages::{RankFinished, RankProgress};
use lagrangian_kernel::{
    BoxLocator, Integrator, Locator, ParticleRecord, RankInput, RankStats, Seed, SeedData,
    Termination, TraceOutcome, TraceRun, TraceSummary, TracerConfig,
};
use lagrangian_runner::results::particle_fates;
use lagrangian_runner::ScenarioConfig;

async fn trace(scenario: ScenarioConfig) -> TraceOutcome {
    tokio::time::timeout(
        Duration::from_secs(60),
        scenario.trace_run(TracerConfig::default()).unwrap().run(),
    )
    .await
    .expect("trace did not terminate")
    .unwrap()
}

/// Every particle either terminated on some rank or left the domain.
fn assert_conserved(summary: &TraceSummary) {
    assert_eq!(
        summary.terminated() + summary.exited(),
        summary.seeds() + summary.spawned(),
        "particles lost or duplicated: {:?}",
        summary
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_ranks_conserve_particles() {
    let scenario = ScenarioConfig::default();
    let outcome = trace(scenario.clone()).await;
    let summary = &outcome.summary;

    assert_eq!(summary.ranks.len(), 4);
    assert_eq!(summary.seeds(), (scenario.ranks * scenario.seeds_per_rank) as u64);
    assert_eq!(summary.discarded(), 0);
    assert!(summary.migrations() > 0, "no particle crossed a slab");
    assert_conserved(summary);

    let accepted: u64 = summary.ranks.iter().map(|s| s.accepted).sum();
    let forwarded: u64 = summary.ranks.iter().map(|s| s.seeds_forwarded as u64).sum();
    assert_eq!(accepted, summary.migrations() + forwarded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_particle_ids_are_globally_unique() {
    let outcome = trace(ScenarioConfig::default()).await;

    let mut seen = HashSet::new();
    for report in &outcome.reports {
        for &(id, _) in &report.outcomes {
            assert!(seen.insert(id), "particle {} terminated twice", id);
        }
    }

    // One fate per particle, however many ranks it visited
    let fates = particle_fates(&outcome);
    assert_eq!(
        fates.len() as u64,
        outcome.summary.seeds() + outcome.summary.spawned()
    );
    assert!(fates.iter().any(|f| f.ranks.len() > 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconciled_paths_carry_final_outcome() {
    let outcome = trace(ScenarioConfig::default()).await;

    let mut finals = HashMap::new();
    for report in &outcome.reports {
        for &(id, termination) in &report.outcomes {
            finals.insert(id, termination);
        }
    }

    let mut crossing = 0;
    for report in &outcome.reports {
        assert_eq!(report.paths.open_count(), 0);
        for segment in report.paths.segments() {
            assert_ne!(segment.termination, Termination::Continuing);
            match finals.get(&segment.particle_id) {
                Some(&termination) => assert_eq!(segment.termination, termination),
                None => assert_eq!(segment.termination, Termination::OutOfDomain),
            }
        }
        crossing += report.stats.reconciled;
    }
    assert!(crossing > 0, "no segment needed reconciliation");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_single_rank_runs_without_peers() {
    let scenario = ScenarioConfig {
        ranks: 1,
        ..ScenarioConfig::default()
    };
    let outcome = trace(scenario).await;
    let stats = &outcome.summary.ranks[0];

    assert_eq!(stats.seeds_local, 25);
    assert_eq!(stats.migrated, 0);
    assert_eq!(stats.reconciled, 0);
    assert_conserved(&outcome.summary);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seedless_ranks_adopt_schema() {
    let scenario = ScenarioConfig {
        seedless_ranks: vec![0, 2],
        ..ScenarioConfig::default()
    };
    let outcome = trace(scenario).await;

    for rank in [0, 2] {
        let stats = &outcome.summary.ranks[rank];
        assert_eq!(stats.seeds_local + stats.seeds_forwarded, 0);
    }
    // Seeds from other ranks still arrive with their diameter and velocity
    let carried = outcome
        .reports
        .iter()
        .filter(|r| r.rank == 0 || r.rank == 2)
        .map(|r| r.stats.accepted)
        .sum::<u64>();
    assert!(carried > 0);
    assert_conserved(&outcome.summary);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_periodic_wrap_keeps_particles() {
    let scenario = ScenarioConfig {
        ranks: 3,
        periodic: true,
        ..ScenarioConfig::default()
    };
    let outcome = trace(scenario).await;
    let summary = &outcome.summary;

    assert_conserved(summary);
    // A wrapped particle is offered to both other ranks; the middle one drops it
    assert!(summary.discarded() > 0, "no particle wrapped around");

    let accepted: u64 = summary.ranks.iter().map(|s| s.accepted).sum();
    let forwarded: u64 = summary.ranks.iter().map(|s| s.seeds_forwarded as u64).sum();
    assert_eq!(accepted, summary.migrations() + forwarded);
    assert_eq!(summary.ranks[1].discarded, summary.discarded());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_split_particles_are_tracked_to_the_end() {
    let scenario = ScenarioConfig {
        ranks: 2,
        split_at_step: Some(2),
        ..ScenarioConfig::default()
    };
    let outcome = trace(scenario).await;
    let summary = &outcome.summary;

    assert!(summary.spawned() > 0);
    assert_conserved(summary);

    let fates = particle_fates(&outcome);
    let children: Vec<_> = fates.iter().filter(|f| f.parent_id != f.particle_id).collect();
    assert_eq!(children.len() as u64, summary.spawned());
    for child in children {
        assert!(fates.iter().any(|f| f.particle_id == child.parent_id));
    }
}

/// Moves +x by a fixed step and converges past `stop_at`.
struct Drift {
    dx: f64,
    stop_at: f64,
    domain: BoxLocator,
}

impl Integrator for Drift {
    fn step(&mut self, particle: &mut ParticleRecord) -> Termination {
        particle.next_variables.copy_from_slice(&particle.variables);
        particle.next_variables[0] += self.dx;
        particle.advance(self.dx);
        if particle.position()[0] >= self.stop_at {
            Termination::Converged
        } else if !self.domain.contains(particle.position()) {
            Termination::OutOfDomain
        } else {
            Termination::Continuing
        }
    }
}

fn slab(rank: usize) -> (Drift, BoxLocator) {
    let x = rank as f64;
    let domain = BoxLocator::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0]);
    let drift = Drift {
        dx: 0.25,
        stop_at: 1.5,
        domain,
    };
    (drift, domain)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crossing_particle_converges_on_next_rank() {
    let mut config = TracerConfig::default();
    config.model.number_of_variables = 3;
    let seed = Seed {
        variables: vec![0.1, 0.5, 0.5],
        integration_time: 0.0,
        seed_data: SeedData::default(),
    };

    let (drift_0, slab_0) = slab(0);
    let (drift_1, slab_1) = slab(1);
    let outcome = tokio::time::timeout(
        Duration::from_secs(30),
        TraceRun::new(config)
            .add_rank(RankInput::new(vec![seed], drift_0, slab_0))
            .add_rank(RankInput::new(Vec::new(), drift_1, slab_1))
            .run(),
    )
    .await
    .expect("trace did not terminate")
    .unwrap();

    let (first, second) = (&outcome.reports[0], &outcome.reports[1]);
    assert_eq!(first.stats.migrated, 1);
    assert!(first.outcomes.is_empty());
    assert_eq!(second.stats.accepted, 1);
    assert_eq!(second.outcomes, vec![(0, Termination::Converged)]);

    // Rank 0 only saw the particle leave; reconciliation tells it how it ended.
    let segments: Vec<_> = first.paths.for_particle(0).collect();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].termination, Termination::Converged);
    assert_eq!(first.stats.reconciled, 1);
    assert_eq!(second.stats.reconciled, 0);

    let fates = particle_fates(&outcome);
    assert_eq!(fates.len(), 1);
    assert_eq!(fates[0].ranks, vec![0, 1]);
    assert_eq!(fates[0].termination, Termination::Converged);
}

#[tokio::test]
async fn test_monitor_summarizes_out_of_order_ranks() {
    let mut runtime = ActonApp::launch_async().await;
    let (tx, mut rx) = mpsc::channel(1);
    let monitor = TraceMonitor::new(3, tx).spawn(&mut runtime).await;

    monitor
        .send(RankProgress {
            rank: 1,
            steps: 500,
            queued: 4,
            migrated: 2,
            terminated: 7,
        })
        .await;
    for rank in [2, 0, 1] {
        monitor
            .send(RankFinished {
                stats: RankStats {
                    rank,
                    steps: 10 * (rank as u64 + 1),
                    converged: 1,
                    ..RankStats::default()
                },
            })
            .await;
    }

    let summary = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("monitor never summarized")
        .unwrap();
    assert_eq!(
        summary.ranks.iter().map(|s| s.rank).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(summary.steps(), 60);
    assert_eq!(summary.terminated(), 3);

    let _ = runtime.shutdown_all().await;
}
