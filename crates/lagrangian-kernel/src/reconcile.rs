//! Result reconciliation.
//!
//! A particle crossing several ranks leaves one path segment on each of
//! them, all but the last closed as `OutOfDomain`. Only the rank where it
//! stopped knows the true outcome, so every rank publishes its final
//! outcomes and patches its own provisional segments from the global table.

use std::collections::HashMap;

use tracing::debug;

use crate::comm::Communicator;
use crate::error::{Result, TraceError};
use crate::particle::{ParticleId, Termination};
use crate::paths::ParticlePaths;

const PAIR_BYTES: usize = 8 + 4;

fn encode_pairs(outcomes: &[(ParticleId, Termination)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(outcomes.len() * PAIR_BYTES);
    for &(id, termination) in outcomes {
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&termination.code().to_le_bytes());
    }
    buf
}

fn decode_pairs(bytes: &[u8]) -> Result<Vec<(ParticleId, Termination)>> {
    if bytes.len() % PAIR_BYTES != 0 {
        return Err(TraceError::malformed(
            "outcome table",
            format!("{} bytes is not a whole number of pairs", bytes.len()),
        ));
    }
    bytes
        .chunks_exact(PAIR_BYTES)
        .map(|chunk| {
            let mut id = [0u8; 8];
            let mut code = [0u8; 4];
            id.copy_from_slice(&chunk[..8]);
            code.copy_from_slice(&chunk[8..]);
            let code = i32::from_le_bytes(code);
            let termination = Termination::from_code(code).ok_or_else(|| {
                TraceError::malformed("outcome table", format!("unknown termination {}", code))
            })?;
            Ok((ParticleId::from_le_bytes(id), termination))
        })
        .collect()
}

/// Gather every rank's final outcomes and patch the provisional
/// `OutOfDomain` segments in `paths`. Collective.
///
/// Segments of particles that left the global domain keep `OutOfDomain`.
/// Returns the number of segments patched.
pub async fn reconcile_outcomes<C: Communicator>(
    comm: &C,
    outcomes: &[(ParticleId, Termination)],
    paths: &mut ParticlePaths,
) -> Result<usize> {
    comm.barrier().await?;

    let local: Vec<_> = outcomes
        .iter()
        .copied()
        .filter(|&(_, termination)| termination.is_final())
        .collect();
    let gathered = comm.all_gather(encode_pairs(&local)).await?;

    let mut table = HashMap::new();
    for bytes in &gathered {
        table.extend(decode_pairs(bytes)?);
    }

    let mut patched = 0;
    for segment in paths.segments_mut() {
        if segment.termination != Termination::OutOfDomain {
            continue;
        }
        if let Some(&termination) = table.get(&segment.particle_id) {
            segment.termination = termination;
            patched += 1;
        }
    }

    debug!(
        rank = comm.rank(),
        global_outcomes = table.len(),
        patched,
        "Reconciled path outcomes"
    );
    Ok(patched)
}
