//! Seed-data schema: the array layout every rank must share before any
//! particle crosses a rank boundary.
//!
//! Ranks without local seeds know nothing about the layout, so it is agreed
//! once at startup:
//!
//! ```text
//! all_gather(array count)           every rank learns the maximum
//! source = highest rank with max    sends SCHEMA (JSON) to every other rank
//! others adopt (zero arrays) or verify (same count)
//! all_gather(verdict)               any failure fails every rank
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::comm::{Communicator, Tag};
use crate::error::{Result, TraceError};
use crate::particle::SeedData;

/// Storage type of a seed-data array. Values always travel as `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Float64,
    Float32,
    Int64,
    Int32,
    UInt8,
}

/// One named seed-data array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedArray {
    pub name: String,
    pub scalar_type: ScalarType,
    /// One entry per component; the component count is its length.
    pub component_names: Vec<Option<String>>,
}

impl SeedArray {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType, components: usize) -> Self {
        Self {
            name: name.into(),
            scalar_type,
            component_names: vec![None; components],
        }
    }

    pub fn with_component_names(mut self, names: &[&str]) -> Self {
        self.component_names = names.iter().map(|n| Some((*n).to_string())).collect();
        self
    }

    pub fn components(&self) -> usize {
        self.component_names.len()
    }
}

/// Ordered list of seed-data arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedSchema {
    pub arrays: Vec<SeedArray>,
}

impl SeedSchema {
    pub fn new(arrays: Vec<SeedArray>) -> Self {
        Self { arrays }
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Total number of scalar components across all arrays.
    pub fn total_components(&self) -> usize {
        self.arrays.iter().map(SeedArray::components).sum()
    }

    pub fn component_counts(&self) -> Vec<usize> {
        self.arrays.iter().map(SeedArray::components).collect()
    }

    /// Check that `data` has one tuple of the right width per array.
    pub fn check_data(&self, data: &SeedData) -> Result<()> {
        if data.tuples.len() != self.arrays.len() {
            return Err(TraceError::InvalidConfig(format!(
                "seed data has {} arrays, schema has {}",
                data.tuples.len(),
                self.arrays.len()
            )));
        }
        for (array, tuple) in self.arrays.iter().zip(&data.tuples) {
            if tuple.len() != array.components() {
                return Err(TraceError::InvalidConfig(format!(
                    "seed array '{}' has {} components, expected {}",
                    array.name,
                    tuple.len(),
                    array.components()
                )));
            }
        }
        Ok(())
    }

    /// Compare a locally held schema with the reference one.
    ///
    /// Component names only need to agree where both sides name them.
    pub fn verify_against(&self, reference: &SeedSchema) -> std::result::Result<(), String> {
        if self.arrays.len() != reference.arrays.len() {
            return Err(format!(
                "{} arrays locally, {} on the schema source",
                self.arrays.len(),
                reference.arrays.len()
            ));
        }
        for (local, remote) in self.arrays.iter().zip(&reference.arrays) {
            if local.scalar_type != remote.scalar_type {
                return Err(format!(
                    "array '{}' is {:?} locally, {:?} on the schema source",
                    local.name, local.scalar_type, remote.scalar_type
                ));
            }
            if local.components() != remote.components() {
                return Err(format!(
                    "array '{}' has {} components locally, {} on the schema source",
                    local.name,
                    local.components(),
                    remote.components()
                ));
            }
            if local.name != remote.name {
                return Err(format!(
                    "array named '{}' locally, '{}' on the schema source",
                    local.name, remote.name
                ));
            }
            for (idx, (a, b)) in local
                .component_names
                .iter()
                .zip(&remote.component_names)
                .enumerate()
            {
                if let (Some(a), Some(b)) = (a, b) {
                    if a != b {
                        return Err(format!(
                            "array '{}' component {} is '{}' locally, '{}' on the schema source",
                            local.name, idx, a, b
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TraceError::malformed("schema", e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| TraceError::malformed("schema", e.to_string()))
    }
}

/// Agree on one seed-data schema across all ranks.
///
/// Must be called by every rank before the first particle exchange.
/// Returns the schema every rank will size its wire codec from.
pub async fn reconcile_schema<C: Communicator>(comm: &C, local: SeedSchema) -> Result<SeedSchema> {
    let rank = comm.rank();
    if comm.size() == 1 {
        return Ok(local);
    }

    let counts = comm
        .all_gather((local.arrays.len() as u64).to_le_bytes().to_vec())
        .await?
        .iter()
        .map(|bytes| decode_u64(bytes, "schema count"))
        .collect::<Result<Vec<_>>>()?;

    let max_count = counts.iter().copied().max().unwrap_or(0);
    let source = counts
        .iter()
        .rposition(|&count| count == max_count)
        .unwrap_or(0);

    let (schema, verdict) = if rank == source {
        let bytes = local.to_bytes()?;
        for dest in (0..comm.size()).filter(|&dest| dest != rank) {
            comm.isend(dest, Tag::Schema, bytes.clone()).wait().await?;
        }
        debug!(rank, arrays = local.arrays.len(), "Broadcast seed data schema");
        (local, Ok(()))
    } else {
        let reference = receive_schema(comm, source).await?;
        if local.is_empty() {
            debug!(rank, source, arrays = reference.arrays.len(), "Adopted seed data schema");
            (reference, Ok(()))
        } else {
            let verdict = local.verify_against(&reference);
            (local, verdict)
        }
    };

    if let Err(reason) = &verdict {
        warn!(rank, source, reason = %reason, "Seed data schema disagrees with schema source");
    }

    let verdicts = comm
        .all_gather(vec![u8::from(verdict.is_ok())])
        .await?;
    if let Some(bad_rank) = verdicts.iter().position(|v| v.first() != Some(&1)) {
        return Err(TraceError::SchemaMismatch {
            rank: bad_rank,
            reason: match verdict {
                Err(reason) if bad_rank == rank => reason,
                _ => format!("rank {} rejected the schema of rank {}", bad_rank, source),
            },
        });
    }

    info!(
        rank,
        arrays = schema.arrays.len(),
        components = schema.total_components(),
        "Seed data schema agreed"
    );
    Ok(schema)
}

async fn receive_schema<C: Communicator>(comm: &C, source: usize) -> Result<SeedSchema> {
    let mut buf = Vec::new();
    loop {
        if let Some(from) = comm.try_recv_into(Tag::Schema, &mut buf) {
            if from != source {
                return Err(TraceError::malformed(
                    "schema",
                    format!("expected schema from rank {}, got one from rank {}", source, from),
                ));
            }
            return SeedSchema::from_bytes(&buf);
        }
        tokio::task::yield_now().await;
    }
}

fn decode_u64(bytes: &[u8], what: &'static str) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| TraceError::malformed(what, format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalFabric;

    fn full_schema() -> SeedSchema {
        SeedSchema::new(vec![
            SeedArray::new("Diameter", ScalarType::Float64, 1),
            SeedArray::new("Velocity", ScalarType::Float32, 3).with_component_names(&["u", "v", "w"]),
        ])
    }

    async fn reconcile_all(schemas: Vec<SeedSchema>) -> Vec<Result<SeedSchema>> {
        let comms = LocalFabric::new(schemas.len(), 8).unwrap().into_comms();
        let tasks: Vec<_> = comms
            .into_iter()
            .zip(schemas)
            .map(|(comm, schema)| tokio::spawn(async move { reconcile_schema(&comm, schema).await }))
            .collect();
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        results
    }

    #[test]
    fn test_check_data_widths() {
        let schema = full_schema();
        assert_eq!(schema.total_components(), 4);
        assert!(schema
            .check_data(&SeedData::new(vec![vec![1.0], vec![0.0, 0.0, 0.0]]))
            .is_ok());
        assert!(schema.check_data(&SeedData::new(vec![vec![1.0]])).is_err());
        assert!(schema
            .check_data(&SeedData::new(vec![vec![1.0], vec![0.0, 0.0]]))
            .is_err());
    }

    #[test]
    fn test_verify_detects_each_disagreement() {
        let reference = full_schema();

        let mut renamed = full_schema();
        renamed.arrays[0].name = "Radius".to_string();
        assert!(renamed.verify_against(&reference).is_err());

        let mut retyped = full_schema();
        retyped.arrays[1].scalar_type = ScalarType::Float64;
        assert!(retyped.verify_against(&reference).is_err());

        let mut widened = full_schema();
        widened.arrays[0].component_names.push(None);
        assert!(widened.verify_against(&reference).is_err());

        let mut component = full_schema();
        component.arrays[1].component_names[2] = Some("z".to_string());
        assert!(component.verify_against(&reference).is_err());

        let mut unnamed = full_schema();
        unnamed.arrays[1].component_names = vec![None; 3];
        assert!(unnamed.verify_against(&reference).is_ok());
    }

    #[test]
    fn test_schema_json_roundtrip() {
        let schema = full_schema();
        let bytes = schema.to_bytes().unwrap();
        assert_eq!(SeedSchema::from_bytes(&bytes).unwrap(), schema);
        assert!(SeedSchema::from_bytes(b"not json").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_seedless_rank_adopts_schema() {
        let results = reconcile_all(vec![SeedSchema::default(), full_schema(), full_schema()]).await;
        for result in results {
            assert_eq!(result.unwrap(), full_schema());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mismatch_fails_every_rank() {
        let mut other = full_schema();
        other.arrays[0].name = "Radius".to_string();

        let results = reconcile_all(vec![other, full_schema()]).await;
        for result in results {
            assert!(matches!(result, Err(TraceError::SchemaMismatch { rank: 0, .. })));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_partial_schema_is_mismatch() {
        let partial = SeedSchema::new(vec![SeedArray::new("Diameter", ScalarType::Float64, 1)]);
        let results = reconcile_all(vec![full_schema(), partial]).await;
        for result in results {
            assert!(matches!(result, Err(TraceError::SchemaMismatch { rank: 1, .. })));
        }
    }
}
