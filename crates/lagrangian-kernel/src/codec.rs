//! Fixed-stride binary encoding of a [`ParticleRecord`].
//!
//! Layout, little-endian, no padding:
//!
//! ```text
//! seed_id i64 | id i64 | parent_id i64 | n_var i32 | n_tracked i32 | steps i64
//! time f64 | prev_time f64 | user_flag i32 | insert_prev u8 | manual_shift u8
//! (prev[i], cur[i], next[i]) f64 for i in 0..n_var
//! prev_tracked[..] f64 | tracked[..] f64 | next_tracked[..] f64
//! one tuple of f64 per seed-data array
//! ```

use crate::error::{Result, TraceError};
use crate::particle::{ParticleRecord, SeedData};
use crate::schema::SeedSchema;

const INT: usize = 4;
const ID: usize = 8;
const DOUBLE: usize = 8;
const BOOL: usize = 1;

/// Encoder/decoder sized once from the agreed model and schema.
#[derive(Debug, Clone, PartialEq)]
pub struct WireCodec {
    number_of_variables: usize,
    number_of_tracked_user_data: usize,
    component_counts: Vec<usize>,
    stride: usize,
}

impl WireCodec {
    pub fn new(
        number_of_variables: usize,
        number_of_tracked_user_data: usize,
        schema: &SeedSchema,
    ) -> Self {
        let component_counts = schema.component_counts();
        let stride = 2 * INT
            + 2 * DOUBLE
            + 4 * ID
            + INT
            + 2 * BOOL
            + 3 * DOUBLE * number_of_variables
            + 3 * DOUBLE * number_of_tracked_user_data
            + component_counts.iter().sum::<usize>() * DOUBLE;
        Self {
            number_of_variables,
            number_of_tracked_user_data,
            component_counts,
            stride,
        }
    }

    /// Exact length of every encoded buffer.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Encode into a new buffer of exactly [`stride`](Self::stride) bytes.
    ///
    /// Fails if the record's shape does not match the codec.
    pub fn encode(&self, particle: &ParticleRecord) -> Result<Vec<u8>> {
        self.check_shape(particle)?;

        let mut buf = Vec::with_capacity(self.stride);
        buf.extend_from_slice(&particle.seed_id.to_le_bytes());
        buf.extend_from_slice(&particle.id.to_le_bytes());
        buf.extend_from_slice(&particle.parent_id.to_le_bytes());
        buf.extend_from_slice(&(self.number_of_variables as i32).to_le_bytes());
        buf.extend_from_slice(&(self.number_of_tracked_user_data as i32).to_le_bytes());
        buf.extend_from_slice(&particle.step_count.to_le_bytes());
        buf.extend_from_slice(&particle.integration_time.to_le_bytes());
        buf.extend_from_slice(&particle.prev_integration_time.to_le_bytes());
        buf.extend_from_slice(&particle.user_flag.to_le_bytes());
        buf.push(u8::from(particle.insert_previous_position));
        buf.push(u8::from(particle.manual_shift));

        for i in 0..self.number_of_variables {
            buf.extend_from_slice(&particle.prev_variables[i].to_le_bytes());
            buf.extend_from_slice(&particle.variables[i].to_le_bytes());
            buf.extend_from_slice(&particle.next_variables[i].to_le_bytes());
        }

        for value in particle
            .prev_tracked_user_data
            .iter()
            .chain(&particle.tracked_user_data)
            .chain(&particle.next_tracked_user_data)
        {
            buf.extend_from_slice(&value.to_le_bytes());
        }

        for value in particle.seed_data.tuples.iter().flatten() {
            buf.extend_from_slice(&value.to_le_bytes());
        }

        debug_assert_eq!(buf.len(), self.stride);
        Ok(buf)
    }

    /// Decode a buffer produced by a codec with the same configuration.
    pub fn decode(&self, buf: &[u8]) -> Result<ParticleRecord> {
        if buf.len() != self.stride {
            return Err(TraceError::malformed(
                "particle",
                format!("expected {} bytes, got {}", self.stride, buf.len()),
            ));
        }

        let mut reader = Reader { buf, pos: 0 };
        let seed_id = reader.i64();
        let id = reader.i64();
        let parent_id = reader.i64();
        let n_var = reader.i32();
        let n_tracked = reader.i32();
        if n_var as usize != self.number_of_variables
            || n_tracked as usize != self.number_of_tracked_user_data
        {
            return Err(TraceError::malformed(
                "particle",
                format!(
                    "sender has {} variables and {} tracked user data, expected {} and {}",
                    n_var, n_tracked, self.number_of_variables, self.number_of_tracked_user_data
                ),
            ));
        }
        let step_count = reader.i64();
        let integration_time = reader.f64();
        let prev_integration_time = reader.f64();
        let user_flag = reader.i32();
        let insert_previous_position = reader.flag();
        let manual_shift = reader.flag();

        let n = self.number_of_variables;
        let mut prev_variables = Vec::with_capacity(n);
        let mut variables = Vec::with_capacity(n);
        let mut next_variables = Vec::with_capacity(n);
        for _ in 0..n {
            prev_variables.push(reader.f64());
            variables.push(reader.f64());
            next_variables.push(reader.f64());
        }

        let t = self.number_of_tracked_user_data;
        let prev_tracked_user_data = reader.f64s(t);
        let tracked_user_data = reader.f64s(t);
        let next_tracked_user_data = reader.f64s(t);

        let tuples = self
            .component_counts
            .iter()
            .map(|&components| reader.f64s(components))
            .collect();

        Ok(ParticleRecord {
            id,
            seed_id,
            parent_id,
            step_count,
            integration_time,
            prev_integration_time,
            user_flag,
            prev_variables,
            variables,
            next_variables,
            prev_tracked_user_data,
            tracked_user_data,
            next_tracked_user_data,
            insert_previous_position,
            manual_shift,
            seed_data: SeedData::new(tuples),
        })
    }

    fn check_shape(&self, particle: &ParticleRecord) -> Result<()> {
        let n = self.number_of_variables;
        let t = self.number_of_tracked_user_data;
        let variables_ok = [
            &particle.prev_variables,
            &particle.variables,
            &particle.next_variables,
        ]
        .iter()
        .all(|v| v.len() == n);
        let tracked_ok = [
            &particle.prev_tracked_user_data,
            &particle.tracked_user_data,
            &particle.next_tracked_user_data,
        ]
        .iter()
        .all(|v| v.len() == t);
        let seed_ok = particle.seed_data.tuples.len() == self.component_counts.len()
            && particle
                .seed_data
                .tuples
                .iter()
                .zip(&self.component_counts)
                .all(|(tuple, &components)| tuple.len() == components);

        if variables_ok && tracked_ok && seed_ok {
            Ok(())
        } else {
            Err(TraceError::malformed(
                "particle",
                format!("particle {} does not match the wire layout", particle.id),
            ))
        }
    }
}

/// Cursor over a buffer whose length was already checked against the stride.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut raw = [0u8; N];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        raw
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }

    fn flag(&mut self) -> bool {
        self.take::<1>()[0] != 0
    }

    fn f64s(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.f64()).collect()
    }
}
