//! Axis-aligned bounding boxes of rank subdomains.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// Closed axis-aligned box. An empty box contains nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// Serialized size of one box: six `f64`.
pub const BOX_BYTES: usize = 6 * 8;

impl BoundingBox {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, point: [f64; 3]) -> bool {
        (0..3).all(|axis| self.min[axis] <= point[axis] && point[axis] <= self.max[axis])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.min
            .iter()
            .chain(&self.max)
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BOX_BYTES {
            return Err(TraceError::malformed(
                "bounding box",
                format!("expected {} bytes, got {}", BOX_BYTES, bytes.len()),
            ));
        }
        let mut values = [0.0; 6];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *value = f64::from_le_bytes(raw);
        }
        Ok(Self {
            min: [values[0], values[1], values[2]],
            max: [values[3], values[4], values[5]],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_closed() {
        let b = BoundingBox::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        assert!(b.contains([0.0, 0.5, 1.0]));
        assert!(!b.contains([1.0001, 0.5, 0.5]));
    }

    #[test]
    fn test_bytes_roundtrip_and_length_check() {
        let b = BoundingBox::new([-1.0, 2.0, 3.5], [4.0, 5.0, 6.25]);
        let bytes = b.to_bytes();
        assert_eq!(bytes.len(), BOX_BYTES);
        assert_eq!(BoundingBox::from_bytes(&bytes).unwrap(), b);
        assert!(BoundingBox::from_bytes(&bytes[..40]).is_err());
    }
}
