//! `.zarray` shape/chunks parsing and row-major chunk-index linearization,
//! shared verbatim between the Parquet writer and the Parquet reader.

use crate::error::{KerchunkError, Result};

/// Per-array shape derived from a `.zarray` document: how many chunks exist
/// along each axis, and the total chunk count.
#[derive(Debug, Clone, PartialEq)]
pub struct ZarrArrayInfo {
    /// Number of chunks along each axis, outermost axis first.
    pub chunk_counts: Vec<u64>,
    pub total_chunks: u64,
}

impl ZarrArrayInfo {
    /// `shape` and `chunks` are the `.zarray` document's `shape` and
    /// `chunks` arrays (per-axis array length and per-axis chunk length).
    pub fn from_shape_and_chunks(array_key: &str, shape: &[u64], chunks: &[u64]) -> Result<Self> {
        if shape.len() != chunks.len() {
            return Err(KerchunkError::BadManifest(format!(
                "{array_key}: shape has {} dimensions but chunks has {}",
                shape.len(),
                chunks.len()
            )));
        }
        if shape.len() > 32 {
            return Err(KerchunkError::ArrayTooLarge(format!(
                "{array_key}: {} dimensions exceeds the 32-dimension limit",
                shape.len()
            )));
        }

        let mut chunk_counts = Vec::with_capacity(shape.len());
        let mut total: u64 = 1;
        for (i, (&dim, &chunk)) in shape.iter().zip(chunks.iter()).enumerate() {
            if chunk == 0 {
                return Err(KerchunkError::BadManifest(format!(
                    "{array_key}: chunk length is zero on axis {i}"
                )));
            }
            let count = dim.div_ceil(chunk).max(1);
            if total > u64::MAX / count.max(1) {
                return Err(KerchunkError::ArrayTooLarge(format!(
                    "{array_key}: total chunk count overflows u64"
                )));
            }
            total *= count;
            chunk_counts.push(count);
        }

        Ok(Self {
            chunk_counts,
            total_chunks: total,
        })
    }

    /// Row-major (last axis fastest) linearization of a per-axis chunk
    /// index tuple, e.g. `"3.1.0"` -> a single `u64`.
    pub fn linear_index(&self, indices: &[u64]) -> Result<u64> {
        // A 0-dimensional (scalar) array has no chunk_counts but, by Zarr
        // convention, still has exactly one chunk, keyed "0".
        if self.chunk_counts.is_empty() {
            return match indices {
                [0] => Ok(0),
                other => Err(KerchunkError::BadManifest(format!(
                    "scalar array chunk index must be exactly [0], got {other:?}"
                ))),
            };
        }
        if indices.len() != self.chunk_counts.len() {
            return Err(KerchunkError::BadManifest(format!(
                "chunk index has {} components, expected {}",
                indices.len(),
                self.chunk_counts.len()
            )));
        }
        let mut linear: u64 = 0;
        for (axis, (&idx, &count)) in indices.iter().zip(self.chunk_counts.iter()).enumerate() {
            if idx >= count {
                return Err(KerchunkError::BadManifest(format!(
                    "chunk index {idx} on axis {axis} is out of range (count {count})"
                )));
            }
            linear = linear
                .checked_mul(count)
                .and_then(|v| v.checked_add(idx))
                .ok_or_else(|| {
                    KerchunkError::ArrayTooLarge("linear chunk index overflows u64".to_string())
                })?;
        }
        Ok(linear)
    }

    /// Parses a dotted chunk-key suffix like `"3.1.0"` into per-axis indices.
    pub fn parse_dotted_index(suffix: &str) -> Result<Vec<u64>> {
        suffix
            .split('.')
            .map(|s| {
                s.parse::<u64>().map_err(|_| {
                    KerchunkError::BadManifest(format!("malformed chunk index component {s:?}"))
                })
            })
            .collect()
    }
}
