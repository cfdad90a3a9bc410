//! Exact inner-product index over unit-normalized vectors.
//!
//! File layout, all integers little endian:
//!
//! ```text
//! b"PRAGIDX1" | u32 header_len | header (JSON) | count x (u64 id | dimensions x f32)
//! ```

use crate::error::IndexError;
use crate::store::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

const MAGIC: &[u8; 8] = b"PRAGIDX1";
const PREFIX_LEN: usize = MAGIC.len() + 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexHeader {
    pub dimensions: usize,
    pub count: usize,
    pub model: String,
    pub build_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the `metadata.json` written alongside this index.
    pub metadata_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimensions: usize,
    model: String,
    ids: Vec<u64>,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimensions: usize, model: impl Into<String>) -> Self {
        Self {
            dimensions,
            model: model.into(),
            ids: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    /// Normalizes and appends `vector`, returning its position.
    pub fn add(&mut self, vector: &[f32]) -> Result<u64, IndexError> {
        if self.dimensions == 0 || vector.len() != self.dimensions {
            return Err(IndexError::Dimension {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        let id = self.ids.len() as u64;
        let start = self.data.len();
        self.data.extend_from_slice(vector);
        normalize(&mut self.data[start..]);
        self.ids.push(id);
        Ok(id)
    }

    pub fn add_all<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<(), IndexError> {
        for vector in vectors {
            self.add(vector.as_ref())?;
        }
        Ok(())
    }

    /// Returns up to `k` `(position, score)` pairs by descending inner product.
    /// Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if query.len() != self.dimensions {
            return Err(IndexError::Dimension {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, vector)| (position, dot(vector, &query)))
            .collect();

        scored.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn save(&self, path: &Path, metadata_sha256: Option<String>) -> Result<IndexHeader, IndexError> {
        let header = IndexHeader {
            dimensions: self.dimensions,
            count: self.len(),
            model: self.model.clone(),
            build_id: Uuid::new_v4(),
            created_at: Utc::now(),
            metadata_sha256,
        };

        let header_bytes = serde_json::to_vec(&header)?;
        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| IndexError::format(path, "header too large"))?;

        let mut bytes = Vec::with_capacity(
            PREFIX_LEN + header_bytes.len() + self.len() * record_len(self.dimensions),
        );
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&header_len.to_le_bytes());
        bytes.extend_from_slice(&header_bytes);

        for (id, vector) in self.ids.iter().zip(self.data.chunks_exact(self.dimensions.max(1))) {
            bytes.extend_from_slice(&id.to_le_bytes());
            for value in vector {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }

        atomic_write(path, &bytes)?;
        Ok(header)
    }

    pub fn load(path: &Path) -> Result<(Self, IndexHeader), IndexError> {
        let bytes = fs::read(path).map_err(|error| IndexError::io(path, error))?;
        Self::from_bytes(&bytes, path)
    }

    fn from_bytes(bytes: &[u8], path: &Path) -> Result<(Self, IndexHeader), IndexError> {
        if bytes.len() < PREFIX_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(IndexError::format(path, "missing index magic"));
        }

        let header_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let body_start = PREFIX_LEN + header_len;
        if bytes.len() < body_start {
            return Err(IndexError::format(path, "truncated header"));
        }

        let header: IndexHeader = serde_json::from_slice(&bytes[PREFIX_LEN..body_start])
            .map_err(|error| IndexError::format(path, format!("bad header: {error}")))?;

        if header.dimensions == 0 && header.count > 0 {
            return Err(IndexError::format(path, "zero-dimension vectors"));
        }

        let body = &bytes[body_start..];
        let expected = header
            .count
            .checked_mul(record_len(header.dimensions))
            .ok_or_else(|| IndexError::format(path, "record count overflows"))?;
        if body.len() != expected {
            return Err(IndexError::format(
                path,
                format!(
                    "expected {expected} bytes for {} vectors, found {}",
                    header.count,
                    body.len()
                ),
            ));
        }

        let mut index = FlatIndex::new(header.dimensions, header.model.clone());
        index.ids.reserve(header.count);
        index.data.reserve(header.count * header.dimensions);

        for (position, record) in body.chunks_exact(record_len(header.dimensions).max(1)).enumerate() {
            let mut id_bytes = [0u8; 8];
            id_bytes.copy_from_slice(&record[..8]);
            let id = u64::from_le_bytes(id_bytes);
            if id != position as u64 {
                return Err(IndexError::format(
                    path,
                    format!("record {position} carries id {id}"),
                ));
            }

            index.ids.push(id);
            index.data.extend(
                record[8..]
                    .chunks_exact(4)
                    .map(|value| f32::from_le_bytes([value[0], value[1], value[2], value[3]])),
            );
        }

        Ok((index, header))
    }
}

/// Scales `vector` to unit L2 norm. All-zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

fn record_len(dimensions: usize) -> usize {
    8 + dimensions * 4
}
