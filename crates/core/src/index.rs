//! Exact nearest-neighbour index over chunk embeddings.
//!
//! On disk an index is two files sharing a base path: `<base>.index` holds the
//! vectors in a versioned binary layout, `<base>.data` holds the chunk texts and
//! metadata in the same order plus the SHA-256 of the `.index` file. Loading
//! checks the digest, so a `.data` file is never paired with another build's
//! vectors.

use crate::error::IndexError;
use crate::models::{ChunkMetadata, SearchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

const INDEX_MAGIC: [u8; 4] = *b"RGIX";
const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    magic: [u8; 4],
    version: u32,
    dimension: u64,
    count: u64,
    vectors: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct SideTable {
    index_sha256: String,
    built_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<f32>,
    entries: Vec<IndexEntry>,
    built_at: DateTime<Utc>,
}

impl VectorIndex {
    pub fn build(
        dimension: usize,
        vectors: Vec<Option<Vec<f32>>>,
        texts: Vec<String>,
        metadata: Vec<ChunkMetadata>,
    ) -> Result<Self, IndexError> {
        if vectors.len() != texts.len() || vectors.len() != metadata.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                texts: texts.len(),
                metadata: metadata.len(),
            });
        }

        let mut flat = Vec::new();
        let mut entries = Vec::new();
        for ((vector, text), metadata) in vectors.into_iter().zip(texts).zip(metadata) {
            let Some(vector) = vector else {
                continue;
            };
            if vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            metadata.validate()?;
            flat.extend_from_slice(&vector);
            entries.push(IndexEntry { text, metadata });
        }

        if entries.is_empty() {
            return Err(IndexError::Empty);
        }

        Ok(Self {
            dimension,
            vectors: flat,
            entries,
            built_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    fn vector(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|position| (position, squared_l2(query, self.vector(position))))
            .collect();
        scored.sort_by(|left, right| left.1.total_cmp(&right.1));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        Ok(self
            .nearest(query, k)?
            .into_iter()
            .map(|(position, distance)| {
                let entry = &self.entries[position];
                SearchResult {
                    text: entry.text.clone(),
                    similarity: 1.0 / (1.0 + distance),
                    metadata: entry.metadata.clone(),
                }
            })
            .collect())
    }

    pub fn save(&self, base: &Path) -> Result<(), IndexError> {
        let (index_path, data_path) = artifact_paths(base);
        if let Some(parent) = base.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let index_bytes = bincode::serialize(&IndexFile {
            magic: INDEX_MAGIC,
            version: INDEX_FORMAT_VERSION,
            dimension: self.dimension as u64,
            count: self.len() as u64,
            vectors: self.vectors.clone(),
        })?;
        let side_table = serde_json::to_vec(&SideTable {
            index_sha256: sha256_hex(&index_bytes),
            built_at: self.built_at,
            entries: self.entries.clone(),
        })?;

        write_replacing(&index_path, &index_bytes)?;
        write_replacing(&data_path, &side_table)?;
        Ok(())
    }

    pub fn load(base: &Path) -> Result<Self, IndexError> {
        let (index_path, data_path) = artifact_paths(base);
        for path in [&index_path, &data_path] {
            if !path.is_file() {
                return Err(IndexError::MissingArtifact(path.clone()));
            }
        }

        let index_bytes = fs::read(&index_path)?;
        let side_table: SideTable = serde_json::from_slice(&fs::read(&data_path)?)?;
        if side_table.index_sha256 != sha256_hex(&index_bytes) {
            return Err(IndexError::ArtifactMismatch(data_path));
        }

        let file: IndexFile = bincode::deserialize(&index_bytes)?;
        if file.magic != INDEX_MAGIC {
            return Err(IndexError::Corrupt(format!(
                "{} is not a vector index file",
                index_path.display()
            )));
        }
        if file.version != INDEX_FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index format version {}",
                file.version
            )));
        }

        let dimension = usize::try_from(file.dimension)
            .map_err(|_| IndexError::Corrupt(format!("dimension {} out of range", file.dimension)))?;
        let count = usize::try_from(file.count)
            .map_err(|_| IndexError::Corrupt(format!("count {} out of range", file.count)))?;
        if dimension == 0 || count == 0 {
            return Err(IndexError::Corrupt("index has no vectors".to_string()));
        }
        if file.vectors.len() != dimension.saturating_mul(count) {
            return Err(IndexError::Corrupt(format!(
                "expected {} floats for {count} vectors of dimension {dimension}, found {}",
                dimension.saturating_mul(count),
                file.vectors.len()
            )));
        }
        if side_table.entries.len() != count {
            return Err(IndexError::LengthMismatch {
                vectors: count,
                texts: side_table.entries.len(),
                metadata: side_table.entries.len(),
            });
        }
        for entry in &side_table.entries {
            entry.metadata.validate()?;
        }

        Ok(Self {
            dimension,
            vectors: file.vectors,
            entries: side_table.entries,
            built_at: side_table.built_at,
        })
    }
}

pub fn artifact_paths(base: &Path) -> (PathBuf, PathBuf) {
    (with_suffix(base, ".index"), with_suffix(base, ".data"))
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn write_replacing(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let staging = with_suffix(path, ".tmp");
    fs::write(&staging, bytes)?;
    fs::rename(&staging, path)?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let diff = a - b;
            diff * diff
        })
        .sum()
}
