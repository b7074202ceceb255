use crate::error::{ConfigError, IndexError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Text,
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub source_path: PathBuf,
    pub raw_text: String,
    pub format: DocumentFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_path: String,
    pub sequence: usize,
}

impl Chunk {
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            source: self.source_path.clone(),
            chunk_id: self.sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkMetadata {
    pub source: String,
    pub chunk_id: usize,
}

impl ChunkMetadata {
    pub fn new(source: impl Into<String>, chunk_id: usize) -> Result<Self, IndexError> {
        let metadata = Self {
            source: source.into(),
            chunk_id,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.source.trim().is_empty() {
            return Err(IndexError::InvalidMetadata(format!(
                "chunk {} has an empty source",
                self.chunk_id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ChunkMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source={} chunk_id={}", self.source, self.chunk_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub similarity: f32,
    pub metadata: ChunkMetadata,
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "similarity={:.4} {}", self.similarity, self.metadata)?;
        write!(f, "{}", self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedResult {
    pub text: String,
    pub score: f32,
    pub metadata: Option<ChunkMetadata>,
}

impl fmt::Display for RerankedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "score={:.4}", self.score)?;
        if let Some(metadata) = &self.metadata {
            write!(f, " {metadata}")?;
        }
        write!(f, "\n{}", self.text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_batch_size: usize,
    pub dimension: usize,
    pub retrieval_top_k: usize,
    pub rerank_top_k: usize,
    pub context_top_k: usize,
    pub embedding_throttle_ms: u64,
    pub ingest_workers: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            embedding_batch_size: 10,
            dimension: 1_024,
            retrieval_top_k: 5,
            rerank_top_k: 5,
            context_top_k: 3,
            embedding_throttle_ms: 100,
            ingest_workers: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(4),
        }
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("chunk_size", self.chunk_size),
            ("embedding_batch_size", self.embedding_batch_size),
            ("dimension", self.dimension),
            ("retrieval_top_k", self.retrieval_top_k),
            ("rerank_top_k", self.rerank_top_k),
            ("context_top_k", self.context_top_k),
            ("ingest_workers", self.ingest_workers),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name));
            }
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            });
        }

        Ok(())
    }

    pub fn embedding_throttle(&self) -> Duration {
        Duration::from_millis(self.embedding_throttle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl ProviderConfig {
    pub fn from_env(prefix: &str, default_model: &str) -> Option<Self> {
        let endpoint = non_empty_env(&format!("{prefix}_ENDPOINT"))?;
        let api_key = non_empty_env(&format!("{prefix}_API_KEY"));
        let model =
            non_empty_env(&format!("{prefix}_MODEL")).unwrap_or_else(|| default_model.to_string());

        Some(Self {
            endpoint,
            api_key,
            model,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let value = value.trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        let config = RagConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunking {
                chunk_size: 100,
                chunk_overlap: 100
            })
        ));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let config = RagConfig {
            retrieval_top_k: 0,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroValue("retrieval_top_k"))
        ));
    }

    #[test]
    fn metadata_requires_a_source() {
        assert!(ChunkMetadata::new("", 3).is_err());
        let metadata = ChunkMetadata::new("notes.txt", 3).expect("valid metadata");
        assert_eq!(metadata.chunk_id, 3);
    }

    #[test]
    fn metadata_rejects_unknown_keys() {
        let parsed: Result<ChunkMetadata, _> =
            serde_json::from_str(r#"{"source":"a.txt","chunk_id":1,"page":4}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn format_is_detected_case_insensitively() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("A/B/Report.PDF")),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("notes.md")), None);
    }
}
