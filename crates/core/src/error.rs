use crate::orchestrator::PipelineStage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid chunking config: chunk_overlap {chunk_overlap} must be smaller than chunk_size {chunk_size}")]
    InvalidChunking {
        chunk_size: usize,
        chunk_overlap: usize,
    },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("http client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    DocxParse(String),

    #[error("extraction panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("worker pool setup failed: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding count {actual} doesn't match batch size {expected}")]
    CountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("input length mismatch: {vectors} vectors, {texts} texts, {metadata} metadata entries")]
    LengthMismatch {
        vectors: usize,
        texts: usize,
        metadata: usize,
    },

    #[error("no valid vectors to build an index from")]
    Empty,

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index artifact missing: {0}")]
    MissingArtifact(PathBuf),

    #[error("index artifacts do not belong together: {0}")]
    ArtifactMismatch(PathBuf),

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("invalid chunk metadata: {0}")]
    InvalidMetadata(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binary encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("no index loaded; build or load one first")]
    IndexNotLoaded,

    #[error("query failed during {stage}: {source}")]
    QueryFailed {
        stage: PipelineStage,
        #[source]
        source: Box<PipelineError>,
    },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
