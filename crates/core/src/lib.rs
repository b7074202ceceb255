pub mod chunking;
pub mod clients;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod rerank;
pub mod retriever;
pub mod traits;

pub use chunking::{sentence_boundaries, split_text, ChunkingConfig};
pub use clients::{DashScopeRerankClient, OpenAiEmbeddingClient, OpenAiGenerationClient};
pub use embeddings::{CharacterNgramEmbedder, EmbeddingIndexer};
pub use error::{
    ConfigError, EmbeddingError, ExtractionError, GenerationError, IndexError, IngestError,
    PipelineError, RerankError,
};
pub use extractor::{FileExtractor, SUPPORTED_EXTENSIONS};
pub use generation::build_prompt;
pub use index::{artifact_paths, IndexEntry, VectorIndex};
pub use ingest::{
    discover_documents, process_document, read_chunk_dump, write_chunk_dump, ChunkStream,
    CorpusIngestor, IngestionReport, SkippedDocument,
};
pub use models::{
    Chunk, ChunkMetadata, Document, DocumentFormat, ProviderConfig, RagConfig, RerankedResult,
    SearchResult,
};
pub use normalize::normalize_text;
pub use orchestrator::{GroundedAnswer, IndexSummary, PipelineStage, QueryOutcome, RagPipeline};
pub use rerank::Reranker;
pub use retriever::Retriever;
pub use traits::{DocumentExtractor, EmbeddingClient, GenerationClient, RerankClient, ScoredDocument};
