use crate::embeddings::EmbeddingIndexer;
use crate::error::{ConfigError, IndexError, PipelineError, Result};
use crate::generation::build_prompt;
use crate::index::VectorIndex;
use crate::ingest::{read_chunk_dump, CorpusIngestor, SkippedDocument};
use crate::models::{Chunk, RagConfig, RerankedResult, SearchResult};
use crate::rerank::Reranker;
use crate::retriever::Retriever;
use crate::traits::{EmbeddingClient, GenerationClient, RerankClient};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Idle,
    Embedding,
    IndexedSearch,
    Reranking,
    ReadyForGeneration,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Embedding => "embedding",
            Self::IndexedSearch => "indexed search",
            Self::Reranking => "reranking",
            Self::ReadyForGeneration => "ready for generation",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct QueryLifecycle {
    stages: Vec<PipelineStage>,
}

impl QueryLifecycle {
    fn start() -> Self {
        Self {
            stages: vec![PipelineStage::Idle],
        }
    }

    fn current(&self) -> PipelineStage {
        self.stages
            .last()
            .copied()
            .unwrap_or(PipelineStage::Idle)
    }

    fn advance(&mut self, next: PipelineStage) {
        debug!(from = %self.current(), to = %next, "query stage");
        self.stages.push(next);
    }

    fn fail(&mut self, error: PipelineError) -> PipelineError {
        let stage = self.current();
        warn!(stage = %stage, reason = %error, "query failed");
        self.stages.push(PipelineStage::Failed);
        PipelineError::QueryFailed {
            stage,
            source: Box::new(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query: String,
    pub stages: Vec<PipelineStage>,
    pub retrieved: Vec<SearchResult>,
    pub reranked: Vec<RerankedResult>,
    /// False when the reranker returned nothing and `contexts` follow the
    /// retrieval order instead.
    pub rerank_applied: bool,
    pub contexts: Vec<String>,
}

impl QueryOutcome {
    pub fn stage(&self) -> PipelineStage {
        self.stages
            .last()
            .copied()
            .unwrap_or(PipelineStage::Idle)
    }
}

#[derive(Debug, Clone)]
pub struct GroundedAnswer {
    pub outcome: QueryOutcome,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub processed_files: usize,
    pub skipped_files: Vec<SkippedDocument>,
    pub chunks_total: usize,
    pub chunks_indexed: usize,
    pub chunks_without_embedding: usize,
}

/// Queries take `&self`; building or loading an index takes `&mut self`, so the
/// index is never swapped under an in-flight query.
pub struct RagPipeline<E, R, G> {
    config: RagConfig,
    indexer: EmbeddingIndexer<E>,
    reranker: Reranker<R>,
    generator: G,
    index: Option<Arc<VectorIndex>>,
}

impl<E, R, G> RagPipeline<E, R, G>
where
    E: EmbeddingClient,
    R: RerankClient,
    G: GenerationClient,
{
    pub fn new(config: RagConfig, embedder: E, reranker: R, generator: G) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            indexer: EmbeddingIndexer::new(embedder, &config)?,
            reranker: Reranker::new(reranker),
            generator,
            index: None,
            config,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index(&self) -> Option<Arc<VectorIndex>> {
        self.index.clone()
    }

    pub async fn ingest_and_index(
        &mut self,
        ingestor: &CorpusIngestor,
        directory: &Path,
    ) -> Result<IndexSummary> {
        let report = ingestor.ingest(directory)?.finish();
        if !report.skipped_files.is_empty() {
            warn!(
                skipped = report.skipped_files.len(),
                directory = %directory.display(),
                "some documents were skipped"
            );
        }

        let mut summary = self.index_chunks(report.chunks).await?;
        summary.processed_files = report.processed_files;
        summary.skipped_files = report.skipped_files;
        Ok(summary)
    }

    pub async fn index_chunk_dump(&mut self, dump: &Path) -> Result<IndexSummary> {
        let source_path = dump.to_string_lossy().to_string();
        let chunks = read_chunk_dump(dump)?
            .into_iter()
            .enumerate()
            .map(|(sequence, text)| Chunk {
                text,
                source_path: source_path.clone(),
                sequence,
            })
            .collect();
        self.index_chunks(chunks).await
    }

    pub async fn index_chunks(&mut self, chunks: Vec<Chunk>) -> Result<IndexSummary> {
        let metadata = chunks.iter().map(Chunk::metadata).collect();
        let texts: Vec<String> = chunks.into_iter().map(|chunk| chunk.text).collect();
        let chunks_total = texts.len();

        let vectors = self.indexer.embed_batch(&texts).await;
        let chunks_without_embedding = vectors.iter().filter(|vector| vector.is_none()).count();
        if chunks_without_embedding > 0 {
            warn!(
                missing = chunks_without_embedding,
                total = chunks_total,
                "chunks without embeddings are left out of the index"
            );
        }

        let index = self.indexer.build_index(vectors, texts, metadata)?;
        let chunks_indexed = index.len();
        self.index = Some(Arc::new(index));

        Ok(IndexSummary {
            chunks_total,
            chunks_indexed,
            chunks_without_embedding,
            ..IndexSummary::default()
        })
    }

    pub fn save_index(&self, base: &Path) -> Result<()> {
        let index = self.index.as_ref().ok_or(PipelineError::IndexNotLoaded)?;
        index.save(base)?;
        info!(path = %base.display(), entries = index.len(), "saved index");
        Ok(())
    }

    pub fn load_index(&mut self, base: &Path) -> Result<()> {
        let index = VectorIndex::load(base)?;
        if index.dimension() != self.indexer.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.indexer.dimension(),
                actual: index.dimension(),
            }
            .into());
        }
        info!(path = %base.display(), entries = index.len(), "loaded index");
        self.index = Some(Arc::new(index));
        Ok(())
    }

    pub async fn query(&self, query: &str) -> Result<QueryOutcome> {
        let mut lifecycle = QueryLifecycle::start();
        let Some(index) = self.index.clone() else {
            return Err(lifecycle.fail(PipelineError::IndexNotLoaded));
        };
        let retriever = Retriever::new(&self.indexer, index.as_ref());

        lifecycle.advance(PipelineStage::Embedding);
        let query_vector = retriever.embed_query(query).await;

        lifecycle.advance(PipelineStage::IndexedSearch);
        let retrieved = match query_vector {
            Some(vector) => retriever
                .search_embedded(&vector, self.config.retrieval_top_k)
                .map_err(|error| lifecycle.fail(error.into()))?,
            None => Vec::new(),
        };

        lifecycle.advance(PipelineStage::Reranking);
        let reranked = self
            .reranker
            .rerank_results(query, &retrieved, self.config.rerank_top_k)
            .await;
        let rerank_applied = !reranked.is_empty();

        let contexts: Vec<String> = if rerank_applied {
            reranked
                .iter()
                .take(self.config.context_top_k)
                .map(|result| result.text.clone())
                .collect()
        } else {
            if !retrieved.is_empty() {
                warn!("rerank unavailable; using retrieval order");
            }
            retrieved
                .iter()
                .take(self.config.context_top_k)
                .map(|result| result.text.clone())
                .collect()
        };

        lifecycle.advance(PipelineStage::ReadyForGeneration);
        Ok(QueryOutcome {
            query: query.to_string(),
            stages: lifecycle.stages,
            retrieved,
            reranked,
            rerank_applied,
            contexts,
        })
    }

    pub async fn answer(&self, query: &str) -> Result<GroundedAnswer> {
        let outcome = self.query(query).await?;
        if outcome.contexts.is_empty() {
            info!(query, "no context retrieved; skipping generation");
            return Ok(GroundedAnswer {
                outcome,
                answer: None,
            });
        }

        let prompt = build_prompt(query, &outcome.contexts);
        let answer = self.generator.generate(&prompt).await.map_err(|error| {
            PipelineError::QueryFailed {
                stage: PipelineStage::ReadyForGeneration,
                source: Box::new(error.into()),
            }
        })?;

        Ok(GroundedAnswer {
            outcome,
            answer: Some(answer),
        })
    }
}
