use crate::error::{ConfigError, EmbeddingError, IndexError};
use crate::index::VectorIndex;
use crate::models::{ChunkMetadata, RagConfig};
use crate::traits::EmbeddingClient;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingClient for CharacterNgramEmbedder {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(batch.iter().map(|text| self.embed_text(text)).collect())
    }
}

pub struct EmbeddingIndexer<E> {
    client: E,
    batch_size: usize,
    dimension: usize,
    throttle: Duration,
}

impl<E: EmbeddingClient> EmbeddingIndexer<E> {
    pub fn new(client: E, config: &RagConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            client,
            batch_size: config.embedding_batch_size,
            dimension: config.dimension,
            throttle: config.embedding_throttle(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn client(&self) -> &E {
        &self.client
    }

    /// Embeds `texts` batch by batch. A failed batch yields `None` for each of
    /// its texts; other batches are unaffected. Output is aligned with `texts`.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        let batch_count = texts.len().div_ceil(self.batch_size);

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            if batch_no > 0 && !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }

            match self.embed_checked(batch).await {
                Ok(vectors) => {
                    debug!(batch = batch_no + 1, of = batch_count, "embedded batch");
                    embeddings.extend(vectors.into_iter().map(Some));
                }
                Err(error) => {
                    warn!(
                        batch = batch_no + 1,
                        of = batch_count,
                        texts = batch.len(),
                        reason = %error,
                        "embedding batch failed; its chunks will be left out"
                    );
                    embeddings.extend(std::iter::repeat_with(|| None).take(batch.len()));
                }
            }
        }

        embeddings
    }

    pub async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        let batch = [text.to_string()];
        match self.embed_checked(&batch).await {
            Ok(mut vectors) => vectors.pop(),
            Err(error) => {
                warn!(reason = %error, "query embedding failed");
                None
            }
        }
    }

    pub fn build_index(
        &self,
        vectors: Vec<Option<Vec<f32>>>,
        texts: Vec<String>,
        metadata: Vec<ChunkMetadata>,
    ) -> Result<VectorIndex, IndexError> {
        let index = VectorIndex::build(self.dimension, vectors, texts, metadata)?;
        info!(entries = index.len(), dimension = self.dimension, "built vector index");
        Ok(index)
    }

    async fn embed_checked(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self.client.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: batch.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyEmbedder {
        calls: AtomicUsize,
        failing_calls: Vec<usize>,
        dimensions: usize,
    }

    #[async_trait]
    impl EmbeddingClient for FlakyEmbedder {
        async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_calls.contains(&call) {
                return Err(EmbeddingError::BackendResponse {
                    backend: "fake".to_string(),
                    details: "rate limited".to_string(),
                });
            }
            Ok(batch
                .iter()
                .map(|text| vec![text.len() as f32; self.dimensions])
                .collect())
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl EmbeddingClient for ShortEmbedder {
        async fn embed(&self, _batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![0.0; 4]])
        }
    }

    fn config(batch_size: usize, dimension: usize) -> RagConfig {
        RagConfig {
            embedding_batch_size: batch_size,
            dimension,
            embedding_throttle_ms: 0,
            ..RagConfig::default()
        }
    }

    fn texts(count: usize) -> Vec<String> {
        (0..count).map(|index| format!("text number {index}")).collect()
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::new(128);
        let first = embedder.embed_text("Hydraulic pressure and flow");
        let second = embedder.embed_text("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder::new(32);
        assert_eq!(embedder.embed_text("abc").len(), 32);
    }

    #[tokio::test]
    async fn failed_batch_marks_every_text_absent() {
        let embedder = FlakyEmbedder {
            calls: AtomicUsize::new(0),
            failing_calls: vec![0],
            dimensions: 4,
        };
        let indexer = EmbeddingIndexer::new(embedder, &config(3, 4)).expect("valid config");

        let embedded = indexer.embed_batch(&texts(3)).await;
        assert_eq!(embedded, vec![None, None, None]);
    }

    #[tokio::test]
    async fn failures_are_isolated_to_their_batch() {
        let embedder = FlakyEmbedder {
            calls: AtomicUsize::new(0),
            failing_calls: vec![1],
            dimensions: 4,
        };
        let indexer = EmbeddingIndexer::new(embedder, &config(2, 4)).expect("valid config");

        let embedded = indexer.embed_batch(&texts(5)).await;
        let present: Vec<bool> = embedded.iter().map(Option::is_some).collect();
        assert_eq!(present, vec![true, true, false, false, true]);
        assert_eq!(indexer.client().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn short_responses_count_as_failed_batches() {
        let indexer = EmbeddingIndexer::new(ShortEmbedder, &config(3, 4)).expect("valid config");
        let embedded = indexer.embed_batch(&texts(3)).await;
        assert!(embedded.iter().all(Option::is_none));
    }

    #[tokio::test]
    async fn absent_vectors_are_left_out_of_the_index() {
        let embedder = FlakyEmbedder {
            calls: AtomicUsize::new(0),
            failing_calls: vec![0],
            dimensions: 4,
        };
        let indexer = EmbeddingIndexer::new(embedder, &config(3, 4)).expect("valid config");
        let texts = texts(5);
        let metadata = (0..texts.len())
            .map(|chunk_id| ChunkMetadata::new("corpus.txt", chunk_id))
            .collect::<Result<Vec<_>, _>>()
            .expect("valid metadata");

        let vectors = indexer.embed_batch(&texts).await;
        let index = indexer
            .build_index(vectors, texts, metadata)
            .expect("two vectors survive");

        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[0].metadata.chunk_id, 3);
        assert_eq!(index.entries()[1].metadata.chunk_id, 4);
    }

    #[tokio::test]
    async fn query_embedding_failure_is_none() {
        let embedder = FlakyEmbedder {
            calls: AtomicUsize::new(0),
            failing_calls: vec![0],
            dimensions: 4,
        };
        let indexer = EmbeddingIndexer::new(embedder, &config(3, 4)).expect("valid config");
        assert!(indexer.embed_one("quartz turtle").await.is_none());
        assert_eq!(indexer.embed_one("quartz turtle").await, Some(vec![13.0; 4]));
    }
}
