use crate::embeddings::EmbeddingIndexer;
use crate::error::IndexError;
use crate::index::VectorIndex;
use crate::models::SearchResult;
use crate::traits::EmbeddingClient;
use tracing::debug;

pub struct Retriever<'a, E> {
    indexer: &'a EmbeddingIndexer<E>,
    index: &'a VectorIndex,
}

impl<'a, E: EmbeddingClient> Retriever<'a, E> {
    pub fn new(indexer: &'a EmbeddingIndexer<E>, index: &'a VectorIndex) -> Self {
        Self { indexer, index }
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, IndexError> {
        match self.embed_query(query).await {
            Some(query_vector) => self.search_embedded(&query_vector, k),
            None => Ok(Vec::new()),
        }
    }

    pub async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        self.indexer.embed_one(query).await
    }

    pub fn search_embedded(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        let results = self.index.search(query_vector, k)?;
        debug!(k, hits = results.len(), "retrieved candidates");
        Ok(results)
    }
}
