use crate::error::{EmbeddingError, ExtractionError, GenerationError, RerankError};
use async_trait::async_trait;
use std::path::Path;

pub trait DocumentExtractor: Send + Sync {
    fn supports(&self, path: &Path) -> bool;

    fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub text: String,
    pub score: f32,
    pub index: Option<usize>,
}

#[async_trait]
pub trait RerankClient: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<ScoredDocument>, RerankError>;
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[async_trait]
impl<T: EmbeddingClient + ?Sized> EmbeddingClient for Box<T> {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed(batch).await
    }
}

#[async_trait]
impl<T: RerankClient + ?Sized> RerankClient for Box<T> {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<ScoredDocument>, RerankError> {
        (**self).rerank(query, documents, top_n).await
    }
}

#[async_trait]
impl<T: GenerationClient + ?Sized> GenerationClient for Box<T> {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt).await
    }
}
