use crate::models::{RerankedResult, SearchResult};
use crate::traits::{RerankClient, ScoredDocument};
use tracing::{debug, warn};

pub struct Reranker<R> {
    client: R,
}

impl<R: RerankClient> Reranker<R> {
    pub fn new(client: R) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &R {
        &self.client
    }

    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[String],
        top_k: usize,
    ) -> Vec<RerankedResult> {
        self.scored(query, candidates, top_k)
            .await
            .into_iter()
            .map(|document| RerankedResult {
                text: document.text,
                score: document.score,
                metadata: None,
            })
            .collect()
    }

    /// Like [`Reranker::rerank`], carrying each candidate's metadata over.
    /// Candidates are matched by the backend's index, or by text when it
    /// reports none; each candidate is claimed at most once.
    pub async fn rerank_results(
        &self,
        query: &str,
        results: &[SearchResult],
        top_k: usize,
    ) -> Vec<RerankedResult> {
        let candidates: Vec<String> = results.iter().map(|result| result.text.clone()).collect();
        let mut claimed = vec![false; results.len()];

        self.scored(query, &candidates, top_k)
            .await
            .into_iter()
            .map(|document| {
                let position = document
                    .index
                    .filter(|&index| {
                        !claimed.get(index).copied().unwrap_or(true)
                            && results[index].text == document.text
                    })
                    .or_else(|| {
                        results
                            .iter()
                            .enumerate()
                            .position(|(index, result)| !claimed[index] && result.text == document.text)
                    });
                if let Some(position) = position {
                    claimed[position] = true;
                }

                RerankedResult {
                    metadata: position.map(|position| results[position].metadata.clone()),
                    text: document.text,
                    score: document.score,
                }
            })
            .collect()
    }

    async fn scored(&self, query: &str, candidates: &[String], top_k: usize) -> Vec<ScoredDocument> {
        if candidates.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored = match self.client.rerank(query, candidates, top_k).await {
            Ok(scored) => scored,
            Err(error) => {
                warn!(candidates = candidates.len(), reason = %error, "rerank failed");
                return Vec::new();
            }
        };

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        debug!(candidates = candidates.len(), kept = scored.len(), "reranked candidates");
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RerankError;
    use crate::models::ChunkMetadata;
    use async_trait::async_trait;

    struct WordOverlapReranker;

    #[async_trait]
    impl RerankClient for WordOverlapReranker {
        async fn rerank(
            &self,
            query: &str,
            documents: &[String],
            _top_n: usize,
        ) -> Result<Vec<ScoredDocument>, RerankError> {
            Ok(documents
                .iter()
                .map(|document| ScoredDocument {
                    text: document.clone(),
                    score: query
                        .split_whitespace()
                        .filter(|word| document.contains(word))
                        .count() as f32,
                    index: None,
                })
                .collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl RerankClient for FailingReranker {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[String],
            _top_n: usize,
        ) -> Result<Vec<ScoredDocument>, RerankError> {
            Err(RerankError::BackendResponse {
                backend: "fake".to_string(),
                details: "500".to_string(),
            })
        }
    }

    fn candidates() -> Vec<String> {
        vec![
            "granite fox".to_string(),
            "quartz turtle".to_string(),
            "quartz fox".to_string(),
        ]
    }

    #[tokio::test]
    async fn rerank_order_replaces_input_order() {
        let results = Reranker::new(WordOverlapReranker)
            .rerank("quartz turtle", &candidates(), 5)
            .await;

        let texts: Vec<&str> = results.iter().map(|result| result.text.as_str()).collect();
        assert_eq!(texts, vec!["quartz turtle", "quartz fox", "granite fox"]);
    }

    #[tokio::test]
    async fn top_k_truncates() {
        let results = Reranker::new(WordOverlapReranker)
            .rerank("quartz turtle", &candidates(), 1)
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "quartz turtle");
    }

    #[tokio::test]
    async fn backend_failure_yields_empty_results() {
        let results = Reranker::new(FailingReranker)
            .rerank("quartz turtle", &candidates(), 5)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn metadata_follows_the_matching_candidate() {
        let search_results: Vec<SearchResult> = candidates()
            .into_iter()
            .enumerate()
            .map(|(chunk_id, text)| SearchResult {
                text,
                similarity: 0.5,
                metadata: ChunkMetadata::new("corpus.txt", chunk_id).expect("valid metadata"),
            })
            .collect();

        let results = Reranker::new(WordOverlapReranker)
            .rerank_results("quartz turtle", &search_results, 2)
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.as_ref().map(|meta| meta.chunk_id), Some(1));
        assert_eq!(results[1].metadata.as_ref().map(|meta| meta.chunk_id), Some(2));
    }

    struct ReversingReranker {
        report_index: bool,
    }

    #[async_trait]
    impl RerankClient for ReversingReranker {
        async fn rerank(
            &self,
            _query: &str,
            documents: &[String],
            _top_n: usize,
        ) -> Result<Vec<ScoredDocument>, RerankError> {
            Ok(documents
                .iter()
                .enumerate()
                .map(|(index, text)| ScoredDocument {
                    text: text.clone(),
                    score: index as f32,
                    index: self.report_index.then_some(index),
                })
                .collect())
        }
    }

    fn duplicated_boilerplate() -> Vec<SearchResult> {
        ["a.txt", "b.txt"]
            .into_iter()
            .map(|source| SearchResult {
                text: "All rights reserved".to_string(),
                similarity: 0.5,
                metadata: ChunkMetadata::new(source, 0).expect("valid metadata"),
            })
            .collect()
    }

    #[tokio::test]
    async fn identical_texts_keep_their_own_metadata() {
        let results = Reranker::new(ReversingReranker { report_index: true })
            .rerank_results("rights", &duplicated_boilerplate(), 5)
            .await;

        let sources: Vec<&str> = results
            .iter()
            .filter_map(|result| result.metadata.as_ref())
            .map(|meta| meta.source.as_str())
            .collect();
        assert_eq!(sources, vec!["b.txt", "a.txt"]);
    }

    #[tokio::test]
    async fn identical_texts_without_index_are_claimed_once_each() {
        let results = Reranker::new(ReversingReranker { report_index: false })
            .rerank_results("rights", &duplicated_boilerplate(), 5)
            .await;

        let mut sources: Vec<&str> = results
            .iter()
            .filter_map(|result| result.metadata.as_ref())
            .map(|meta| meta.source.as_str())
            .collect();
        sources.sort_unstable();
        assert_eq!(sources, vec!["a.txt", "b.txt"]);
    }
}
