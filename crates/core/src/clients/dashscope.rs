use super::{endpoint_url, http_client};
use crate::error::{ConfigError, RerankError};
use crate::models::ProviderConfig;
use crate::traits::{RerankClient, ScoredDocument};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const BACKEND: &str = "dashscope";

pub const DEFAULT_RERANK_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/rerank/text-rerank/text-rerank";
pub const DEFAULT_RERANK_MODEL: &str = "gte-rerank";

pub struct DashScopeRerankClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl DashScopeRerankClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client()?,
            url: endpoint_url(&config.endpoint, "")?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl RerankClient for DashScopeRerankClient {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<ScoredDocument>, RerankError> {
        let mut request = self.client.post(&self.url).json(&json!({
            "model": self.model,
            "input": {
                "query": query,
                "documents": documents,
            },
            "parameters": {
                "top_n": top_n,
                "return_documents": true,
            },
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RerankError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_rerank_response(&parsed, documents)
    }
}

fn parse_rerank_response(parsed: &Value, documents: &[String]) -> Result<Vec<ScoredDocument>, RerankError> {
    let results = parsed
        .pointer("/output/results")
        .and_then(Value::as_array)
        .ok_or_else(|| RerankError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response has no output.results".to_string(),
        })?;

    results
        .iter()
        .map(|item| {
            let score = item
                .pointer("/relevance_score")
                .and_then(Value::as_f64)
                .ok_or_else(|| RerankError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: "result without relevance_score".to_string(),
                })? as f32;

            // Prefer the index so the text is byte-identical to what was sent.
            let index = item
                .pointer("/index")
                .and_then(Value::as_u64)
                .map(|index| index as usize)
                .filter(|index| *index < documents.len());
            let text = index
                .and_then(|index| documents.get(index).cloned())
                .or_else(|| {
                    item.pointer("/document/text")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .ok_or_else(|| RerankError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: "result references no known document".to_string(),
                })?;

            Ok(ScoredDocument { text, score, index })
        })
        .collect()
}
