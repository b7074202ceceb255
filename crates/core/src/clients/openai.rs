use super::{endpoint_url, http_client};
use crate::error::{ConfigError, EmbeddingError, GenerationError};
use crate::models::ProviderConfig;
use crate::traits::{EmbeddingClient, GenerationClient};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};

const BACKEND: &str = "openai-compatible";

pub struct OpenAiEmbeddingClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: &ProviderConfig, dimensions: Option<usize>) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client()?,
            url: endpoint_url(&config.endpoint, "embeddings")?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut body = json!({
            "model": self.model,
            "input": batch,
            "encoding_format": "float",
        });
        if let Some(dimensions) = self.dimensions {
            body["dimensions"] = json!(dimensions);
        }

        let response = authorized(self.client.post(&self.url), self.api_key.as_deref())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_embedding_response(&parsed, batch.len())
    }
}

fn parse_embedding_response(parsed: &Value, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let items = parsed
        .pointer("/data")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response has no data array".to_string(),
        })?;

    let mut indexed = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let index = item
            .pointer("/index")
            .and_then(Value::as_u64)
            .map(|index| index as usize)
            .unwrap_or(position);
        let vector = item
            .pointer("/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("item {position} has no embedding"),
            })?
            .iter()
            .map(|value| value.as_f64().map(|value| value as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| EmbeddingError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("item {position} has a non-numeric component"),
            })?;
        indexed.push((index, vector));
    }

    if indexed.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: indexed.len(),
        });
    }

    indexed.sort_by_key(|(index, _)| *index);
    if indexed
        .iter()
        .enumerate()
        .any(|(position, (index, _))| *index != position)
    {
        return Err(EmbeddingError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("embedding indices are not a permutation of 0..{expected}"),
        });
    }
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

pub struct OpenAiGenerationClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    top_p: f32,
}

impl OpenAiGenerationClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client()?,
            url: endpoint_url(&config.endpoint, "chat/completions")?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: 0.7,
            top_p: 0.8,
        })
    }

    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = authorized(self.client.post(&self.url), self.api_key.as_deref())
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": self.temperature,
                "top_p": self.top_p,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenerationError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_chat_response(&parsed)
    }
}

fn parse_chat_response(parsed: &Value) -> Result<String, GenerationError> {
    parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GenerationError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response has no message content".to_string(),
        })
}

fn authorized(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(api_key) => request.bearer_auth(api_key),
        None => request,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_returned_in_input_order() {
        let parsed = json!({
            "data": [
                { "index": 1, "embedding": [0.5, 0.25] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });

        let vectors = parse_embedding_response(&parsed, 2).expect("valid response");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.25]]);
    }

    #[test]
    fn short_embedding_response_is_a_count_mismatch() {
        let parsed = json!({ "data": [{ "index": 0, "embedding": [1.0] }] });
        assert!(matches!(
            parse_embedding_response(&parsed, 3),
            Err(EmbeddingError::CountMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn duplicate_or_out_of_range_indices_are_rejected() {
        for indices in [[0, 0], [0, 2]] {
            let parsed = json!({
                "data": [
                    { "index": indices[0], "embedding": [1.0] },
                    { "index": indices[1], "embedding": [0.5] }
                ]
            });
            assert!(matches!(
                parse_embedding_response(&parsed, 2),
                Err(EmbeddingError::BackendResponse { .. })
            ));
        }
    }

    #[test]
    fn missing_data_is_a_backend_error() {
        let parsed = json!({ "error": { "message": "quota" } });
        assert!(matches!(
            parse_embedding_response(&parsed, 1),
            Err(EmbeddingError::BackendResponse { .. })
        ));
    }

    #[test]
    fn chat_content_is_extracted() {
        let parsed = json!({
            "choices": [{ "message": { "role": "assistant", "content": "West Lake is in Hangzhou." } }]
        });
        assert_eq!(
            parse_chat_response(&parsed).expect("valid response"),
            "West Lake is in Hangzhou."
        );
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn client_rejects_malformed_endpoint() {
        let config = ProviderConfig {
            endpoint: "::not-a-url".to_string(),
            api_key: None,
            model: "text-embedding-v3".to_string(),
        };
        assert!(matches!(
            OpenAiEmbeddingClient::new(&config, None),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }
}
