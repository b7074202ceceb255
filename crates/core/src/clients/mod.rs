pub mod dashscope;
pub mod openai;

pub use dashscope::DashScopeRerankClient;
pub use openai::{OpenAiEmbeddingClient, OpenAiGenerationClient};

use crate::error::ConfigError;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn http_client() -> Result<reqwest::Client, ConfigError> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

fn endpoint_url(endpoint: &str, path: &str) -> Result<String, ConfigError> {
    let base = Url::parse(endpoint)?;
    let base = base.as_str().trim_end_matches('/');
    if path.is_empty() {
        Ok(base.to_string())
    } else {
        Ok(format!("{base}/{}", path.trim_start_matches('/')))
    }
}
