//! OpenAI-compatible embedding client for remote pipelines.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{preprocess_diff, Embedder, EmbedderError};
use crate::error::DetectorError;

/// Default OpenAI-compatible API base.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
/// Default embedding model identifier.
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
/// Hard deadline on each embedding call, in seconds.
pub const EMBED_DEADLINE_SECS: u64 = 30;
/// Default retry budget for transient failures.
pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Async embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
}

impl OpenAiEmbedder {
    /// Builds a new client. The API key and model name must be non-empty;
    /// violations surface as configuration errors.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        max_retries: usize,
    ) -> Result<Self, DetectorError> {
        if api_key.trim().is_empty() {
            return Err(DetectorError::Configuration(
                "missing embedding API key".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(DetectorError::Configuration(
                "missing embedding model name".to_string(),
            ));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| {
                DetectorError::Configuration("embedding API key is not a valid header".to_string())
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(EMBED_DEADLINE_SECS))
            .default_headers(headers)
            .build()
            .map_err(|err| {
                DetectorError::Configuration(format!("failed to build HTTP client: {err}"))
            })?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            max_retries: max_retries.max(1),
        })
    }

    /// Convenience constructor reading the adapter's environment:
    /// `OPENAI_API_KEY` (required), `REPOMEM_OPENAI_BASE`,
    /// `REPOMEM_OPENAI_MODEL` and `REPOMEM_OPENAI_DIMENSIONS`.
    pub fn from_env() -> Result<Self, DetectorError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| DetectorError::Configuration("OPENAI_API_KEY is not set".to_string()))?;
        let base_url =
            std::env::var("REPOMEM_OPENAI_BASE").unwrap_or_else(|_| DEFAULT_OPENAI_BASE.into());
        let model =
            std::env::var("REPOMEM_OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.into());
        let dimensions = std::env::var("REPOMEM_OPENAI_DIMENSIONS")
            .ok()
            .and_then(|raw| raw.parse().ok());
        Self::new(api_key, base_url, model, dimensions, DEFAULT_MAX_RETRIES)
    }

    /// Sends one input to the endpoint, retrying rate limits and server
    /// or transport failures with exponential backoff.
    async fn embed(&self, input: &str) -> Result<Vec<f32>, EmbedderError> {
        // The API rejects empty input; substitute a bare newline so empty
        // diffs still map to one deterministic vector.
        let payload = if input.is_empty() { "\n" } else { input };
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: payload,
                dimensions: self.dimensions,
            };
            let response = self.client.post(&self.endpoint).json(&request).send().await;
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp.json().await.map_err(|err| {
                            EmbedderError::Malformed(format!("undecodable body: {err}"))
                        })?;
                        let Some(entry) = parsed.data.into_iter().next() else {
                            return Err(EmbedderError::Malformed(
                                "response contained no embeddings".to_string(),
                            ));
                        };
                        if entry.embedding.is_empty() {
                            return Err(EmbedderError::Empty);
                        }
                        return Ok(entry.embedding);
                    }
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbedderError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_text(&self, input: &str) -> Result<Vec<f32>, EmbedderError> {
        self.embed(input).await
    }

    async fn embed_diff(&self, input: &str) -> Result<Vec<f32>, EmbedderError> {
        self.embed(&preprocess_diff(input)).await
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
