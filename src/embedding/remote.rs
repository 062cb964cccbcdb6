//! OpenAI-compatible remote embedding client

use super::provider::{verify_batch, EmbeddingError, EmbeddingProvider, MAX_BATCH_SIZE};
use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Embeddings client for `/embeddings` endpoints that speak the OpenAI wire format.
///
/// Transient failures are retried with exponential backoff; quota and
/// credential failures are surfaced immediately with their own error kinds.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::InitializationError(
                "missing embedding API key".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(EmbeddingError::InitializationError(
                "missing embedding model name".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| EmbeddingError::InitializationError("invalid API key".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
            max_retries: max_retries.max(1),
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        })
    }

    /// Build a client from configuration, reading the key from the configured env var
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            EmbeddingError::InitializationError(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;

        Self::new(
            &api_key,
            &config.base_url,
            &config.model,
            config.dimension,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
            config.batch_size,
        )
    }

    async fn request_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
            };

            let result = match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
                            EmbeddingError::GenerationError(format!(
                                "failed to parse embedding response: {}",
                                e
                            ))
                        })?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
                    }
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    classify_status(status, &body)
                }
                Err(err) => classify_transport(&err),
            };

            if result.is_retryable() && attempt + 1 < self.max_retries {
                attempt += 1;
                let delay = retry_backoff(attempt);
                warn!(
                    "Embedding request failed ({}), retrying in {:?} (attempt {}/{})",
                    result,
                    delay,
                    attempt + 1,
                    self.max_retries
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(result);
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            debug!("Embedding batch of {} texts with {}", chunk.len(), self.model);
            let vectors = self.request_batch(chunk).await?;
            verify_batch(&vectors, chunk.len(), self.dimension)?;
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Map a non-success HTTP response onto the embedding error taxonomy
pub(crate) fn classify_status(status: StatusCode, body: &str) -> EmbeddingError {
    let detail = format!("{}: {}", status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EmbeddingError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS if is_quota_body(body) => {
            EmbeddingError::QuotaExceeded(detail)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            EmbeddingError::Transient(detail)
        }
        s if s.is_server_error() => EmbeddingError::Transient(detail),
        _ => EmbeddingError::GenerationError(detail),
    }
}

fn classify_transport(err: &reqwest::Error) -> EmbeddingError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        EmbeddingError::Transient(err.to_string())
    } else {
        EmbeddingError::GenerationError(err.to_string())
    }
}

fn is_quota_body(body: &str) -> bool {
    let body = body.to_lowercase();
    body.contains("insufficient_quota") || body.contains("quota")
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
