//! Generation provider abstraction

use super::prompt::Prompt;
use super::retry::{classify, ErrorClass};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider initialization failed: {0}")]
    Initialization(String),

    /// Upstream failure; the message is classified by substring
    #[error("{0}")]
    Request(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// Whether another attempt against the same provider may succeed
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Initialization(_) => ErrorClass::NonRetryable,
            ProviderError::Request(message) => classify(message),
            ProviderError::EmptyResponse(_) | ProviderError::Timeout(_) => ErrorClass::Retryable,
        }
    }
}

/// Chat-style text generation backend
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Name used in logs and generation outcomes
    fn name(&self) -> &str;

    /// One completion request; no retries
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}

/// Read a provider's API key from the environment
pub(crate) fn api_key_from_env(var: &str) -> Result<String, ProviderError> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(ProviderError::Initialization(format!(
            "environment variable {} is not set",
            var
        ))),
    }
}

/// Turn a non-success HTTP response into a classifiable error
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    ProviderError::Request(format!("{} {}", status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            ProviderError::Request("503 Service Unavailable".to_string()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            ProviderError::Request("401 invalid_api_key".to_string()).class(),
            ErrorClass::NonRetryable
        );
        assert_eq!(
            ProviderError::EmptyResponse("openai".to_string()).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            ProviderError::Initialization("no key".to_string()).class(),
            ErrorClass::NonRetryable
        );
    }

    #[test]
    fn test_status_error_carries_code() {
        let err = status_error(reqwest::StatusCode::FORBIDDEN, "permission denied");
        assert_eq!(err.to_string(), "403 permission denied");
        assert_eq!(err.class(), ErrorClass::NonRetryable);
    }

    #[test]
    fn test_missing_key() {
        assert!(api_key_from_env("LECTERN_TEST_GENERATION_KEY_NEVER_SET").is_err());
    }
}
