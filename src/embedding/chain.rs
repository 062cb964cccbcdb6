//! Fallback chain over embedding providers.
//!
//! Providers are tried in priority order. A failing provider is logged and
//! the next one is asked; the first success wins. Vectors from a fallback
//! live in a different space than the primary's, so every answer carries the
//! model that produced it and each fallback is recorded as a degradation
//! event.

use super::provider::{Embedded, EmbeddingError, EmbeddingProvider, MAX_BATCH_SIZE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// A batch served by a fallback because the primary provider failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationEvent {
    pub failure: String,
    pub fallback_used: String,
    pub timestamp: DateTime<Utc>,
}

pub struct EmbeddingChain {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    name: String,
    events: Mutex<Vec<DegradationEvent>>,
}

impl EmbeddingChain {
    /// Create a chain from providers in priority order.
    ///
    /// All providers must agree on dimension, since their vectors end up in
    /// the same index.
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Result<Self, EmbeddingError> {
        let first = providers.first().ok_or_else(|| {
            EmbeddingError::InitializationError("embedding chain has no providers".to_string())
        })?;
        let dimension = first.dimension();

        if let Some(odd) = providers.iter().find(|p| p.dimension() != dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: odd.dimension(),
            });
        }

        let name = providers
            .iter()
            .map(|p| p.model_name())
            .collect::<Vec<_>>()
            .join(" -> ");

        Ok(Self {
            providers,
            name,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Take the degradation events recorded so far
    pub fn drain_events(&self) -> Vec<DegradationEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn record(&self, failure: &EmbeddingError, fallback_used: &str) {
        let event = DegradationEvent {
            failure: failure.to_string(),
            fallback_used: fallback_used.to_string(),
            timestamp: Utc::now(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingChain {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(self.embed_batch_traced(texts).await?.vectors)
    }

    async fn embed_batch_traced(&self, texts: &[String]) -> Result<Embedded, EmbeddingError> {
        let mut first_error: Option<EmbeddingError> = None;
        let mut last_error = None;
        let mut saw_quota = false;

        for provider in &self.providers {
            match provider.embed_batch_traced(texts).await {
                Ok(embedded) => {
                    let fallback_cause = first_error.or(embedded.fallback_cause);
                    if let Some(cause) = &fallback_cause {
                        warn!(
                            provider = provider.model_name(),
                            "Embedded {} texts with fallback provider",
                            texts.len()
                        );
                        self.record(cause, provider.model_name());
                    }
                    return Ok(Embedded {
                        vectors: embedded.vectors,
                        model: embedded.model,
                        fallback_cause,
                    });
                }
                Err(e) => {
                    warn!(
                        provider = provider.model_name(),
                        error = %e,
                        "embedding provider failed, trying next in chain"
                    );
                    saw_quota |= e.is_quota();
                    if first_error.is_none() {
                        first_error = Some(e.clone());
                    }
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(EmbeddingError::QuotaExceeded(msg)) => Err(EmbeddingError::QuotaExceeded(msg)),
            Some(_) if saw_quota => Err(EmbeddingError::QuotaExceeded(
                "all embedding providers failed; quota exhausted upstream".to_string(),
            )),
            Some(e) => Err(e),
            None => Err(EmbeddingError::InitializationError(
                "embedding chain has no providers".to_string(),
            )),
        }
    }

    fn dimension(&self) -> usize {
        self.providers.first().map(|p| p.dimension()).unwrap_or(0)
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn primary_model(&self) -> &str {
        self.providers
            .first()
            .map(|p| p.primary_model())
            .unwrap_or(self.name.as_str())
    }

    fn max_batch_size(&self) -> usize {
        self.providers
            .iter()
            .map(|p| p.max_batch_size())
            .min()
            .unwrap_or(MAX_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    struct Failing(EmbeddingError);

    #[async_trait]
    impl EmbeddingProvider for Failing {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(self.0.clone())
        }

        fn dimension(&self) -> usize {
            16
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let chain = EmbeddingChain::new(vec![
            Arc::new(Failing(EmbeddingError::Transient("503".into()))),
            Arc::new(HashingEmbedder::new(16).unwrap()),
        ])
        .unwrap();

        let vectors = chain.embed_batch(&["hello world".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 16);
        assert_eq!(chain.model_name(), "failing -> hashing");
        assert_eq!(chain.primary_model(), "failing");
    }

    #[tokio::test]
    async fn test_fallback_answer_is_traced_and_recorded() {
        let chain = EmbeddingChain::new(vec![
            Arc::new(Failing(EmbeddingError::QuotaExceeded("insufficient_quota".into()))),
            Arc::new(HashingEmbedder::new(16).unwrap()),
        ])
        .unwrap();

        let embedded = chain
            .embed_batch_traced(&["hello".to_string(), "world".to_string()])
            .await
            .unwrap();
        assert_eq!(embedded.vectors.len(), 2);
        assert_eq!(embedded.model, "hashing");
        assert!(embedded.fallback_cause.unwrap().is_quota());

        let events = chain.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fallback_used, "hashing");
        assert!(chain.drain_events().is_empty());
    }

    #[tokio::test]
    async fn test_primary_answer_is_not_a_fallback() {
        let chain = EmbeddingChain::new(vec![
            Arc::new(HashingEmbedder::new(16).unwrap()),
            Arc::new(Failing(EmbeddingError::Transient("503".into()))),
        ])
        .unwrap();

        let embedded = chain.embed_batch_traced(&["hello".to_string()]).await.unwrap();
        assert_eq!(embedded.model, "hashing");
        assert_eq!(embedded.fallback_cause, None);
        assert!(chain.drain_events().is_empty());
    }

    #[tokio::test]
    async fn test_quota_reported_when_everything_fails() {
        let chain = EmbeddingChain::new(vec![
            Arc::new(Failing(EmbeddingError::QuotaExceeded("insufficient_quota".into()))),
            Arc::new(Failing(EmbeddingError::Auth("401".into()))),
        ])
        .unwrap();

        let err = chain.embed_batch(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_quota());
    }

    #[tokio::test]
    async fn test_last_error_when_no_quota() {
        let chain = EmbeddingChain::new(vec![Arc::new(Failing(EmbeddingError::Auth(
            "401".into(),
        )))])
        .unwrap();

        let err = chain.embed_batch(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Auth(_)));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let result = EmbeddingChain::new(vec![
            Arc::new(HashingEmbedder::new(16).unwrap()),
            Arc::new(HashingEmbedder::new(32).unwrap()),
        ]);
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 16,
                actual: 32
            })
        ));
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(EmbeddingChain::new(Vec::new()).is_err());
    }
}
