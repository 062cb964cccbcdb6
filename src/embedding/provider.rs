/// Embedding provider trait and error taxonomy
use async_trait::async_trait;
use thiserror::Error;

/// Upper bound on texts sent to an embedding backend in one request.
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    /// The provider accepted the request but the account is out of quota.
    #[error("Embedding quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Credentials were rejected. Retrying cannot help.
    #[error("Embedding provider rejected credentials: {0}")]
    Auth(String),

    /// Timeouts, 5xx responses and rate limiting.
    #[error("Transient embedding failure: {0}")]
    Transient(String),

    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// Whether the same request may succeed if sent again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, EmbeddingError::QuotaExceeded(_))
    }
}

/// Vectors together with the provider that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub vectors: Vec<Vec<f32>>,
    /// Model that actually answered
    pub model: String,
    /// Why the primary model was bypassed, if it was
    pub fallback_cause: Option<EmbeddingError>,
}

/// Trait for embedding providers
///
/// Allows abstraction over different embedding backends (remote API, local
/// model, offline hashing). Implementations must return exactly one vector
/// per input text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts
    ///
    /// Implementations split the input into requests of at most
    /// [`max_batch_size`](Self::max_batch_size) items.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Like [`embed_batch`](Self::embed_batch), reporting which model answered
    ///
    /// Single-model providers always answer as their primary model.
    async fn embed_batch_traced(&self, texts: &[String]) -> Result<Embedded, EmbeddingError> {
        Ok(Embedded {
            vectors: self.embed_batch(texts).await?,
            model: self.model_name().to_string(),
            fallback_cause: None,
        })
    }

    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Model whose vector space the index is built in
    fn primary_model(&self) -> &str {
        self.model_name()
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }
}

/// Check that a provider response lines up with the request
pub(crate) fn verify_batch(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::GenerationError(format!(
            "Embedding count mismatch: expected {}, got {}",
            expected_count,
            vectors.len()
        )));
    }

    for vector in vectors {
        if vector.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
    }

    Ok(())
}
