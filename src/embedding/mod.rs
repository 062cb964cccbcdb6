//! Embedding & Indexing
//!
//! Architecture:
//! - EmbeddingProvider trait for abstraction over remote, local and offline backends
//! - EmbeddingChain for ordered provider fallback
//! - EmbeddingIndex for exact cosine search with crash-safe persistence
//! - LocalLexicalIndex for TF-IDF search without any network dependency

mod chain;
mod hashing;
mod lexical_index;
#[cfg(feature = "local-embeddings")]
mod local;
mod provider;
mod remote;
pub(crate) mod tokenizer;
mod vector_index;

pub use chain::{DegradationEvent, EmbeddingChain};
pub use hashing::HashingEmbedder;
pub use lexical_index::{LexicalHit, LocalLexicalIndex, MIN_SIMILARITY, SNIPPET_MAX_CHARS};
#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedProvider;
pub use provider::{Embedded, EmbeddingError, EmbeddingProvider, MAX_BATCH_SIZE};
pub use remote::OpenAiEmbedder;
pub use vector_index::{
    AddReport, EmbeddingIndex, IndexEmbedder, IndexError, IndexHealth, PreparedChunks,
    QuotaPolicy, SearchHit,
};

use crate::config::EmbeddingConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// Build the provider chain named in `config.providers`
///
/// Providers that fail to initialize (missing API key, unknown name) are
/// skipped with a warning; the chain fails only if none remain.
pub fn build_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let mut providers: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();

    for name in &config.providers {
        let provider: Result<Arc<dyn EmbeddingProvider>, EmbeddingError> = match name.as_str() {
            "openai" => OpenAiEmbedder::from_config(config)
                .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>),
            "hashing" => HashingEmbedder::new(config.dimension)
                .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>),
            #[cfg(feature = "local-embeddings")]
            "local" => FastEmbedProvider::new(&config.local_model)
                .map(|p| Arc::new(p) as Arc<dyn EmbeddingProvider>),
            other => Err(EmbeddingError::InitializationError(format!(
                "unknown embedding provider '{}'",
                other
            ))),
        };

        match provider {
            Ok(p) => {
                info!(
                    "Embedding provider ready: {} ({}D)",
                    p.model_name(),
                    p.dimension()
                );
                providers.push(p);
            }
            Err(e) => warn!("Skipping embedding provider '{}': {}", name, e),
        }
    }

    if providers.len() == 1 {
        return Ok(providers.remove(0));
    }
    Ok(Arc::new(EmbeddingChain::new(providers)?))
}
