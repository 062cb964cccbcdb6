//! Retrieval strategies tried in order by the orchestrator

mod keyword;
mod lexical;
mod vector;

pub use keyword::KeywordTier;
pub use lexical::LexicalTier;
pub(crate) use vector::index_document;
pub use vector::VectorTier;

use crate::embedding::IndexError;
use crate::retrieval::{ScoredChunk, SessionScope, TierKind};
use async_trait::async_trait;
use thiserror::Error;

/// What a tier produced for one query
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    /// Accepted chunks, best first
    Found(Vec<ScoredChunk>),
    /// Nothing acceptable; the reason is logged by the orchestrator
    Empty(String),
}

impl TierOutcome {
    pub fn empty(reason: impl Into<String>) -> Self {
        TierOutcome::Empty(reason.into())
    }

    /// `Found` when there is at least one chunk, `Empty(reason)` otherwise
    pub fn from_chunks(chunks: Vec<ScoredChunk>, reason: impl Into<String>) -> Self {
        if chunks.is_empty() {
            TierOutcome::Empty(reason.into())
        } else {
            TierOutcome::Found(chunks)
        }
    }
}

#[derive(Error, Debug)]
pub enum TierError {
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait RetrievalTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn search(
        &self,
        query: &str,
        scope: &SessionScope,
        k: usize,
    ) -> Result<TierOutcome, TierError>;
}
