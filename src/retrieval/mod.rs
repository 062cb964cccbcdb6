//! Tiered retrieval
//!
//! Queries cascade through vector search, a local TF-IDF index and plain
//! keyword matching, stopping at the first tier that accepts anything.

mod deduplication;
mod orchestrator;
mod provenance;
mod scope;
mod tiers;

pub(crate) use tiers::index_document;

pub use deduplication::deduplicate_by_document;
pub use orchestrator::{Retrieval, RetrievalOrchestrator};
pub use provenance::{ScoredChunk, SourceAttribution, TierKind};
pub use scope::SessionScope;
pub use tiers::{
    KeywordTier, LexicalTier, RetrievalTier, TierError, TierOutcome, VectorTier,
};

use thiserror::Error;

/// Caller mistakes; backend failures never surface here
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("Query text cannot be empty")]
    EmptyQuery,

    #[error("k must be greater than 0")]
    ZeroLimit,

    #[error("k = {k} exceeds the maximum of {max}")]
    LimitTooLarge { k: usize, max: usize },
}
