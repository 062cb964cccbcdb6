//! Cascade over retrieval tiers

use crate::config::RetrievalConfig;
use crate::corpus::Corpus;
use crate::embedding::{EmbeddingIndex, SNIPPET_MAX_CHARS};
use crate::retrieval::{
    deduplicate_by_document, KeywordTier, LexicalTier, RetrievalError, RetrievalTier,
    ScoredChunk, SessionScope, SourceAttribution, TierKind, TierOutcome, VectorTier,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Chunks accepted for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    /// Tier that accepted the results, `None` when every tier came up empty
    pub tier: Option<TierKind>,
    /// Every accepted chunk, best first
    pub chunks: Vec<ScoredChunk>,
    /// Best chunk per document
    pub sources: Vec<SourceAttribution>,
}

impl Retrieval {
    fn accepted(tier: TierKind, chunks: Vec<ScoredChunk>) -> Self {
        let sources = deduplicate_by_document(chunks.clone())
            .iter()
            .map(|chunk| SourceAttribution::from_chunk(chunk, SNIPPET_MAX_CHARS))
            .collect();
        Self {
            tier: Some(tier),
            chunks,
            sources,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Accepted chunk texts joined for a generation prompt
    pub fn context(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Tries each tier in order until one returns `Found`
pub struct RetrievalOrchestrator {
    tiers: Vec<Box<dyn RetrievalTier>>,
    max_k: usize,
}

impl RetrievalOrchestrator {
    /// Standard vector, lexical, keyword cascade over shared state
    pub fn new(
        index: Arc<RwLock<EmbeddingIndex>>,
        corpus: Arc<RwLock<Corpus>>,
        config: &RetrievalConfig,
    ) -> Self {
        let tiers: Vec<Box<dyn RetrievalTier>> = vec![
            Box::new(VectorTier::new(
                index,
                corpus.clone(),
                config.vector_min_score,
                config.trust_degraded_index,
            )),
            Box::new(LexicalTier::new(corpus.clone(), config.lexical_min_score)),
            Box::new(KeywordTier::new(
                corpus,
                config.keyword_chunks_per_document,
                config.keyword_max_chunks,
            )),
        ];
        Self::with_tiers(tiers, config.max_k)
    }

    pub fn with_tiers(tiers: Vec<Box<dyn RetrievalTier>>, max_k: usize) -> Self {
        Self { tiers, max_k }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        scope: &SessionScope,
        k: usize,
    ) -> Result<Retrieval, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        if k == 0 {
            return Err(RetrievalError::ZeroLimit);
        }
        if k > self.max_k {
            return Err(RetrievalError::LimitTooLarge { k, max: self.max_k });
        }

        if scope.is_empty() {
            debug!("Empty scope, skipping retrieval");
            return Ok(Retrieval::default());
        }

        for tier in &self.tiers {
            match tier.search(query, scope, k).await {
                Ok(TierOutcome::Found(chunks)) => {
                    info!("{} tier accepted {} chunks", tier.kind(), chunks.len());
                    return Ok(Retrieval::accepted(tier.kind(), chunks));
                }
                Ok(TierOutcome::Empty(reason)) => {
                    debug!("{} tier empty: {}", tier.kind(), reason);
                }
                Err(e) => {
                    warn!("{} tier failed, falling through: {}", tier.kind(), e);
                }
            }
        }

        info!("No tier produced results for scope of {} documents", scope.len());
        Ok(Retrieval::default())
    }
}
