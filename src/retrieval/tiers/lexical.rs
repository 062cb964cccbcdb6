use super::{RetrievalTier, TierError, TierOutcome};
use crate::corpus::Corpus;
use crate::embedding::LocalLexicalIndex;
use crate::retrieval::{ScoredChunk, SessionScope, TierKind};
use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Scopes whose lexical index is kept between queries
const CACHE_CAPACITY: usize = 32;

struct CachedIndex {
    revision: u64,
    index: LocalLexicalIndex,
}

/// TF-IDF search over the scoped documents' text
///
/// One index is built per scope and reused until the corpus changes.
pub struct LexicalTier {
    corpus: Arc<RwLock<Corpus>>,
    cache: Mutex<AHashMap<SessionScope, CachedIndex>>,
    min_score: f32,
}

impl LexicalTier {
    pub fn new(corpus: Arc<RwLock<Corpus>>, min_score: f32) -> Self {
        Self {
            corpus,
            cache: Mutex::new(AHashMap::new()),
            min_score,
        }
    }

    fn build(corpus: &Corpus, scope: &SessionScope) -> LocalLexicalIndex {
        let mut index = LocalLexicalIndex::new();
        index.add_documents(
            scope
                .iter()
                .filter_map(|id| corpus.document_text(id).map(|text| (id, text))),
        );
        index
    }
}

#[async_trait]
impl RetrievalTier for LexicalTier {
    fn kind(&self) -> TierKind {
        TierKind::Lexical
    }

    async fn search(
        &self,
        query: &str,
        scope: &SessionScope,
        k: usize,
    ) -> Result<TierOutcome, TierError> {
        let corpus = self.corpus.read().await;
        let revision = corpus.revision();

        let mut cache = self.cache.lock().await;
        let fresh = cache
            .get(scope)
            .is_some_and(|cached| cached.revision == revision);
        if !fresh {
            if cache.len() >= CACHE_CAPACITY {
                cache.clear();
            }
            let index = Self::build(&corpus, scope);
            debug!(
                "Built lexical index over {} documents ({} terms)",
                index.len(),
                index.vocabulary_size()
            );
            cache.insert(scope.clone(), CachedIndex { revision, index });
        }
        drop(corpus);

        let Some(cached) = cache.get(scope) else {
            return Err(TierError::Other("lexical cache entry vanished".to_string()));
        };
        if cached.index.is_empty() {
            return Ok(TierOutcome::empty("no scoped document has text"));
        }

        let chunks: Vec<ScoredChunk> = cached
            .index
            .search(query, k)
            .into_iter()
            .filter(|hit| hit.score > self.min_score)
            .map(|hit| ScoredChunk::new(hit.snippet, hit.score, hit.document_id, TierKind::Lexical))
            .collect();

        Ok(TierOutcome::from_chunks(
            chunks,
            format!("no document scored above {}", self.min_score),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Arc<RwLock<Corpus>> {
        let mut corpus = Corpus::new();
        corpus.ingest(
            1,
            vec![
                "Photosynthesis converts light energy into chemical energy.".to_string(),
                "Chlorophyll absorbs blue and red wavelengths.".to_string(),
            ],
        );
        corpus.ingest(
            2,
            vec!["The stock market rallied on strong technology earnings.".to_string()],
        );
        Arc::new(RwLock::new(corpus))
    }

    #[tokio::test]
    async fn test_finds_scoped_document() {
        let tier = LexicalTier::new(corpus(), 0.3);
        let outcome = tier
            .search("chlorophyll wavelengths", &SessionScope::from_ids([1, 2]), 5)
            .await
            .unwrap();

        let TierOutcome::Found(chunks) = outcome else {
            panic!("expected lexical results");
        };
        assert_eq!(chunks[0].document_id, 1);
        assert_eq!(chunks[0].tier, TierKind::Lexical);
        assert!(chunks.iter().all(|c| c.score > 0.3));
    }

    #[tokio::test]
    async fn test_out_of_scope_documents_ignored() {
        let tier = LexicalTier::new(corpus(), 0.0);
        let outcome = tier
            .search("chlorophyll wavelengths", &SessionScope::from_ids([2]), 5)
            .await
            .unwrap();
        assert!(matches!(outcome, TierOutcome::Empty(_)));
    }

    #[tokio::test]
    async fn test_cache_rebuilt_after_corpus_change() {
        let corpus = corpus();
        let tier = LexicalTier::new(corpus.clone(), 0.1);
        let scope = SessionScope::from_ids([1, 2, 3]);

        let before = tier.search("volcanic magma", &scope, 5).await.unwrap();
        assert!(matches!(before, TierOutcome::Empty(_)));

        corpus
            .write()
            .await
            .ingest(3, vec!["Volcanic eruptions eject magma and ash.".to_string()]);

        let after = tier.search("volcanic magma", &scope, 5).await.unwrap();
        let TierOutcome::Found(chunks) = after else {
            panic!("expected the new document to be searchable");
        };
        assert_eq!(chunks[0].document_id, 3);
    }

    #[tokio::test]
    async fn test_floor_is_exclusive() {
        let mut single = Corpus::new();
        single.ingest(1, vec!["glaciers glaciers".to_string()]);
        let tier = LexicalTier::new(Arc::new(RwLock::new(single)), 1.0);

        // Identical term distributions score the maximum of 1.0.
        let outcome = tier
            .search("glaciers", &SessionScope::from_ids([1]), 5)
            .await
            .unwrap();
        assert!(matches!(outcome, TierOutcome::Empty(_)));
    }
}
