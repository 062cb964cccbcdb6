use super::{RetrievalTier, TierError, TierOutcome};
use crate::corpus::{Corpus, DocumentId};
use crate::embedding::{AddReport, EmbeddingIndex, IndexError};
use crate::retrieval::{ScoredChunk, SessionScope, TierKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Embed `chunks` for `document_id` and store them in the index
///
/// Embedding runs without holding either lock. The rows are committed only
/// if the corpus still holds exactly `chunks` for the document once the
/// index write lock is taken; `Ok(None)` means the corpus moved on and
/// nothing was stored. With `replace` unset, a document that some other
/// writer indexed meanwhile is left alone. A failed commit leaves the
/// document absent from the index.
///
/// Locks are taken index first, then corpus.
pub(crate) async fn index_document(
    index: &RwLock<EmbeddingIndex>,
    corpus: &RwLock<Corpus>,
    document_id: DocumentId,
    chunks: &[String],
    replace: bool,
) -> Result<Option<AddReport>, IndexError> {
    let embedder = index.read().await.embedder();
    let prepared = embedder.prepare(chunks, document_id).await?;

    let mut index = index.write().await;
    let corpus = corpus.read().await;
    if corpus.chunks(document_id) != Some(chunks) {
        debug!(
            "Document {} changed while embedding, discarding its vectors",
            document_id
        );
        return Ok(None);
    }
    if index.contains_document(document_id) {
        if !replace {
            return Ok(None);
        }
        index.remove_document(document_id);
    }

    let result = index.commit(prepared);
    if result.is_err() {
        index.remove_document(document_id);
    }
    result.map(Some)
}

/// Embedding search over the shared index
///
/// Scoped documents present in the corpus but missing from the index are
/// embedded on demand before searching.
pub struct VectorTier {
    index: Arc<RwLock<EmbeddingIndex>>,
    corpus: Arc<RwLock<Corpus>>,
    min_score: f32,
    trust_degraded_index: bool,
}

impl VectorTier {
    pub fn new(
        index: Arc<RwLock<EmbeddingIndex>>,
        corpus: Arc<RwLock<Corpus>>,
        min_score: f32,
        trust_degraded_index: bool,
    ) -> Self {
        Self {
            index,
            corpus,
            min_score,
            trust_degraded_index,
        }
    }

    async fn refresh(&self, scope: &SessionScope) {
        let missing: Vec<(DocumentId, Vec<String>)> = {
            let index = self.index.read().await;
            let corpus = self.corpus.read().await;
            scope
                .iter()
                .filter(|&id| !index.contains_document(id))
                .filter_map(|id| corpus.chunks(id).map(|c| (id, c.to_vec())))
                .filter(|(_, chunks)| !chunks.is_empty())
                .collect()
        };

        for (document_id, chunks) in missing {
            match index_document(&self.index, &self.corpus, document_id, &chunks, false).await {
                Ok(_) => {}
                Err(e) if e.is_quota() => {
                    warn!("Embedding quota exhausted while indexing document {}", document_id);
                    break;
                }
                Err(e) => warn!("Failed to index document {}: {}", document_id, e),
            }
        }
    }
}

#[async_trait]
impl RetrievalTier for VectorTier {
    fn kind(&self) -> TierKind {
        TierKind::Vector
    }

    async fn search(
        &self,
        query: &str,
        scope: &SessionScope,
        k: usize,
    ) -> Result<TierOutcome, TierError> {
        self.refresh(scope).await;

        let embedder = {
            let index = self.index.read().await;
            if !scope.iter().any(|id| index.contains_document(id)) {
                return Ok(TierOutcome::empty("no scoped document is indexed"));
            }
            let health = index.health();
            if health.is_degraded() && !self.trust_degraded_index {
                return Ok(TierOutcome::empty(format!(
                    "vector index is degraded ({:?})",
                    health
                )));
            }
            index.embedder()
        };

        // The query round-trip runs without the index lock.
        let query_vector = embedder.embed_query(query).await?;
        let hits = self
            .index
            .read()
            .await
            .rank(&query_vector, k, |id| scope.contains(id));
        debug!("Vector tier scored {} candidates", hits.len());

        let chunks: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|hit| hit.score > self.min_score)
            .map(|hit| ScoredChunk::new(hit.text, hit.score, hit.document_id, TierKind::Vector))
            .collect();

        Ok(TierOutcome::from_chunks(
            chunks,
            format!("no chunk scored above {}", self.min_score),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingProvider, HashingEmbedder, QuotaPolicy};
    use tokio::sync::{Notify, Semaphore};

    /// Parks inside `embed_batch` until the test releases it
    struct GatedProvider {
        inner: HashingEmbedder,
        entered: Notify,
        release: Semaphore,
    }

    impl GatedProvider {
        fn new(dimension: usize) -> Self {
            Self {
                inner: HashingEmbedder::new(dimension).unwrap(),
                entered: Notify::new(),
                release: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for GatedProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.entered.notify_one();
            self.release.acquire().await.unwrap().forget();
            self.inner.embed_batch(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_name(&self) -> &str {
            "gated"
        }
    }

    /// Same unit vector for every text, so every score is exactly 1.0
    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    fn shared_state(corpus: Corpus) -> (Arc<RwLock<EmbeddingIndex>>, Arc<RwLock<Corpus>>) {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(128).unwrap());
        (
            Arc::new(RwLock::new(EmbeddingIndex::new(provider, QuotaPolicy::Degrade))),
            Arc::new(RwLock::new(corpus)),
        )
    }

    #[tokio::test]
    async fn test_refreshes_missing_documents() {
        let mut corpus = Corpus::new();
        corpus.ingest(1, vec!["rust ownership and borrowing".to_string()]);
        corpus.ingest(2, vec!["baking sourdough bread".to_string()]);
        let (index, corpus) = shared_state(corpus);

        let tier = VectorTier::new(index.clone(), corpus, 0.0, false);
        let outcome = tier
            .search("rust ownership and borrowing", &SessionScope::from_ids([1]), 5)
            .await
            .unwrap();

        match outcome {
            TierOutcome::Found(chunks) => {
                assert_eq!(chunks[0].document_id, 1);
                assert!(chunks.iter().all(|c| c.tier == TierKind::Vector));
            }
            TierOutcome::Empty(reason) => panic!("expected results: {reason}"),
        }
        // Only the scoped document is embedded.
        let index = index.read().await;
        assert!(index.contains_document(1));
        assert!(!index.contains_document(2));
    }

    #[tokio::test]
    async fn test_threshold_filters_everything() {
        let mut corpus = Corpus::new();
        corpus.ingest(1, vec!["rust ownership and borrowing".to_string()]);
        let (index, corpus) = shared_state(corpus);

        let tier = VectorTier::new(index, corpus, 0.99, false);
        let outcome = tier
            .search("sourdough starter hydration", &SessionScope::from_ids([1]), 5)
            .await
            .unwrap();
        assert!(matches!(outcome, TierOutcome::Empty(_)));
    }

    #[tokio::test]
    async fn test_empty_index_is_empty_outcome() {
        let (index, corpus) = shared_state(Corpus::new());
        let tier = VectorTier::new(index, corpus, 0.0, false);
        let outcome = tier
            .search("anything", &SessionScope::from_ids([9]), 5)
            .await
            .unwrap();
        assert_eq!(outcome, TierOutcome::empty("no scoped document is indexed"));
    }

    #[tokio::test]
    async fn test_score_equal_to_floor_is_rejected() {
        let mut corpus = Corpus::new();
        corpus.ingest(1, vec!["anything".to_string()]);
        let index = Arc::new(RwLock::new(EmbeddingIndex::new(
            Arc::new(AxisProvider),
            QuotaPolicy::Degrade,
        )));
        let corpus = Arc::new(RwLock::new(corpus));
        let scope = SessionScope::from_ids([1]);

        let strict = VectorTier::new(index.clone(), corpus.clone(), 1.0, false);
        let outcome = strict.search("query", &scope, 5).await.unwrap();
        assert!(matches!(outcome, TierOutcome::Empty(_)));

        let lenient = VectorTier::new(index, corpus, 0.99, false);
        let outcome = lenient.search("query", &scope, 5).await.unwrap();
        assert!(matches!(outcome, TierOutcome::Found(_)));
    }

    #[tokio::test]
    async fn test_document_removed_while_embedding_stays_out_of_index() {
        let gate = Arc::new(GatedProvider::new(64));
        let mut corpus = Corpus::new();
        corpus.ingest(5, vec!["Tidal forces shape coastlines.".to_string()]);
        let index = Arc::new(RwLock::new(EmbeddingIndex::new(
            gate.clone(),
            QuotaPolicy::Degrade,
        )));
        let corpus = Arc::new(RwLock::new(corpus));
        let tier = VectorTier::new(index.clone(), corpus.clone(), 0.0, false);
        let scope = SessionScope::from_ids([5]);

        let (outcome, ()) = tokio::join!(tier.search("tidal coastlines", &scope, 3), async {
            gate.entered.notified().await;
            // Embedding in flight must not hold the index.
            assert!(index.try_write().is_ok());
            corpus.write().await.remove_document(5);
            gate.release.add_permits(8);
        });

        assert!(matches!(outcome.unwrap(), TierOutcome::Empty(_)));
        assert!(!index.read().await.contains_document(5));
    }

    #[tokio::test]
    async fn test_document_changed_while_embedding_is_not_stored_stale() {
        let gate = Arc::new(GatedProvider::new(64));
        let mut corpus = Corpus::new();
        corpus.ingest(2, vec!["old text about rivers".to_string()]);
        let index = Arc::new(RwLock::new(EmbeddingIndex::new(
            gate.clone(),
            QuotaPolicy::Degrade,
        )));
        let corpus = Arc::new(RwLock::new(corpus));
        let old = vec!["old text about rivers".to_string()];

        let (stored, ()) = tokio::join!(index_document(&index, &corpus, 2, &old, false), async {
            gate.entered.notified().await;
            corpus
                .write()
                .await
                .ingest(2, vec!["new text about mountains".to_string()]);
            gate.release.add_permits(8);
        });

        assert_eq!(stored.unwrap(), None);
        assert!(!index.read().await.contains_document(2));
    }
}
