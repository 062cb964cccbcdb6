//! Integration test: retrieval cascade over shared corpus and index

use async_trait::async_trait;
use lectern::config::RetrievalConfig;
use lectern::corpus::Corpus;
use lectern::embedding::{
    EmbeddingChain, EmbeddingError, EmbeddingIndex, EmbeddingProvider, HashingEmbedder,
    IndexHealth, LocalLexicalIndex, QuotaPolicy,
};
use lectern::retrieval::{RetrievalOrchestrator, SessionScope, TierKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Hashing embeddings until `exhausted` is set, then quota errors
struct MeteredProvider {
    inner: HashingEmbedder,
    exhausted: AtomicBool,
}

impl MeteredProvider {
    fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(dimension).unwrap(),
            exhausted: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for MeteredProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(EmbeddingError::QuotaExceeded(
                "insufficient_quota".to_string(),
            ));
        }
        self.inner.embed_batch(texts).await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "metered"
    }
}

fn library() -> Corpus {
    let mut corpus = Corpus::new();
    corpus.ingest(
        1,
        (0..10)
            .map(|i| format!("Rust ownership rule {} keeps memory safe without a garbage collector.", i))
            .collect(),
    );
    corpus.ingest(
        2,
        (0..5)
            .map(|i| format!("Sourdough bread step {} needs a lively starter and patience.", i))
            .collect(),
    );
    corpus.ingest(
        3,
        vec!["Unscoped document about ownership that no session can see.".to_string()],
    );
    corpus
}

#[tokio::test]
async fn test_index_scenario_ten_and_five_chunks() {
    let provider = Arc::new(HashingEmbedder::new(256).unwrap());
    let mut index = EmbeddingIndex::new(provider, QuotaPolicy::Degrade);
    let corpus = library();

    for id in [1, 2] {
        let chunks = corpus.chunks(id).unwrap().to_vec();
        index.add(&chunks, id).await.unwrap();
    }
    assert_eq!(index.len(), 15);
    assert_eq!(index.document_count(), 2);

    let results = index.search("memory safety in rust", 5).await.unwrap();
    assert!(results.len() <= 5);
    assert!(results.iter().all(|hit| [1, 2].contains(&hit.document_id)));
    println!("✓ {} results, top score {:.3}", results.len(), results[0].score);
}

#[tokio::test]
async fn test_lexical_scenario_exclusive_terms() {
    let corpus = library();
    let mut index = LocalLexicalIndex::new();
    index.add_documents([1, 2].map(|id| (id, corpus.document_text(id).unwrap())));

    let results = index.search("sourdough starter", 5);
    assert_eq!(results[0].document_id, 2);
    let rust_score = results
        .iter()
        .find(|hit| hit.document_id == 1)
        .map_or(0.0, |hit| hit.score);
    assert!(results[0].score > rust_score);
}

#[tokio::test]
async fn test_cascade_degrades_when_quota_runs_out() {
    let provider = MeteredProvider::new(256);
    let index = Arc::new(RwLock::new(EmbeddingIndex::new(
        provider.clone(),
        QuotaPolicy::Degrade,
    )));
    let corpus = Arc::new(RwLock::new(library()));
    let orchestrator =
        RetrievalOrchestrator::new(index.clone(), corpus.clone(), &RetrievalConfig::default());
    let scope = SessionScope::from_ids([1, 2]);

    // Healthy: an exact chunk scores 1.0 in the vector tier.
    let query = "Rust ownership rule 3 keeps memory safe without a garbage collector.";
    let retrieval = orchestrator.retrieve(query, &scope, 5).await.unwrap();
    assert_eq!(retrieval.tier, Some(TierKind::Vector));
    assert!(retrieval.chunks.iter().all(|c| scope.contains(c.document_id)));
    println!("✓ Vector tier answered with {} chunks", retrieval.chunks.len());

    // Quota gone: query embedding fails, the lexical tier takes over.
    provider.exhausted.store(true, Ordering::SeqCst);
    let retrieval = orchestrator
        .retrieve("sourdough starter patience", &scope, 5)
        .await
        .unwrap();
    assert_eq!(retrieval.tier, Some(TierKind::Lexical));
    assert_eq!(retrieval.sources[0].document_id, 2);
    println!("✓ Lexical tier answered after quota exhaustion");

    // Newly ingested documents are not embedded while quota is exhausted.
    corpus
        .write()
        .await
        .ingest(4, vec!["Volcanoes erupt molten magma.".to_string()]);
    let wider = SessionScope::from_ids([1, 2, 4]);
    let retrieval = orchestrator.retrieve("magma", &wider, 5).await.unwrap();
    assert_eq!(retrieval.tier, Some(TierKind::Lexical));
    assert!(!index.read().await.contains_document(4));
}

#[tokio::test]
async fn test_degraded_index_skipped_unless_trusted() {
    let provider = MeteredProvider::new(64);
    provider.exhausted.store(true, Ordering::SeqCst);

    let mut corpus = Corpus::new();
    corpus.ingest(1, vec!["Tidal forces shape coastlines over centuries.".to_string()]);
    let corpus = Arc::new(RwLock::new(corpus));

    let index = Arc::new(RwLock::new(EmbeddingIndex::new(
        provider.clone(),
        QuotaPolicy::Random,
    )));
    let report = index
        .write()
        .await
        .add(&["Tidal forces shape coastlines over centuries.".to_string()], 1)
        .await
        .unwrap();
    assert_eq!(report.substituted, 1);
    assert!(index.read().await.health().is_degraded());
    provider.exhausted.store(false, Ordering::SeqCst);

    let scope = SessionScope::from_ids([1]);
    let skeptical = RetrievalOrchestrator::new(
        index.clone(),
        corpus.clone(),
        &RetrievalConfig::default(),
    );
    let retrieval = skeptical.retrieve("tidal coastlines", &scope, 3).await.unwrap();
    assert_ne!(retrieval.tier, Some(TierKind::Vector));

    let trusting = RetrievalOrchestrator::new(
        index,
        corpus,
        &RetrievalConfig {
            trust_degraded_index: true,
            vector_min_score: -1.0,
            ..RetrievalConfig::default()
        },
    );
    let retrieval = trusting.retrieve("tidal coastlines", &scope, 3).await.unwrap();
    assert_eq!(retrieval.tier, Some(TierKind::Vector));
}

#[tokio::test]
async fn test_scope_isolates_sessions() {
    let provider = Arc::new(HashingEmbedder::new(128).unwrap());
    let index = Arc::new(RwLock::new(EmbeddingIndex::new(provider, QuotaPolicy::Degrade)));
    let corpus = Arc::new(RwLock::new(library()));
    let orchestrator = RetrievalOrchestrator::new(index, corpus, &RetrievalConfig::default());

    let retrieval = orchestrator
        .retrieve("ownership", &SessionScope::from_ids([2]), 5)
        .await
        .unwrap();
    assert!(retrieval.chunks.iter().all(|c| c.document_id == 2));
}

#[tokio::test]
async fn test_offline_fallback_does_not_mask_quota() {
    let remote = MeteredProvider::new(128);
    remote.exhausted.store(true, Ordering::SeqCst);
    let chain = EmbeddingChain::new(vec![
        remote.clone(),
        Arc::new(HashingEmbedder::new(128).unwrap()),
    ])
    .unwrap();
    let chain = Arc::new(chain);

    let index = Arc::new(RwLock::new(EmbeddingIndex::new(
        chain.clone(),
        QuotaPolicy::Degrade,
    )));
    let corpus = Arc::new(RwLock::new(library()));
    let orchestrator =
        RetrievalOrchestrator::new(index.clone(), corpus, &RetrievalConfig::default());

    let retrieval = orchestrator
        .retrieve("sourdough starter patience", &SessionScope::from_ids([1, 2]), 5)
        .await
        .unwrap();
    assert_eq!(retrieval.tier, Some(TierKind::Lexical));

    let index = index.read().await;
    assert!(index.is_empty());
    assert_eq!(index.health(), IndexHealth::Healthy);
    assert!(!chain.drain_events().is_empty());
}
