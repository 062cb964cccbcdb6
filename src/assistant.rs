//! Entry point for callers: ingest chunks, answer questions, report state
//!
//! The assistant owns the corpus and embedding index behind tokio locks and
//! writes both back to disk after every mutation when persistence is on.

use crate::config::{expand_path, Config};
use crate::corpus::{Corpus, DocumentId};
use crate::embedding::{build_provider, EmbeddingIndex, EmbeddingProvider, IndexHealth};
use crate::error::Result;
use crate::generation::GenerationOrchestrator;
use crate::retrieval::{
    index_document, Retrieval, RetrievalOrchestrator, SessionScope, SourceAttribution, TierKind,
};
use crate::storage::StorageLayout;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Generated answer with the documents it drew on
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceAttribution>,
    /// Retrieval tier that supplied the context, if any
    pub tier: Option<TierKind>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Chunks stored in the corpus
    pub stored: usize,
    /// Chunks embedded into the vector index
    pub indexed: usize,
    /// Indexed chunks that received random vectors
    pub substituted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_chunks: usize,
    pub document_count: usize,
    pub indexed_chunks: usize,
    pub indexed_documents: usize,
    pub health: IndexHealth,
}

pub struct Assistant {
    config: Config,
    layout: Option<StorageLayout>,
    index: Arc<RwLock<EmbeddingIndex>>,
    corpus: Arc<RwLock<Corpus>>,
    retrieval: RetrievalOrchestrator,
    generation: GenerationOrchestrator,
}

impl Assistant {
    /// Build providers from configuration and load any persisted state
    pub async fn open(config: Config) -> Result<Self> {
        let provider = build_provider(&config.embedding)?;
        let generation = GenerationOrchestrator::from_config(&config.generation);
        Self::with_components(config, provider, generation).await
    }

    /// Like [`open`](Self::open) with caller-supplied providers
    pub async fn with_components(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        generation: GenerationOrchestrator,
    ) -> Result<Self> {
        let layout = if config.storage.persist {
            let data_dir = expand_path(&config.storage.data_dir)?;
            Some(StorageLayout::new(data_dir, &config.storage.index_name)?)
        } else {
            None
        };

        let mut index = EmbeddingIndex::new(provider, config.embedding.on_quota);
        let mut corpus = Corpus::new();

        if let Some(layout) = &layout {
            match Corpus::load(&layout.corpus_path()) {
                Ok(loaded) => corpus = loaded,
                Err(e) => warn!("Failed to load corpus, starting empty: {}", e),
            }
            if let Err(e) = index.load(&layout.index_stem()) {
                warn!("Failed to load vector index, continuing in memory: {}", e);
            }
            // Rows for documents the corpus no longer knows are unreachable.
            let orphans: Vec<DocumentId> = index
                .document_ids()
                .into_iter()
                .filter(|id| !corpus.contains(*id))
                .collect();
            for id in orphans {
                index.remove_document(id);
            }
        }

        info!(
            "Assistant ready: {} documents, {} indexed chunks",
            corpus.document_count(),
            index.len()
        );

        let index = Arc::new(RwLock::new(index));
        let corpus = Arc::new(RwLock::new(corpus));
        let retrieval =
            RetrievalOrchestrator::new(index.clone(), corpus.clone(), &config.retrieval);

        Ok(Self {
            config,
            layout,
            index,
            corpus,
            retrieval,
            generation,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Store `chunks` as the full content of `document_id` and embed them
    ///
    /// Blank chunks are dropped. Embedding runs without locking the index,
    /// so queries keep being served meanwhile. Embedding failures are
    /// logged; the chunks stay searchable through the lexical and keyword
    /// tiers and the vector tier retries them on a later query.
    pub async fn ingest(
        &self,
        document_id: DocumentId,
        chunks: Vec<String>,
    ) -> Result<IngestReport> {
        let chunks: Vec<String> = chunks
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();

        let mut report = IngestReport {
            stored: chunks.len(),
            ..IngestReport::default()
        };

        let replaced = self.corpus.write().await.ingest(document_id, chunks.clone());
        if let Some(previous) = replaced {
            info!("Replacing {} chunks of document {}", previous, document_id);
        }
        // Stale rows must not answer queries while the new text embeds.
        self.index.write().await.remove_document(document_id);

        if !chunks.is_empty() {
            match index_document(&self.index, &self.corpus, document_id, &chunks, true).await {
                Ok(Some(added)) => {
                    report.indexed = added.added;
                    report.substituted = added.substituted;
                }
                Ok(None) => debug!(
                    "Document {} was replaced during ingest, skipping its vectors",
                    document_id
                ),
                Err(e) if e.is_quota() => warn!(
                    "Embedding quota exhausted; document {} is searchable lexically only",
                    document_id
                ),
                Err(e) => warn!("Failed to embed document {}: {}", document_id, e),
            }
        }

        self.persist().await;
        info!(
            "Ingested document {}: {} chunks stored, {} indexed",
            document_id, report.stored, report.indexed
        );
        Ok(report)
    }

    /// Forget a document entirely; `false` if it was unknown
    pub async fn remove_document(&self, document_id: DocumentId) -> Result<bool> {
        let in_corpus = self.corpus.write().await.remove_document(document_id);
        let rows = self.index.write().await.remove_document(document_id);
        let removed = in_corpus || rows > 0;
        if removed {
            self.persist().await;
            info!("Removed document {}", document_id);
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<()> {
        self.corpus.write().await.clear();
        self.index.write().await.clear();
        self.persist().await;
        info!("Cleared all documents");
        Ok(())
    }

    /// Every known document
    pub async fn all_documents(&self) -> SessionScope {
        self.corpus.read().await.document_ids().collect()
    }

    pub async fn retrieve(
        &self,
        query: &str,
        scope: &SessionScope,
        k: usize,
    ) -> Result<Retrieval> {
        Ok(self.retrieval.retrieve(query, scope, k).await?)
    }

    /// Retrieve context from `scope` and generate an answer
    ///
    /// Uses the configured default persona when `persona` is `None`.
    pub async fn answer(
        &self,
        query: &str,
        scope: &SessionScope,
        persona: Option<&str>,
    ) -> Result<Answer> {
        let retrieval = self
            .retrieval
            .retrieve(query, scope, self.config.retrieval.default_k)
            .await?;
        let persona = persona.unwrap_or(&self.config.generation.default_persona);

        let text = self
            .generation
            .generate(query, &retrieval.context(), persona)
            .await;

        Ok(Answer {
            text,
            sources: retrieval.sources,
            tier: retrieval.tier,
        })
    }

    pub async fn stats(&self) -> Stats {
        let (total_chunks, document_count) = {
            let corpus = self.corpus.read().await;
            (corpus.chunk_count(), corpus.document_count())
        };
        let index = self.index.read().await;
        Stats {
            total_chunks,
            document_count,
            indexed_chunks: index.len(),
            indexed_documents: index.document_count(),
            health: index.health(),
        }
    }

    /// Write corpus and index; failures leave the in-memory state authoritative
    async fn persist(&self) {
        let Some(layout) = &self.layout else {
            return;
        };

        if let Err(e) = self.corpus.read().await.save(&layout.corpus_path()) {
            warn!("Failed to persist corpus: {}", e);
        }
        if let Err(e) = self.index.read().await.save(&layout.index_stem()) {
            warn!("Failed to persist vector index: {}", e);
        }
    }
}
