/// Exact nearest-neighbour index over unit-length embeddings
use super::provider::{Embedded, EmbeddingError, EmbeddingProvider, MAX_BATCH_SIZE};
use crate::corpus::DocumentId;
use crate::retrieval::SessionScope;
use crate::storage::{atomic_write, checksum, with_suffix};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;
const META_SUFFIX: &str = ".meta.json";
const VECTORS_SUFFIX: &str = ".vectors";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Embedding failed after {added} chunks were added: {source}")]
    Embedding {
        source: EmbeddingError,
        added: usize,
    },

    #[error("Query embedding failed: {0}")]
    QueryEmbedding(EmbeddingError),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Cannot normalize zero-length vector at batch position {position}")]
    ZeroVector { position: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },
}

impl IndexError {
    /// Whether the failure came from the provider running out of quota
    pub fn is_quota(&self) -> bool {
        match self {
            IndexError::Embedding { source, .. } | IndexError::QueryEmbedding(source) => {
                source.is_quota()
            }
            _ => false,
        }
    }
}

/// What to do when the embedding provider reports exhausted quota during `add`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPolicy {
    /// Add nothing and report the quota error
    #[default]
    Degrade,
    /// Insert random unit vectors and mark the index degraded
    Random,
}

/// Whether every stored vector came from a real embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IndexHealth {
    Healthy,
    /// Some rows hold random or fallback-model vectors; their scores are meaningless
    Degraded { substituted_rows: usize },
}

impl IndexHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, IndexHealth::Degraded { .. })
    }
}

/// Outcome of a successful `add`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddReport {
    pub added: usize,
    /// Rows stored without a primary-model embedding (random or fallback vectors)
    pub substituted: usize,
}

/// Search result with chunk text, similarity and owning document
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    /// Cosine similarity in [-1, 1], higher is more similar
    pub score: f32,
    pub document_id: DocumentId,
}

#[derive(Serialize, Deserialize)]
struct VectorBlob {
    dimension: usize,
    rows: usize,
    data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct IndexMetadata {
    format_version: u32,
    dimension: usize,
    rows: usize,
    model: String,
    vectors_file: String,
    vectors_checksum: String,
    texts: Vec<String>,
    document_ids: Vec<DocumentId>,
    #[serde(default)]
    synthetic: Vec<bool>,
    saved_at: DateTime<Utc>,
}

/// Embedding half of the index
///
/// Cloned out of the index so callers can run slow provider round-trips
/// without holding a lock on it, then hand the result to
/// [`EmbeddingIndex::commit`].
#[derive(Clone)]
pub struct IndexEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    primary_model: String,
    quota_policy: QuotaPolicy,
}

struct PreparedBatch {
    texts: Vec<String>,
    rows: Array2<f32>,
    synthetic: bool,
}

/// Normalized rows for one document, not yet visible to searches
pub struct PreparedChunks {
    document_id: DocumentId,
    dimension: usize,
    batches: Vec<PreparedBatch>,
    failure: Option<IndexError>,
}

impl PreparedChunks {
    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Every batch embedded; otherwise commit appends the leading batches
    /// and reports the failure
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

impl IndexEmbedder {
    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    /// Embed and normalize `texts` in batches of at most 50
    ///
    /// Stops at the first failing batch and keeps the batches before it.
    pub async fn prepare(
        &self,
        texts: &[String],
        document_id: DocumentId,
    ) -> Result<PreparedChunks, IndexError> {
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(IndexError::InvalidInput(format!(
                "chunk {} of document {} is empty",
                pos, document_id
            )));
        }

        let mut prepared = PreparedChunks {
            document_id,
            dimension: self.dimension,
            batches: Vec::new(),
            failure: None,
        };
        let batch_size = self.provider.max_batch_size().clamp(1, MAX_BATCH_SIZE);

        for batch in texts.chunks(batch_size) {
            let (vectors, synthetic) = match self.embed_batch(batch, document_id).await {
                Ok(embedded) => embedded,
                Err(source) => {
                    prepared.failure = Some(IndexError::Embedding { source, added: 0 });
                    break;
                }
            };
            match self.normalize_batch(batch.len(), vectors) {
                Ok(rows) => prepared.batches.push(PreparedBatch {
                    texts: batch.to_vec(),
                    rows,
                    synthetic,
                }),
                Err(e) => {
                    prepared.failure = Some(e);
                    break;
                }
            }
            debug!(
                "Embedded batch of {} chunks for document {}",
                batch.len(),
                document_id
            );
        }

        Ok(prepared)
    }

    /// Vectors for one batch and whether they are outside the primary space
    async fn embed_batch(
        &self,
        batch: &[String],
        document_id: DocumentId,
    ) -> Result<(Vec<Vec<f32>>, bool), EmbeddingError> {
        match self.provider.embed_batch_traced(batch).await {
            Ok(Embedded {
                vectors,
                fallback_cause: None,
                ..
            }) => Ok((vectors, false)),
            Ok(Embedded {
                fallback_cause: Some(cause),
                ..
            }) if cause.is_quota() => self.on_quota(cause, batch.len(), document_id),
            Ok(Embedded {
                vectors,
                model,
                fallback_cause: Some(cause),
            }) => {
                warn!(
                    "{} unavailable ({}); storing {} vectors from {} as degraded rows for document {}",
                    self.primary_model,
                    cause,
                    batch.len(),
                    model,
                    document_id
                );
                Ok((vectors, true))
            }
            Err(e) if e.is_quota() => self.on_quota(e, batch.len(), document_id),
            Err(e) => Err(e),
        }
    }

    fn on_quota(
        &self,
        cause: EmbeddingError,
        count: usize,
        document_id: DocumentId,
    ) -> Result<(Vec<Vec<f32>>, bool), EmbeddingError> {
        match self.quota_policy {
            QuotaPolicy::Degrade => Err(cause),
            QuotaPolicy::Random => {
                warn!(
                    "Embedding quota exceeded ({}); substituting {} random vectors for document {}",
                    cause, count, document_id
                );
                Ok((random_unit_vectors(count, self.dimension), true))
            }
        }
    }

    /// Validate and normalize a provider response into a row matrix
    fn normalize_batch(
        &self,
        expected: usize,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Array2<f32>, IndexError> {
        if vectors.len() != expected {
            return Err(IndexError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }

        let mut flat = Vec::with_capacity(expected * self.dimension);
        for (position, vector) in vectors.into_iter().enumerate() {
            if vector.len() != self.dimension {
                return Err(IndexError::InvalidDimension {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            let unit = normalize(vector).ok_or(IndexError::ZeroVector { position })?;
            flat.extend(unit);
        }

        Array2::from_shape_vec((expected, self.dimension), flat).map_err(|_| {
            IndexError::CountMismatch {
                expected,
                actual: 0,
            }
        })
    }

    /// Embed and normalize a query in the primary model's space
    ///
    /// A query answered by a fallback model is an error: its vector cannot
    /// be compared with rows from the primary.
    pub async fn embed_query(&self, query: &str) -> Result<Array1<f32>, IndexError> {
        let embedded = self
            .provider
            .embed_batch_traced(&[query.to_string()])
            .await
            .map_err(IndexError::QueryEmbedding)?;
        if let Some(cause) = embedded.fallback_cause {
            return Err(IndexError::QueryEmbedding(cause));
        }

        let vector = embedded
            .vectors
            .into_iter()
            .next()
            .ok_or(IndexError::CountMismatch {
                expected: 1,
                actual: 0,
            })?;
        if vector.len() != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        normalize(vector)
            .map(Array1::from)
            .ok_or(IndexError::ZeroVector { position: 0 })
    }
}

/// Embedding index with three length-synchronized containers
///
/// Row `i` of `vectors`, `texts[i]` and `doc_ids[i]` describe the same chunk.
/// Every stored row has unit L2 norm, so cosine similarity is a dot product.
pub struct EmbeddingIndex {
    embedder: IndexEmbedder,
    dimension: usize,
    vectors: Array2<f32>,
    texts: Vec<String>,
    doc_ids: Vec<DocumentId>,
    synthetic: Vec<bool>,
}

impl EmbeddingIndex {
    /// Create an empty index whose dimension follows the provider
    pub fn new(provider: Arc<dyn EmbeddingProvider>, quota_policy: QuotaPolicy) -> Self {
        let dimension = provider.dimension();
        let primary_model = provider.primary_model().to_string();
        Self {
            embedder: IndexEmbedder {
                provider,
                dimension,
                primary_model,
                quota_policy,
            },
            dimension,
            vectors: Array2::zeros((0, dimension)),
            texts: Vec::new(),
            doc_ids: Vec::new(),
            synthetic: Vec::new(),
        }
    }

    /// Handle for embedding outside any lock on this index
    pub fn embedder(&self) -> IndexEmbedder {
        self.embedder.clone()
    }

    /// Embed `texts` and append them as chunks of `document_id`
    ///
    /// Texts are embedded in batches of at most 50. Each batch is appended
    /// whole or not at all; on error, batches before the failing one stay.
    pub async fn add(
        &mut self,
        texts: &[String],
        document_id: DocumentId,
    ) -> Result<AddReport, IndexError> {
        let prepared = self.embedder.prepare(texts, document_id).await?;
        self.commit(prepared)
    }

    /// Append rows produced by [`IndexEmbedder::prepare`]
    pub fn commit(&mut self, prepared: PreparedChunks) -> Result<AddReport, IndexError> {
        if prepared.dimension != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: prepared.dimension,
            });
        }

        let document_id = prepared.document_id;
        let mut report = AddReport::default();
        for batch in prepared.batches {
            self.vectors
                .append(Axis(0), batch.rows.view())
                .map_err(|_| IndexError::InvalidDimension {
                    expected: self.dimension,
                    actual: batch.rows.ncols(),
                })?;
            let count = batch.texts.len();
            self.texts.extend(batch.texts);
            self.doc_ids
                .extend(std::iter::repeat(document_id).take(count));
            self.synthetic
                .extend(std::iter::repeat(batch.synthetic).take(count));

            report.added += count;
            if batch.synthetic {
                report.substituted += count;
            }
        }

        match prepared.failure {
            Some(IndexError::Embedding { source, .. }) => Err(IndexError::Embedding {
                source,
                added: report.added,
            }),
            Some(e) => Err(e),
            None => {
                info!(
                    "Added {} text chunks for document {}",
                    report.added, document_id
                );
                Ok(report)
            }
        }
    }

    /// Top-`k` chunks by cosine similarity to `query`
    ///
    /// Ties keep insertion order. An empty index yields an empty result
    /// without calling the provider.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        self.search_where(query, k, |_| true).await
    }

    /// Like [`search`](Self::search), restricted to chunks of documents in `scope`
    pub async fn search_scoped(
        &self,
        query: &str,
        k: usize,
        scope: &SessionScope,
    ) -> Result<Vec<SearchHit>, IndexError> {
        self.search_where(query, k, |id| scope.contains(id)).await
    }

    async fn search_where<F>(
        &self,
        query: &str,
        k: usize,
        filter: F,
    ) -> Result<Vec<SearchHit>, IndexError>
    where
        F: Fn(DocumentId) -> bool + Send + Sync,
    {
        if k == 0 || !self.doc_ids.iter().any(|&id| filter(id)) {
            return Ok(Vec::new());
        }

        let query_vector = self.embed_query(query).await?;
        Ok(self.rank(&query_vector, k, filter))
    }

    /// Embed and normalize a query
    pub async fn embed_query(&self, query: &str) -> Result<Array1<f32>, IndexError> {
        self.embedder.embed_query(query).await
    }

    /// Rank stored rows that pass `filter` against a normalized query vector
    pub fn rank<F>(&self, query: &Array1<f32>, k: usize, filter: F) -> Vec<SearchHit>
    where
        F: Fn(DocumentId) -> bool,
    {
        if query.len() != self.dimension || self.is_empty() {
            return Vec::new();
        }

        let scores = self.vectors.dot(query);
        let mut candidates: Vec<(usize, f32)> = scores
            .iter()
            .enumerate()
            .filter(|(i, _)| filter(self.doc_ids[*i]))
            .map(|(i, s)| (i, s.clamp(-1.0, 1.0)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        candidates.truncate(k);

        candidates
            .into_iter()
            .map(|(i, score)| SearchHit {
                text: self.texts[i].clone(),
                score,
                document_id: self.doc_ids[i],
            })
            .collect()
    }

    /// Drop every chunk of `document_id`, returning how many were removed
    pub fn remove_document(&mut self, document_id: DocumentId) -> usize {
        let keep: Vec<usize> = (0..self.doc_ids.len())
            .filter(|&i| self.doc_ids[i] != document_id)
            .collect();
        let removed = self.doc_ids.len() - keep.len();
        if removed == 0 {
            return 0;
        }

        self.vectors = self.vectors.select(Axis(0), &keep);
        self.texts = keep.iter().map(|&i| self.texts[i].clone()).collect();
        self.doc_ids = keep.iter().map(|&i| self.doc_ids[i]).collect();
        self.synthetic = keep.iter().map(|&i| self.synthetic[i]).collect();

        info!("Removed {} chunks of document {}", removed, document_id);
        removed
    }

    /// Remove all vectors, keeping the configured dimension
    pub fn clear(&mut self) {
        self.vectors = Array2::zeros((0, self.dimension));
        self.texts.clear();
        self.doc_ids.clear();
        self.synthetic.clear();
    }

    /// Number of distinct documents with at least one chunk
    pub fn document_count(&self) -> usize {
        self.doc_ids.iter().collect::<HashSet<_>>().len()
    }

    pub fn document_ids(&self) -> BTreeSet<DocumentId> {
        self.doc_ids.iter().copied().collect()
    }

    pub fn contains_document(&self, document_id: DocumentId) -> bool {
        self.doc_ids.contains(&document_id)
    }

    /// Get the number of chunks in the index
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn document_id_sequence(&self) -> &[DocumentId] {
        &self.doc_ids
    }

    pub fn health(&self) -> IndexHealth {
        let substituted_rows = self.synthetic.iter().filter(|s| **s).count();
        if substituted_rows == 0 {
            IndexHealth::Healthy
        } else {
            IndexHealth::Degraded { substituted_rows }
        }
    }

    /// L2 norm of every stored row, in insertion order
    pub fn row_norms(&self) -> Vec<f32> {
        self.vectors
            .axis_iter(Axis(0))
            .map(|row| row.dot(&row).sqrt())
            .collect()
    }

    /// Persist to `<stem>.<digest>.vectors` plus `<stem>.meta.json`
    ///
    /// The vector blob is written first under a content-derived name; the
    /// metadata rename is the commit point. Blobs no longer referenced are
    /// removed afterwards.
    pub fn save(&self, stem: &Path) -> Result<(), IndexError> {
        let blob = VectorBlob {
            dimension: self.dimension,
            rows: self.len(),
            data: self.vectors.iter().copied().collect(),
        };
        let bytes = bincode::serialize(&blob)
            .map_err(|e| IndexError::Persistence(format!("failed to encode vectors: {}", e)))?;
        let digest = checksum(&bytes);

        let vectors_path = with_suffix(stem, &format!(".{}{}", &digest[..16], VECTORS_SUFFIX));
        let vectors_file = vectors_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| IndexError::Persistence(format!("invalid stem: {}", stem.display())))?;

        let meta = IndexMetadata {
            format_version: FORMAT_VERSION,
            dimension: self.dimension,
            rows: self.len(),
            model: self.embedder.primary_model.clone(),
            vectors_file,
            vectors_checksum: digest,
            texts: self.texts.clone(),
            document_ids: self.doc_ids.clone(),
            synthetic: self.synthetic.clone(),
            saved_at: Utc::now(),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| IndexError::Persistence(format!("failed to encode metadata: {}", e)))?;

        atomic_write(&vectors_path, &bytes).map_err(|e| IndexError::Io {
            source: e,
            context: format!("Failed to write {}", vectors_path.display()),
        })?;
        let meta_path = with_suffix(stem, META_SUFFIX);
        atomic_write(&meta_path, &meta_bytes).map_err(|e| IndexError::Io {
            source: e,
            context: format!("Failed to write {}", meta_path.display()),
        })?;

        for stale in vector_blobs(stem)? {
            if stale != vectors_path {
                if let Err(e) = std::fs::remove_file(&stale) {
                    warn!("Failed to remove stale vector blob {}: {}", stale.display(), e);
                }
            }
        }

        debug!("Saved {} vectors to {}", self.len(), meta_path.display());
        Ok(())
    }

    /// Load a store saved with [`save`](Self::save)
    ///
    /// Returns `Ok(false)` and leaves the index untouched when nothing was
    /// ever saved at `stem`. A blob without metadata, a missing or corrupted
    /// blob, or a dimension mismatch is an error and also leaves the index
    /// untouched.
    pub fn load(&mut self, stem: &Path) -> Result<bool, IndexError> {
        let meta_path = with_suffix(stem, META_SUFFIX);
        if !meta_path.exists() {
            return match vector_blobs(stem)?.first() {
                None => Ok(false),
                Some(orphan) => Err(IndexError::Persistence(format!(
                    "vector blob {} has no metadata",
                    orphan.display()
                ))),
            };
        }

        let meta_bytes = std::fs::read(&meta_path).map_err(|e| IndexError::Io {
            source: e,
            context: format!("Failed to read {}", meta_path.display()),
        })?;
        let meta: IndexMetadata = serde_json::from_slice(&meta_bytes)
            .map_err(|e| IndexError::Persistence(format!("corrupt metadata: {}", e)))?;

        if meta.format_version != FORMAT_VERSION {
            return Err(IndexError::Persistence(format!(
                "unsupported format version {}",
                meta.format_version
            )));
        }
        if meta.dimension != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: meta.dimension,
            });
        }

        let vectors_path = stem.with_file_name(&meta.vectors_file);
        let bytes = std::fs::read(&vectors_path).map_err(|e| {
            IndexError::Persistence(format!(
                "metadata references unreadable vector blob {}: {}",
                vectors_path.display(),
                e
            ))
        })?;
        if checksum(&bytes) != meta.vectors_checksum {
            return Err(IndexError::Persistence(format!(
                "checksum mismatch for {}",
                vectors_path.display()
            )));
        }

        let blob: VectorBlob = bincode::deserialize(&bytes)
            .map_err(|e| IndexError::Persistence(format!("corrupt vector blob: {}", e)))?;

        let synthetic = if meta.synthetic.is_empty() {
            vec![false; meta.rows]
        } else {
            meta.synthetic
        };
        let consistent = blob.dimension == meta.dimension
            && blob.rows == meta.rows
            && meta.texts.len() == meta.rows
            && meta.document_ids.len() == meta.rows
            && synthetic.len() == meta.rows
            && blob.data.len() == meta.rows * meta.dimension;
        if !consistent {
            return Err(IndexError::Persistence(
                "vector blob and metadata disagree on shape".to_string(),
            ));
        }

        let vectors = Array2::from_shape_vec((blob.rows, blob.dimension), blob.data)
            .map_err(|e| IndexError::Persistence(e.to_string()))?;

        if meta.model != self.embedder.primary_model {
            warn!(
                "Loaded vectors were produced by '{}', current provider is '{}'",
                meta.model, self.embedder.primary_model
            );
        }

        self.vectors = vectors;
        self.texts = meta.texts;
        self.doc_ids = meta.document_ids;
        self.synthetic = synthetic;

        info!(
            "Loaded {} vectors for {} documents from {}",
            self.len(),
            self.document_count(),
            meta_path.display()
        );
        Ok(true)
    }
}

/// Scale `vector` to unit length; `None` for zero or non-finite norms
pub(crate) fn normalize(mut vector: Vec<f32>) -> Option<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }
    for x in &mut vector {
        *x /= norm;
    }
    Some(vector)
}

fn random_unit_vectors(count: usize, dimension: usize) -> Vec<Vec<f32>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| loop {
            let candidate: Vec<f32> = (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
            if let Some(unit) = normalize(candidate) {
                break unit;
            }
        })
        .collect()
}

/// Vector blob files that belong to `stem`
fn vector_blobs(stem: &Path) -> Result<Vec<PathBuf>, IndexError> {
    let dir = match stem.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let prefix = match stem.file_name() {
        Some(name) => format!("{}.", name.to_string_lossy()),
        None => return Ok(Vec::new()),
    };

    let entries = std::fs::read_dir(&dir).map_err(|e| IndexError::Io {
        source: e,
        context: format!("Failed to list {}", dir.display()),
    })?;

    let mut blobs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy())
                .map(|n| n.starts_with(&prefix) && n.ends_with(VECTORS_SUFFIX))
                .unwrap_or(false)
        })
        .collect();
    blobs.sort();
    Ok(blobs)
}
