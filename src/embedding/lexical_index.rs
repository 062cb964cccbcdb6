/// In-process TF-IDF index used when vector search is unavailable
use super::tokenizer::{sentences, tokenize, truncate_with_ellipsis};
use crate::corpus::DocumentId;
use ahash::{AHashMap, AHashSet};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Scores at or below this are discarded
pub const MIN_SIMILARITY: f32 = 0.1;
/// Snippet length before the ellipsis is appended
pub const SNIPPET_MAX_CHARS: usize = 200;
/// Sentences this short are never chosen as snippets
const MIN_SENTENCE_CHARS: usize = 20;

/// Search result with representative snippet and cosine score
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub snippet: String,
    pub score: f32,
    pub document_id: DocumentId,
}

#[derive(Debug, Default)]
struct SparseVector {
    weights: AHashMap<String, f32>,
    norm: f32,
}

/// TF-IDF index with cosine ranking and no external dependencies
///
/// Every `add_documents` call recomputes the vocabulary, IDF table and all
/// document vectors from the full corpus.
#[derive(Debug, Default)]
pub struct LocalLexicalIndex {
    documents: BTreeMap<DocumentId, String>,
    idf: AHashMap<String, f32>,
    vectors: BTreeMap<DocumentId, SparseVector>,
}

impl LocalLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace documents, then rebuild
    pub fn add_documents(&mut self, documents: impl IntoIterator<Item = (DocumentId, String)>) {
        self.documents.extend(documents);
        self.rebuild();
    }

    pub fn remove_document(&mut self, document_id: DocumentId) -> bool {
        let removed = self.documents.remove(&document_id).is_some();
        if removed {
            self.rebuild();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.idf.clear();
        self.vectors.clear();
    }

    fn rebuild(&mut self) {
        let tokenized: Vec<(DocumentId, Vec<String>)> = self
            .documents
            .iter()
            .map(|(id, text)| (*id, tokenize(text)))
            .collect();

        let mut document_frequency: AHashMap<&str, usize> = AHashMap::new();
        for (_, tokens) in &tokenized {
            let unique: AHashSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in unique {
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        // Smoothed IDF keeps single-document corpora searchable.
        let total = tokenized.len() as f32;
        self.idf = document_frequency
            .into_iter()
            .map(|(term, df)| {
                let idf = ((1.0 + total) / (1.0 + df as f32)).ln() + 1.0;
                (term.to_string(), idf)
            })
            .collect();

        self.vectors = tokenized
            .iter()
            .map(|(id, tokens)| (*id, self.vectorize(tokens)))
            .collect();
    }

    /// TF x IDF over the known vocabulary; unknown terms are ignored
    fn vectorize(&self, tokens: &[String]) -> SparseVector {
        if tokens.is_empty() {
            return SparseVector::default();
        }

        let mut counts: AHashMap<&str, f32> = AHashMap::new();
        for token in tokens {
            *counts.entry(token.as_str()).or_default() += 1.0;
        }

        let total = tokens.len() as f32;
        let weights: AHashMap<String, f32> = counts
            .into_iter()
            .filter_map(|(term, count)| {
                self.idf
                    .get(term)
                    .map(|idf| (term.to_string(), (count / total) * idf))
            })
            .collect();
        let norm = weights.values().map(|w| w * w).sum::<f32>().sqrt();

        SparseVector { weights, norm }
    }

    fn cosine(a: &SparseVector, b: &SparseVector) -> f32 {
        if a.norm == 0.0 || b.norm == 0.0 {
            return 0.0;
        }
        let (small, large) = if a.weights.len() <= b.weights.len() {
            (a, b)
        } else {
            (b, a)
        };
        let dot: f32 = small
            .weights
            .iter()
            .filter_map(|(term, w)| large.weights.get(term).map(|v| w * v))
            .sum();
        dot / (a.norm * b.norm)
    }

    /// Up to `k` documents scoring above [`MIN_SIMILARITY`], best first
    pub fn search(&self, query: &str, k: usize) -> Vec<LexicalHit> {
        if self.documents.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_tokens = tokenize(query);
        let query_vector = self.vectorize(&query_tokens);

        let mut scored: Vec<(DocumentId, f32)> = self
            .vectors
            .iter()
            .map(|(id, vector)| (*id, Self::cosine(&query_vector, vector)))
            .filter(|(_, score)| *score > MIN_SIMILARITY)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        let query_terms: AHashSet<&str> = query_tokens.iter().map(String::as_str).collect();
        scored
            .into_iter()
            .map(|(document_id, score)| LexicalHit {
                snippet: extract_snippet(&self.documents[&document_id], &query_terms),
                score: score.min(1.0),
                document_id,
            })
            .collect()
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.idf.len()
    }
}

/// The sentence sharing the most terms with the query
fn extract_snippet(text: &str, query_terms: &AHashSet<&str>) -> String {
    let mut best_sentence = "";
    let mut best_overlap = 0;

    for sentence in sentences(text) {
        let trimmed = sentence.trim();
        if trimmed.chars().count() <= MIN_SENTENCE_CHARS {
            continue;
        }
        let tokens = tokenize(trimmed);
        let overlap = tokens
            .iter()
            .map(String::as_str)
            .collect::<AHashSet<_>>()
            .intersection(query_terms)
            .count();
        if overlap > best_overlap {
            best_overlap = overlap;
            best_sentence = trimmed;
        }
    }

    if best_sentence.is_empty() {
        truncate_with_ellipsis(text, SNIPPET_MAX_CHARS)
    } else {
        truncate_with_ellipsis(best_sentence, SNIPPET_MAX_CHARS)
    }
}
