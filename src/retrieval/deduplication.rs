//! Result deduplication by document

use crate::retrieval::ScoredChunk;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Keep the highest-scored chunk of each document, best first
///
/// Equal scores keep their input order.
pub fn deduplicate_by_document(mut chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.document_id))
        .collect()
}
