//! Scored chunks and the tier that produced them

use crate::corpus::DocumentId;
use crate::embedding::tokenizer::truncate_with_ellipsis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retrieval strategy that accepted a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Vector,
    Lexical,
    Keyword,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Vector => "vector",
            TierKind::Lexical => "lexical",
            TierKind::Keyword => "keyword",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk with relevance score and the document it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// Chunk text, or the best-matching snippet for lexical results
    pub text: String,

    /// Relevance score, higher is better; cosine in [-1, 1] for vector and
    /// lexical results, matched-token ratio for keyword results
    pub score: f32,

    pub document_id: DocumentId,

    pub tier: TierKind,
}

impl ScoredChunk {
    pub fn new(text: String, score: f32, document_id: DocumentId, tier: TierKind) -> Self {
        Self {
            text,
            score,
            document_id,
            tier,
        }
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_with_ellipsis(&self.text, max_chars)
    }
}

/// One cited document in an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub document_id: DocumentId,
    pub snippet: String,
    pub score: f32,
}

impl SourceAttribution {
    pub fn from_chunk(chunk: &ScoredChunk, max_chars: usize) -> Self {
        Self {
            document_id: chunk.document_id,
            snippet: chunk.preview(max_chars),
            score: chunk.score,
        }
    }
}
