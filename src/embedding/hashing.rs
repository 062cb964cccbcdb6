/// Offline hashing embedder
use super::provider::{EmbeddingError, EmbeddingProvider};
use ahash::AHashMap;
use async_trait::async_trait;

/// Deterministic embedding provider with no external dependencies.
///
/// Terms are hashed (FNV-1a) into fixed-dimension buckets and weighted by
/// term frequency, with a second hash choosing the sign so collisions cancel
/// instead of piling up. Not as semantically rich as a neural model, but
/// always available and stable across runs.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::InitializationError(
                "dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn fnv1a(term: &str, seed: u64) -> u64 {
        let mut h: u64 = 0xcbf29ce484222325 ^ seed;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() >= 2)
            .map(|s| s.to_lowercase())
            .collect()
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = Self::tokenize(text);

        if tokens.is_empty() {
            // Term-less input still needs a unit vector to stay indexable.
            let bucket = (Self::fnv1a("", 0) as usize) % self.dimension;
            vector[bucket] = 1.0;
            return vector;
        }

        let mut tf: AHashMap<&str, f32> = AHashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_default() += 1.0;
        }

        let total = tokens.len() as f32;
        for (term, count) in tf {
            let bucket = (Self::fnv1a(term, 0) as usize) % self.dimension;
            let sign = if Self::fnv1a(term, 0x9e3779b97f4a7c15) & 1 == 0 {
                1.0
            } else {
                -1.0
            };
            let idf = 1.0 + (term.len() as f32).ln();
            vector[bucket] += sign * (count / total) * idf;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        } else {
            // Every term cancelled out; fall back to the first token's bucket.
            let bucket = (Self::fnv1a(&tokens[0], 0) as usize) % self.dimension;
            vector[bucket] = 1.0;
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}
