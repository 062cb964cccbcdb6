use super::{RetrievalTier, TierError, TierOutcome};
use crate::corpus::{Corpus, DocumentId};
use crate::embedding::tokenizer::is_stop_word;
use crate::retrieval::{ScoredChunk, SessionScope, TierKind};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Last-resort substring match of query words against document text
pub struct KeywordTier {
    corpus: Arc<RwLock<Corpus>>,
    chunks_per_document: usize,
    max_chunks: usize,
}

impl KeywordTier {
    pub fn new(corpus: Arc<RwLock<Corpus>>, chunks_per_document: usize, max_chunks: usize) -> Self {
        Self {
            corpus,
            chunks_per_document,
            max_chunks,
        }
    }
}

/// Distinct lowercase query words, punctuation trimmed, stop words dropped
///
/// A query made only of stop words and punctuation keeps its raw
/// lowercase words instead, so it can still match.
fn query_tokens(query: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for word in query.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.is_empty() || is_stop_word(&word) || tokens.contains(&word) {
            continue;
        }
        tokens.push(word);
    }

    if tokens.is_empty() {
        for word in query.split_whitespace().map(str::to_lowercase) {
            if !tokens.contains(&word) {
                tokens.push(word);
            }
        }
    }
    tokens
}

#[async_trait]
impl RetrievalTier for KeywordTier {
    fn kind(&self) -> TierKind {
        TierKind::Keyword
    }

    async fn search(
        &self,
        query: &str,
        scope: &SessionScope,
        _k: usize,
    ) -> Result<TierOutcome, TierError> {
        let tokens = query_tokens(query);
        if tokens.is_empty() {
            return Ok(TierOutcome::empty("query has no keywords"));
        }

        let corpus = self.corpus.read().await;
        let mut matches: Vec<(DocumentId, f32)> = scope
            .iter()
            .filter_map(|id| {
                let text = corpus.document_text(id)?.to_lowercase();
                let matched = tokens.iter().filter(|t| text.contains(t.as_str())).count();
                (matched > 0).then(|| (id, matched as f32 / tokens.len() as f32))
            })
            .collect();
        matches.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let chunks: Vec<ScoredChunk> = matches
            .into_iter()
            .flat_map(|(id, score)| {
                corpus
                    .chunks(id)
                    .unwrap_or_default()
                    .iter()
                    .take(self.chunks_per_document)
                    .map(move |text| ScoredChunk::new(text.clone(), score, id, TierKind::Keyword))
            })
            .take(self.max_chunks)
            .collect();

        Ok(TierOutcome::from_chunks(chunks, "no document contains a query keyword"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(documents: Vec<(DocumentId, Vec<&str>)>) -> Arc<RwLock<Corpus>> {
        let mut corpus = Corpus::new();
        for (id, chunks) in documents {
            corpus.ingest(id, chunks.into_iter().map(str::to_string).collect());
        }
        Arc::new(RwLock::new(corpus))
    }

    #[test]
    fn test_query_tokens() {
        assert_eq!(
            query_tokens("What is the Capital of France? capital!"),
            vec!["what", "capital", "france"]
        );
        assert_eq!(query_tokens("The and of ?! the"), vec!["the", "and", "of", "?!"]);
        assert!(query_tokens("   ").is_empty());
    }

    #[tokio::test]
    async fn test_first_chunks_per_document() {
        let corpus = corpus(vec![(1, vec!["alpha one", "alpha two", "alpha three"])]);
        let tier = KeywordTier::new(corpus, 2, 6);

        let TierOutcome::Found(chunks) = tier
            .search("three", &SessionScope::from_ids([1]), 5)
            .await
            .unwrap()
        else {
            panic!("expected keyword match");
        };
        // The leading chunks are emitted even though the match is in the third.
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha one", "alpha two"]);
    }

    #[tokio::test]
    async fn test_score_is_matched_fraction_and_capped() {
        let corpus = corpus(vec![
            (1, vec!["red apples", "green apples"]),
            (2, vec!["red cars", "blue cars"]),
            (3, vec!["red and ripe apples", "more"]),
            (4, vec!["apples", "pears"]),
        ]);
        let tier = KeywordTier::new(corpus, 2, 5);

        let TierOutcome::Found(chunks) = tier
            .search("red apples", &SessionScope::from_ids([1, 2, 3, 4]), 5)
            .await
            .unwrap()
        else {
            panic!("expected keyword match");
        };

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].document_id, 1);
        assert_eq!(chunks[0].score, 1.0);
        assert!(chunks.iter().any(|c| c.document_id == 2 && c.score == 0.5));
        for pair in chunks.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_no_match() {
        let corpus = corpus(vec![(1, vec!["nothing relevant here"])]);
        let tier = KeywordTier::new(corpus, 2, 6);
        let outcome = tier
            .search("zebra", &SessionScope::from_ids([1]), 5)
            .await
            .unwrap();
        assert!(matches!(outcome, TierOutcome::Empty(_)));
    }

    #[tokio::test]
    async fn test_stop_word_query_still_matches() {
        let corpus = corpus(vec![
            (1, vec!["The river bends here", "second"]),
            (2, vec!["nothing relevant"]),
        ]);
        let tier = KeywordTier::new(corpus, 2, 6);

        let TierOutcome::Found(chunks) = tier
            .search("the", &SessionScope::from_ids([1, 2]), 5)
            .await
            .unwrap()
        else {
            panic!("expected a stop-word query to match");
        };
        assert!(chunks.iter().all(|c| c.document_id == 1));
        assert_eq!(chunks[0].score, 1.0);
    }
}
