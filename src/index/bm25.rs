//! BM25 sparse index.
//!
//! Okapi BM25 with `k1 = 1.5`, `b = 0.75` over a lowercased,
//! punctuation-split, stopword-filtered token stream. Raw scores are
//! normalized by the top observed score per query so they combine
//! meaningfully with cosine similarities in hybrid search.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// Tokens this short carry no lexical signal.
const MIN_TOKEN_LEN: usize = 2;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "their", "this", "to", "was", "were", "will",
    "with",
];

/// Lowercase, split on non-alphanumeric, drop stopwords and fragments.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Serializable BM25 index over document token streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bm25Index {
    /// Document ids in insertion order.
    doc_ids: Vec<String>,
    /// Token length per document.
    doc_lens: Vec<u32>,
    /// term -> (doc index, term frequency), doc indices ascending.
    postings: BTreeMap<String, Vec<(u32, u32)>>,
    /// Sum of all document lengths.
    total_len: u64,
}

impl Bm25Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Add a tokenized document. Ids are opaque; adding the same id twice
    /// indexes two documents, so callers dedupe upstream.
    pub fn add(&mut self, id: impl Into<String>, tokens: &[String]) {
        let doc_idx = self.doc_ids.len() as u32;
        self.doc_ids.push(id.into());
        self.doc_lens.push(tokens.len() as u32);
        self.total_len += tokens.len() as u64;

        let mut tf: BTreeMap<&str, u32> = BTreeMap::new();
        for token in tokens {
            *tf.entry(token.as_str()).or_insert(0) += 1;
        }
        for (term, count) in tf {
            self.postings
                .entry(term.to_string())
                .or_default()
                .push((doc_idx, count));
        }
    }

    fn avg_len(&self) -> f32 {
        if self.doc_ids.is_empty() {
            0.0
        } else {
            self.total_len as f32 / self.doc_ids.len() as f32
        }
    }

    fn idf(&self, df: usize) -> f32 {
        let n = self.doc_ids.len() as f32;
        ((n - df as f32 + 0.5) / (df as f32 + 0.5) + 1.0).ln()
    }

    /// Raw BM25 scores for every document matching at least one query
    /// term, ordered by descending score then ascending id.
    pub fn score(&self, query_tokens: &[String]) -> Vec<(String, f32)> {
        if self.doc_ids.is_empty() {
            return Vec::new();
        }

        let avg_len = self.avg_len();
        let mut scores: BTreeMap<u32, f32> = BTreeMap::new();

        for term in query_tokens {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(postings.len());
            for &(doc_idx, tf) in postings {
                let doc_len = self.doc_lens[doc_idx as usize] as f32;
                let tf = tf as f32;
                let score =
                    idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * doc_len / avg_len));
                *scores.entry(doc_idx).or_insert(0.0) += score;
            }
        }

        let mut out: Vec<(String, f32)> = scores
            .into_iter()
            .map(|(idx, score)| (self.doc_ids[idx as usize].clone(), score))
            .collect();
        out.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        out
    }

    /// Scores normalized by the top observed score for the query, as a
    /// lookup map. Documents with no matching term are absent (score 0).
    pub fn score_normalized(&self, query_tokens: &[String]) -> BTreeMap<String, f32> {
        let raw = self.score(query_tokens);
        let top = raw.first().map(|(_, s)| *s).unwrap_or(0.0);
        if top <= 0.0 {
            return BTreeMap::new();
        }
        raw.into_iter().map(|(id, s)| (id, s / top)).collect()
    }
}
