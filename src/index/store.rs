//! Hybrid vector store.
//!
//! Unifies the embedding provider, the BM25 sparse index, and a metadata
//! catalog. Adds are idempotent by chunk id and normalized content hash;
//! search never fails on an empty corpus. Persistence writes each
//! artifact new-then-rename so a crash never leaves a torn store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::bm25::{tokenize, Bm25Index};
use crate::corpus::{Chunk, ChunkKind, ChunkMetadata, PolicyCategory};
use crate::embedding::Embedder;
use crate::error::{StorageError, StorageResult};

/// Candidate window multiplier for post-scoring metadata filtering.
const FILTER_WINDOW: usize = 5;

/// Search mode for the hybrid store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Dense cosine similarity only.
    Dense,
    /// BM25 only.
    Sparse,
    /// Weighted combination of both.
    #[default]
    Hybrid,
}

/// Weights for hybrid scoring. Clamped non-negative; a single-signal
/// mode zeroes the other weight internally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWeights {
    /// Weight on cosine similarity.
    pub dense: f32,
    /// Weight on normalized BM25.
    pub sparse: f32,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            dense: 0.7,
            sparse: 0.3,
        }
    }
}

impl SearchWeights {
    /// Effective weights for a mode: clamp negatives, zero the signal a
    /// single-signal mode excludes.
    pub fn effective(&self, mode: SearchMode) -> (f32, f32) {
        let dense = self.dense.max(0.0);
        let sparse = self.sparse.max(0.0);
        match mode {
            SearchMode::Dense => (dense.max(f32::EPSILON), 0.0),
            SearchMode::Sparse => (0.0, sparse.max(f32::EPSILON)),
            SearchMode::Hybrid => (dense, sparse),
        }
    }
}

/// Conjunctive metadata filter. List-valued fields match any-of.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Exact jurisdiction match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    /// Exact document-type match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    /// Inclusive year range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_range: Option<(i32, i32)>,
    /// Any of these categories.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<PolicyCategory>,
    /// Restrict to one chunk kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChunkKind>,
}

impl MetadataFilter {
    /// Whether the filter constrains anything at all.
    pub fn is_empty(&self) -> bool {
        self.jurisdiction.is_none()
            && self.document_type.is_none()
            && self.year_range.is_none()
            && self.categories.is_empty()
            && self.kind.is_none()
    }

    /// Widen the year range by `years` on both ends. No-op without a
    /// year constraint.
    pub fn relax_years(&self, years: i32) -> Self {
        let mut relaxed = self.clone();
        if let Some((lo, hi)) = relaxed.year_range {
            relaxed.year_range = Some((lo - years, hi + years));
        }
        relaxed
    }

    fn matches(&self, kind: ChunkKind, metadata: &ChunkMetadata) -> bool {
        if let Some(want) = self.kind {
            if kind != want {
                return false;
            }
        }
        if let Some(ref want) = self.jurisdiction {
            if metadata.jurisdiction.as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        if let Some(ref want) = self.document_type {
            if metadata.document_type.as_deref() != Some(want.as_str()) {
                return false;
            }
        }
        if let Some((lo, hi)) = self.year_range {
            match metadata.year {
                Some(year) if year >= lo && year <= hi => {}
                _ => return false,
            }
        }
        if !self.categories.is_empty()
            && !self
                .categories
                .iter()
                .any(|c| metadata.categories.contains(c))
        {
            return false;
        }
        true
    }
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    /// Chunk id.
    pub chunk_id: String,
    /// Chunk kind.
    pub kind: ChunkKind,
    /// Chunk content.
    pub content: String,
    /// Chunk metadata.
    pub metadata: ChunkMetadata,
    /// Source document id.
    pub source_document_id: String,
    /// Combined score used for ranking.
    pub score: f32,
    /// Cosine component.
    pub dense_score: f32,
    /// Normalized BM25 component.
    pub sparse_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    chunk: Chunk,
    tokens: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    entry_count: usize,
    embedding_dim: usize,
    created_at: String,
}

/// Hybrid vector store over the chunk corpus.
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    entries: Vec<StoredEntry>,
    dense: Vec<Vec<f32>>,
    bm25: Bm25Index,
    id_index: BTreeMap<String, usize>,
    content_hashes: BTreeSet<String>,
}

impl VectorStore {
    /// Create an empty store on top of an embedding provider.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
            dense: Vec::new(),
            bm25: Bm25Index::new(),
            id_index: BTreeMap::new(),
            content_hashes: BTreeSet::new(),
        }
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a chunk id is present.
    pub fn contains(&self, chunk_id: &str) -> bool {
        self.id_index.contains_key(chunk_id)
    }

    /// Fetch a chunk by id.
    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.id_index
            .get(chunk_id)
            .map(|&idx| &self.entries[idx].chunk)
    }

    /// All chunk ids, ascending.
    pub fn chunk_ids(&self) -> Vec<String> {
        self.id_index.keys().cloned().collect()
    }

    /// Add chunks: embed, tokenize, record metadata. Idempotent: a chunk
    /// whose id or normalized content hash is already present is skipped.
    /// An embedding failure rolls the whole batch back; the store is
    /// never left partially updated.
    pub async fn add(&mut self, chunks: &[Chunk]) -> StorageResult<usize> {
        let mut fresh: Vec<&Chunk> = Vec::new();
        let mut batch_hashes: BTreeSet<String> = BTreeSet::new();
        for chunk in chunks {
            if let Err(reason) = chunk.validate() {
                return Err(StorageError::Query {
                    message: format!("invalid chunk: {}", reason),
                });
            }
            let hash = chunk.content_hash();
            if self.id_index.contains_key(&chunk.id)
                || self.content_hashes.contains(&hash)
                || !batch_hashes.insert(hash)
            {
                debug!(chunk_id = %chunk.id, "Skipping duplicate chunk");
                continue;
            }
            fresh.push(chunk);
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = fresh.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| StorageError::Query {
                message: format!("embedding failed, batch rolled back: {}", e),
            })?;

        for (chunk, vector) in fresh.iter().zip(vectors) {
            let tokens = tokenize(&chunk.content);
            let idx = self.entries.len();
            self.bm25.add(chunk.id.clone(), &tokens);
            self.id_index.insert(chunk.id.clone(), idx);
            self.content_hashes.insert(chunk.content_hash());
            self.dense.push(vector);
            self.entries.push(StoredEntry {
                chunk: (*chunk).clone(),
                tokens,
            });
        }

        info!(added = fresh.len(), total = self.entries.len(), "Chunks added to vector store");
        Ok(fresh.len())
    }

    /// Search the store. Returns at most `top_k` hits; an empty corpus
    /// yields an empty list. Filtering happens post-scoring over a
    /// `5 * top_k` candidate window with refill until `top_k` hits are
    /// found or candidates run out.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        mode: SearchMode,
        weights: SearchWeights,
        filter: &MetadataFilter,
    ) -> StorageResult<Vec<Hit>> {
        if self.entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let (dense_weight, sparse_weight) = weights.effective(mode);

        let query_vector = if dense_weight > 0.0 {
            let vectors = self
                .embedder
                .embed(&[query.to_string()])
                .await
                .map_err(|e| StorageError::Query {
                    message: format!("query embedding failed: {}", e),
                })?;
            Some(vectors.into_iter().next().unwrap_or_default())
        } else {
            None
        };

        let sparse_scores = if sparse_weight > 0.0 {
            self.bm25.score_normalized(&tokenize(query))
        } else {
            BTreeMap::new()
        };

        let mut scored: Vec<(usize, f32, f32, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let dense = query_vector
                    .as_ref()
                    .map(|qv| cosine(qv, &self.dense[idx]))
                    .unwrap_or(0.0);
                let sparse = sparse_scores
                    .get(&entry.chunk.id)
                    .copied()
                    .unwrap_or(0.0);
                let score = dense_weight * dense + sparse_weight * sparse;
                (idx, score, dense, sparse)
            })
            .collect();

        // Ties break on higher dense score, then ascending id, so results
        // are stable across runs.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| self.entries[a.0].chunk.id.cmp(&self.entries[b.0].chunk.id))
        });

        // Filter post-scoring: walk the top-M window, then keep refilling
        // from the tail until top_k hits are found or candidates run out.
        let window = FILTER_WINDOW.saturating_mul(top_k).max(top_k);
        let mut hits = Vec::with_capacity(top_k);
        for (rank, (idx, score, dense, sparse)) in scored.into_iter().enumerate() {
            if hits.len() >= top_k || (rank >= window && filter.is_empty()) {
                break;
            }
            let entry = &self.entries[idx];
            if !filter.matches(entry.chunk.kind, &entry.chunk.metadata) {
                continue;
            }
            hits.push(Hit {
                chunk_id: entry.chunk.id.clone(),
                kind: entry.chunk.kind,
                content: entry.chunk.content.clone(),
                metadata: entry.chunk.metadata.clone(),
                source_document_id: entry.chunk.source_document_id.clone(),
                score,
                dense_score: dense,
                sparse_score: sparse,
            });
        }
        Ok(hits)
    }

    /// Metadata distribution for operator visibility.
    pub fn stats(&self) -> StoreStats {
        let mut jurisdictions: BTreeMap<String, usize> = BTreeMap::new();
        let mut categories: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &self.entries {
            if let Some(ref j) = entry.chunk.metadata.jurisdiction {
                *jurisdictions.entry(j.clone()).or_insert(0) += 1;
            }
            for category in &entry.chunk.metadata.categories {
                *categories.entry(category.to_string()).or_insert(0) += 1;
            }
        }
        StoreStats {
            entries: self.entries.len(),
            embedding_dim: self.embedder.dim(),
            jurisdictions,
            categories,
        }
    }

    /// Persist all artifacts under `dir`. Each file is written to a
    /// temporary sibling and renamed into place.
    pub fn persist(&self, dir: &Path) -> StorageResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| persist_err(dir, e))?;

        let meta = StoreMeta {
            entry_count: self.entries.len(),
            embedding_dim: self.embedder.dim(),
            created_at: Utc::now().to_rfc3339(),
        };
        write_atomic(&dir.join("metadata.json"), &serde_json::to_vec_pretty(&meta)?)?;
        write_atomic(&dir.join("entries.json"), &serde_json::to_vec(&self.entries)?)?;
        write_atomic(&dir.join("dense_vectors.json"), &serde_json::to_vec(&self.dense)?)?;
        write_atomic(&dir.join("bm25_index.json"), &serde_json::to_vec(&self.bm25)?)?;

        info!(path = %dir.display(), entries = self.entries.len(), "Vector store persisted");
        Ok(())
    }

    /// Load a store persisted by [`VectorStore::persist`].
    pub fn load(dir: &Path, embedder: Arc<dyn Embedder>) -> StorageResult<Self> {
        let meta: StoreMeta = read_json(&dir.join("metadata.json"))?;
        if meta.embedding_dim != embedder.dim() {
            return Err(StorageError::Query {
                message: format!(
                    "stored vectors have dim {} but embedder produces {}",
                    meta.embedding_dim,
                    embedder.dim()
                ),
            });
        }

        let entries: Vec<StoredEntry> = read_json(&dir.join("entries.json"))?;
        let dense: Vec<Vec<f32>> = read_json(&dir.join("dense_vectors.json"))?;
        let bm25: Bm25Index = read_json(&dir.join("bm25_index.json"))?;

        if entries.len() != dense.len() {
            return Err(StorageError::Query {
                message: format!(
                    "store is torn: {} entries, {} vectors",
                    entries.len(),
                    dense.len()
                ),
            });
        }

        let mut id_index = BTreeMap::new();
        let mut content_hashes = BTreeSet::new();
        for (idx, entry) in entries.iter().enumerate() {
            id_index.insert(entry.chunk.id.clone(), idx);
            content_hashes.insert(entry.chunk.content_hash());
        }

        info!(path = %dir.display(), entries = entries.len(), "Vector store loaded");
        Ok(Self {
            embedder,
            entries,
            dense,
            bm25,
            id_index,
            content_hashes,
        })
    }
}

/// Entry counts and metadata distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Total stored chunks.
    pub entries: usize,
    /// Vector dimensionality.
    pub embedding_dim: usize,
    /// Chunk count per jurisdiction.
    pub jurisdictions: BTreeMap<String, usize>,
    /// Chunk count per category.
    pub categories: BTreeMap<String, usize>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let tmp: PathBuf = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| persist_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| persist_err(path, e))?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let bytes = std::fs::read(path).map_err(|e| persist_err(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to parse store artifact");
        StorageError::Json(e)
    })
}

fn persist_err(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Persist {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, ChunkKind};
    use crate::embedding::HashEmbedder;

    fn seed_chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("a", ChunkKind::Analysis, "AI governance framework", "doc-eu-1")
                .with_categories(vec![PolicyCategory::Digital]),
            Chunk::new("b", ChunkKind::Analysis, "biodiversity restoration", "doc-eu-2")
                .with_categories(vec![PolicyCategory::Environment]),
            Chunk::new("c", ChunkKind::Analysis, "data protection", "doc-eu-3")
                .with_categories(vec![PolicyCategory::Digital]),
        ]
    }

    async fn seeded_store() -> VectorStore {
        let mut store = VectorStore::new(Arc::new(HashEmbedder::new(256)));
        store.add(&seed_chunks()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_empty() {
        let store = VectorStore::new(Arc::new(HashEmbedder::new(64)));
        let hits = store
            .search("anything", 5, SearchMode::Hybrid, SearchWeights::default(), &MetadataFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_add_is_idempotent_by_id_and_hash() {
        let mut store = VectorStore::new(Arc::new(HashEmbedder::new(64)));
        let chunks = seed_chunks();
        assert_eq!(store.add(&chunks).await.unwrap(), 3);
        assert_eq!(store.add(&chunks).await.unwrap(), 0);
        assert_eq!(store.len(), 3);

        // Same content under a new id is still a no-op.
        let dup = vec![Chunk::new("a2", ChunkKind::Analysis, "AI Governance   Framework", "doc-eu-1")];
        assert_eq!(store.add(&dup).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hybrid_search_ranks_lexical_match_first() {
        let store = seeded_store().await;
        let hits = store
            .search("AI regulation", 2, SearchMode::Hybrid, SearchWeights::default(), &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "a");
        assert!(hits[0].sparse_score > 0.0);
    }

    #[tokio::test]
    async fn test_sparse_mode_zeroes_dense() {
        let store = seeded_store().await;
        let hits = store
            .search("governance", 3, SearchMode::Sparse, SearchWeights::default(), &MetadataFilter::default())
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.dense_score == 0.0));
        assert_eq!(hits[0].chunk_id, "a");
    }

    #[tokio::test]
    async fn test_category_filter_restricts() {
        let store = seeded_store().await;
        let filter = MetadataFilter {
            categories: vec![PolicyCategory::Environment],
            ..Default::default()
        };
        let hits = store
            .search("restoration of habitats", 5, SearchMode::Hybrid, SearchWeights::default(), &filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "b");
    }

    #[tokio::test]
    async fn test_year_filter_and_relax() {
        let mut store = VectorStore::new(Arc::new(HashEmbedder::new(64)));
        let mut old = Chunk::new("old", ChunkKind::Analysis, "carbon levy analysis", "d1");
        old.metadata.year = Some(2015);
        let mut new = Chunk::new("new", ChunkKind::Analysis, "carbon levy revision", "d2");
        new.metadata.year = Some(2021);
        store.add(&[old, new]).await.unwrap();

        let filter = MetadataFilter {
            year_range: Some((2020, 2022)),
            ..Default::default()
        };
        let hits = store
            .search("carbon levy", 5, SearchMode::Hybrid, SearchWeights::default(), &filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "new");

        let relaxed = filter.relax_years(5);
        let hits = store
            .search("carbon levy", 5, SearchMode::Hybrid, SearchWeights::default(), &relaxed)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_persist_load_roundtrip_identical_hits() {
        let store = seeded_store().await;
        let dir = tempfile::tempdir().unwrap();
        store.persist(dir.path()).unwrap();

        let restored = VectorStore::load(dir.path(), Arc::new(HashEmbedder::new(256))).unwrap();
        assert_eq!(restored.len(), 3);

        let before = store
            .search("AI regulation", 3, SearchMode::Hybrid, SearchWeights::default(), &MetadataFilter::default())
            .await
            .unwrap();
        let after = restored
            .search("AI regulation", 3, SearchMode::Hybrid, SearchWeights::default(), &MetadataFilter::default())
            .await
            .unwrap();
        let ids = |hits: &[Hit]| hits.iter().map(|h| h.chunk_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&before), ids(&after));
    }

    #[tokio::test]
    async fn test_load_rejects_dimension_mismatch() {
        let store = seeded_store().await;
        let dir = tempfile::tempdir().unwrap();
        store.persist(dir.path()).unwrap();
        let result = VectorStore::load(dir.path(), Arc::new(HashEmbedder::new(32)));
        assert!(result.is_err());
    }

    #[test]
    fn test_weights_clamp_and_mode_override() {
        let weights = SearchWeights {
            dense: -0.5,
            sparse: 0.3,
        };
        let (d, s) = weights.effective(SearchMode::Hybrid);
        assert_eq!(d, 0.0);
        assert_eq!(s, 0.3);

        let (d, s) = SearchWeights::default().effective(SearchMode::Dense);
        assert!(d > 0.0);
        assert_eq!(s, 0.0);

        let (d, s) = SearchWeights::default().effective(SearchMode::Sparse);
        assert_eq!(d, 0.0);
        assert!(s > 0.0);
    }

    #[tokio::test]
    async fn test_stats_distribution() {
        let store = seeded_store().await;
        let stats = store.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.categories.get("Digital"), Some(&2));
        assert_eq!(stats.categories.get("Environment"), Some(&1));
    }
}
