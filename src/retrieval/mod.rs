//! Retrieval orchestration.
//!
//! Routes each proposal to a retrieval strategy over the vector store and
//! the knowledge graph, merges and deduplicates the results, enforces a
//! quality gate with one expansion pass, and synthesizes the surviving
//! hits into a token-budgeted context bundle for the council.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RetrievalSettings;
use crate::corpus::{content_hash, estimate_tokens, match_categories, ChunkKind, PolicyCategory};
use crate::error::RetrievalError;
use crate::graph::KnowledgeGraph;
use crate::index::{Hit, MetadataFilter, SearchMode, SearchWeights, VectorStore};

/// Minimum merged hits for the quality gate.
const MIN_HITS: usize = 5;
/// Minimum mean score over the top five hits.
const MIN_TOP5_MEAN: f32 = 0.35;
/// A category with at least this many graph chunks is a specialist domain.
const SPECIALIST_THRESHOLD: usize = 50;
/// Graph categories consulted per query.
const MAX_GRAPH_CATEGORIES: usize = 3;

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Vector store only (graph unavailable).
    VectorOnly,
    /// Graph only (no dense index).
    GraphOnly,
    /// Both sources, merged. The default.
    Hybrid,
    /// Graph seeds the result set, vector search broadens it.
    GraphFirst,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::VectorOnly => write!(f, "vector_only"),
            Strategy::GraphOnly => write!(f, "graph_only"),
            Strategy::Hybrid => write!(f, "hybrid"),
            Strategy::GraphFirst => write!(f, "graph_first"),
        }
    }
}

/// Proposal complexity estimate, by word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Features extracted from a proposal for routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFeatures {
    /// The proposal text used as the query.
    pub query_text: String,
    /// Categories matched by keyword and synonym scan.
    pub category_tags: Vec<PolicyCategory>,
    /// Size-based complexity estimate.
    pub complexity: Complexity,
}

/// Which source produced a merged hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Vector,
    Graph,
    Both,
}

/// A merged, deduplicated retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedHit {
    /// The underlying chunk.
    pub hit: Hit,
    /// Source attribution after the merge.
    pub source: HitSource,
}

/// Retrieval quality numbers recorded on the assessment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    /// Merged hit count.
    pub hit_count: usize,
    /// Mean score of the top five hits.
    pub top5_mean: f32,
    /// Whether the expansion pass ran.
    pub expanded: bool,
}

/// A source reference emitted with the context bundle. Citations in the
/// synthesis refer back to these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Chunk id.
    pub chunk_id: String,
    /// Source document id.
    pub document_id: String,
}

/// The labeled, token-budgeted context handed to the council.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Rendered context text.
    pub text: String,
    /// Every source included in the text, in emission order.
    pub sources: Vec<SourceRef>,
    /// Token estimate of the rendered text.
    pub token_count: usize,
}

impl ContextBundle {
    /// Whether any context survived synthesis.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Full outcome of a retrieval pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Strategy that ran.
    pub strategy: Strategy,
    /// Extracted features.
    pub features: QueryFeatures,
    /// Merged hits, best first.
    pub hits: Vec<MergedHit>,
    /// Gate metrics.
    pub metrics: RetrievalMetrics,
    /// Synthesized context.
    pub context: ContextBundle,
}

/// Extract routing features from a proposal.
pub fn extract_features(proposal: &str) -> QueryFeatures {
    let words = proposal.split_whitespace().count();
    let complexity = if words < 200 {
        Complexity::Low
    } else if words > 500 {
        Complexity::High
    } else {
        Complexity::Medium
    };
    QueryFeatures {
        query_text: proposal.to_string(),
        category_tags: match_categories(proposal),
        complexity,
    }
}

/// Retrieval orchestrator over the shared store and graph.
pub struct Retriever {
    store: Arc<RwLock<VectorStore>>,
    graph: Arc<RwLock<KnowledgeGraph>>,
    settings: RetrievalSettings,
}

impl Retriever {
    /// Create a retriever over shared read-many structures.
    pub fn new(
        store: Arc<RwLock<VectorStore>>,
        graph: Arc<RwLock<KnowledgeGraph>>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            graph,
            settings,
        }
    }

    /// Pick the strategy for a proposal given its features and filter.
    pub async fn route(&self, features: &QueryFeatures, filter: &MetadataFilter) -> Strategy {
        let store_empty = self.store.read().await.is_empty();
        let graph = self.graph.read().await;
        let graph_empty = graph.chunk_count() == 0;

        if graph_empty && store_empty {
            return Strategy::VectorOnly;
        }
        if store_empty {
            return Strategy::GraphOnly;
        }
        if graph_empty {
            return Strategy::VectorOnly;
        }
        // Specialist domain: the classified category is densely covered in
        // the graph, so seed from it before broadening.
        if let Some(&top) = features.category_tags.first() {
            if graph.category_chunk_count(top) >= SPECIALIST_THRESHOLD {
                return Strategy::GraphFirst;
            }
        }
        // Hybrid needs an entry point into the graph: a keyword-tagged
        // proposal or an explicit category filter. Without either, only
        // the vector store can contribute.
        if !features.category_tags.is_empty() || !filter.categories.is_empty() {
            Strategy::Hybrid
        } else {
            Strategy::VectorOnly
        }
    }

    /// Run retrieval end to end: route, retrieve, merge, gate (with one
    /// expansion), synthesize. Fails with [`RetrievalError::Insufficient`]
    /// when the gate fails twice, and [`RetrievalError::BudgetExceeded`]
    /// when the hard search budget elapses.
    pub async fn retrieve(
        &self,
        proposal: &str,
        filter: &MetadataFilter,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let budget = Duration::from_millis(self.settings.search_budget_ms);
        tokio::time::timeout(budget, self.retrieve_inner(proposal, filter))
            .await
            .map_err(|_| RetrievalError::BudgetExceeded {
                budget_ms: self.settings.search_budget_ms,
            })?
    }

    async fn retrieve_inner(
        &self,
        proposal: &str,
        filter: &MetadataFilter,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let features = extract_features(proposal);
        let strategy = self.route(&features, filter).await;
        info!(strategy = %strategy, tags = features.category_tags.len(), "Retrieval routed");

        let top_k = self.settings.top_k;
        let mut hits = self.pass(&features, strategy, top_k, filter).await;
        let mut metrics = gate_metrics(&hits);
        let mut expanded = false;

        if !gate_passes(&metrics) {
            // One expansion: double top_k, relax the year filter by two
            // years each way, retry once.
            expanded = true;
            let relaxed = filter.relax_years(2);
            debug!(
                hits = metrics.hit_count,
                top5_mean = metrics.top5_mean,
                "Quality gate failed, expanding retrieval"
            );
            hits = self.pass(&features, strategy, top_k * 2, &relaxed).await;
            metrics = gate_metrics(&hits);
        }
        metrics.expanded = expanded;

        if !gate_passes(&metrics) {
            warn!(
                hits = metrics.hit_count,
                top5_mean = metrics.top5_mean,
                "Retrieval insufficient after expansion"
            );
            return Err(RetrievalError::Insufficient {
                hits: metrics.hit_count,
                mean_score: metrics.top5_mean as f64,
            });
        }

        let context = self
            .synthesize(&hits, self.settings.context_token_budget)
            .await;

        Ok(RetrievalOutcome {
            strategy,
            features,
            hits,
            metrics,
            context,
        })
    }

    /// One retrieval pass: invoke the sources the strategy names (both run
    /// concurrently for hybrid), then merge and dedupe.
    async fn pass(
        &self,
        features: &QueryFeatures,
        strategy: Strategy,
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Vec<MergedHit> {
        let run_vector = !matches!(strategy, Strategy::GraphOnly);
        let run_graph = !matches!(strategy, Strategy::VectorOnly);

        let vector_future = async {
            if !run_vector {
                return Vec::new();
            }
            let store = self.store.read().await;
            match store
                .search(
                    &features.query_text,
                    top_k,
                    SearchMode::Hybrid,
                    SearchWeights {
                        dense: self.settings.dense_weight,
                        sparse: self.settings.sparse_weight,
                    },
                    filter,
                )
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "Vector search failed, continuing with graph only");
                    Vec::new()
                }
            }
        };

        // Graph entry points: keyword tags plus any explicit filter
        // categories.
        let mut tags = features.category_tags.clone();
        for &category in &filter.categories {
            if !tags.contains(&category) {
                tags.push(category);
            }
        }

        let graph_future = async {
            if !run_graph {
                return Vec::new();
            }
            self.graph_hits(&tags, top_k).await
        };

        let (vector_hits, graph_hits) = tokio::join!(vector_future, graph_future);
        merge_hits(vector_hits, graph_hits, top_k.max(MIN_HITS))
    }

    /// Graph retrieval: chunks attached to the query's categories, then
    /// multi-hop neighbors of the best seeds, scored by traversal rank
    /// and hydrated with content from the store.
    async fn graph_hits(&self, tags: &[PolicyCategory], top_k: usize) -> Vec<(Hit, f32)> {
        let graph = self.graph.read().await;
        let store = self.store.read().await;

        let mut ordered: Vec<String> = Vec::new();
        for &category in tags.iter().take(MAX_GRAPH_CATEGORIES) {
            for chunk_id in graph.chunks_by_category(category, top_k) {
                if !ordered.contains(&chunk_id) {
                    ordered.push(chunk_id);
                }
            }
        }

        // Broaden through the graph: two-hop neighbors of the top seeds
        // surface indirectly related chunks the category edges miss.
        let seeds: Vec<String> = ordered.iter().take(3).cloned().collect();
        for seed in seeds {
            if ordered.len() >= top_k {
                break;
            }
            for related in graph.related(&seed, 2) {
                if ordered.len() >= top_k {
                    break;
                }
                if !ordered.contains(&related.chunk_id) {
                    ordered.push(related.chunk_id);
                }
            }
        }
        ordered.truncate(top_k);

        let total = ordered.len();
        ordered
            .into_iter()
            .enumerate()
            .filter_map(|(rank, chunk_id)| {
                let chunk = store.get(&chunk_id)?;
                // Rank-based score so normalization has a spread.
                let score = (total - rank) as f32 / total as f32;
                Some((
                    Hit {
                        chunk_id: chunk.id.clone(),
                        kind: chunk.kind,
                        content: chunk.content.clone(),
                        metadata: chunk.metadata.clone(),
                        source_document_id: chunk.source_document_id.clone(),
                        score,
                        dense_score: 0.0,
                        sparse_score: 0.0,
                    },
                    score,
                ))
            })
            .collect()
    }

    /// Group the hits by kind (category, then analysis, then evidence),
    /// dedupe by normalized content hash, and emit a labeled bundle
    /// within the token budget, keeping the highest-scoring per group.
    pub async fn synthesize(&self, hits: &[MergedHit], token_budget: usize) -> ContextBundle {
        let mut groups: BTreeMap<u8, Vec<&MergedHit>> = BTreeMap::new();
        let mut seen_hashes: Vec<String> = Vec::new();

        for merged in hits {
            let hash = content_hash(&merged.hit.content);
            if seen_hashes.contains(&hash) {
                continue;
            }
            seen_hashes.push(hash);
            let group = match merged.hit.kind {
                ChunkKind::Category => 0,
                ChunkKind::Analysis => 1,
                ChunkKind::Evidence => 2,
            };
            groups.entry(group).or_default().push(merged);
        }

        let mut text = String::from("RELEVANT CONTEXT FOR IMPACT ASSESSMENT\n");
        let mut sources = Vec::new();
        let mut used_tokens = estimate_tokens(&text);

        for (group, label) in [
            (0u8, "CATEGORY FRAMING"),
            (1u8, "ANALYSIS PATTERNS"),
            (2u8, "SUPPORTING EVIDENCE"),
        ] {
            let Some(members) = groups.get_mut(&group) else {
                continue;
            };
            members.sort_by(|a, b| {
                b.hit
                    .score
                    .partial_cmp(&a.hit.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.hit.chunk_id.cmp(&b.hit.chunk_id))
            });

            let header = format!("\n==== {} ====\n", label);
            let header_tokens = estimate_tokens(&header);
            let mut wrote_header = false;

            for merged in members.iter() {
                let entry = format!(
                    "[{} | {}]\n{}\n",
                    merged.hit.chunk_id, merged.hit.source_document_id, merged.hit.content
                );
                let entry_tokens = estimate_tokens(&entry);
                let overhead = if wrote_header { 0 } else { header_tokens };
                if used_tokens + overhead + entry_tokens > token_budget {
                    continue;
                }
                if !wrote_header {
                    text.push_str(&header);
                    used_tokens += header_tokens;
                    wrote_header = true;
                }
                let _ = write!(text, "{}", entry);
                used_tokens += entry_tokens;
                sources.push(SourceRef {
                    chunk_id: merged.hit.chunk_id.clone(),
                    document_id: merged.hit.source_document_id.clone(),
                });
            }
        }

        ContextBundle {
            token_count: used_tokens,
            text,
            sources,
        }
    }
}

fn gate_metrics(hits: &[MergedHit]) -> RetrievalMetrics {
    let top5: Vec<f32> = hits.iter().take(5).map(|h| h.hit.score).collect();
    let top5_mean = if top5.is_empty() {
        0.0
    } else {
        top5.iter().sum::<f32>() / top5.len() as f32
    };
    RetrievalMetrics {
        hit_count: hits.len(),
        top5_mean,
        expanded: false,
    }
}

fn gate_passes(metrics: &RetrievalMetrics) -> bool {
    metrics.hit_count >= MIN_HITS && metrics.top5_mean >= MIN_TOP5_MEAN
}

/// Union by chunk id. Each hit's final score is the max of its
/// (min-max normalized) vector and graph scores; sources that saw the
/// same chunk are attributed `Both`. Order: score desc, chunk id asc.
fn merge_hits(vector: Vec<Hit>, graph: Vec<(Hit, f32)>, limit: usize) -> Vec<MergedHit> {
    let vector_norm = min_max(vector.iter().map(|h| h.score).collect());
    let graph_norm = min_max(graph.iter().map(|(_, s)| *s).collect());

    let mut merged: BTreeMap<String, MergedHit> = BTreeMap::new();

    for (hit, score) in vector.into_iter().zip(vector_norm) {
        let mut hit = hit;
        hit.score = score;
        merged.insert(
            hit.chunk_id.clone(),
            MergedHit {
                hit,
                source: HitSource::Vector,
            },
        );
    }
    for ((hit, _), score) in graph.into_iter().zip(graph_norm) {
        match merged.get_mut(&hit.chunk_id) {
            Some(existing) => {
                existing.source = HitSource::Both;
                if score > existing.hit.score {
                    existing.hit.score = score;
                }
            }
            None => {
                let mut hit = hit;
                hit.score = score;
                merged.insert(
                    hit.chunk_id.clone(),
                    MergedHit {
                        hit,
                        source: HitSource::Graph,
                    },
                );
            }
        }
    }

    let mut out: Vec<MergedHit> = merged.into_values().collect();
    out.sort_by(|a, b| {
        b.hit
            .score
            .partial_cmp(&a.hit.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.hit.chunk_id.cmp(&b.hit.chunk_id))
    });
    out.truncate(limit * 2);
    out
}

/// Min-max normalize into [0, 1]; a constant list maps to 1.0.
fn min_max(scores: Vec<f32>) -> Vec<f32> {
    if scores.is_empty() {
        return scores;
    }
    let min = scores.iter().cloned().fold(f32::MAX, f32::min);
    let max = scores.iter().cloned().fold(f32::MIN, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.into_iter().map(|s| (s - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, ChunkMetadata};
    use crate::embedding::HashEmbedder;

    fn hit(id: &str, kind: ChunkKind, score: f32) -> Hit {
        Hit {
            chunk_id: id.to_string(),
            kind,
            content: format!("content of {}", id),
            metadata: ChunkMetadata::default(),
            source_document_id: "doc".to_string(),
            score,
            dense_score: score,
            sparse_score: 0.0,
        }
    }

    #[test]
    fn test_extract_features_tags_and_complexity() {
        let features = extract_features("A short framework for AI governance");
        assert!(features.category_tags.contains(&PolicyCategory::Digital));
        assert_eq!(features.complexity, Complexity::Low);

        let long = "word ".repeat(600);
        assert_eq!(extract_features(&long).complexity, Complexity::High);
    }

    #[test]
    fn test_merge_dedupes_and_takes_max() {
        let vector = vec![hit("a", ChunkKind::Analysis, 0.9), hit("b", ChunkKind::Analysis, 0.5)];
        let graph = vec![
            (hit("b", ChunkKind::Analysis, 1.0), 1.0),
            (hit("c", ChunkKind::Analysis, 0.5), 0.5),
        ];
        let merged = merge_hits(vector, graph, 10);
        assert_eq!(merged.len(), 3);
        let b = merged.iter().find(|m| m.hit.chunk_id == "b").unwrap();
        assert_eq!(b.source, HitSource::Both);
        // Graph saw b at the top of its range, so the max wins.
        assert!(b.hit.score >= 0.99);
    }

    #[test]
    fn test_min_max_constant_maps_to_one() {
        assert_eq!(min_max(vec![0.8, 0.8]), vec![1.0, 1.0]);
        assert!(min_max(Vec::new()).is_empty());
        let normalized = min_max(vec![1.0, 3.0, 5.0]);
        assert_eq!(normalized, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_gate_thresholds() {
        let hits: Vec<MergedHit> = (0..5)
            .map(|i| MergedHit {
                hit: hit(&format!("h{}", i), ChunkKind::Analysis, 0.5),
                source: HitSource::Vector,
            })
            .collect();
        assert!(gate_passes(&gate_metrics(&hits)));

        let weak: Vec<MergedHit> = hits.iter().take(2).cloned().collect();
        assert!(!gate_passes(&gate_metrics(&weak)));
    }

    async fn seeded_retriever() -> Retriever {
        let mut store = VectorStore::new(Arc::new(HashEmbedder::new(256)));
        let chunks: Vec<Chunk> = (0..8)
            .map(|i| {
                Chunk::new(
                    format!("dig-{}", i),
                    ChunkKind::Analysis,
                    format!("AI governance framework analysis variant {}", i),
                    format!("doc-{}", i),
                )
                .with_categories(vec![PolicyCategory::Digital])
            })
            .collect();
        store.add(&chunks).await.unwrap();
        let graph = KnowledgeGraph::build_from_chunks(&chunks);
        Retriever::new(
            Arc::new(RwLock::new(store)),
            Arc::new(RwLock::new(graph)),
            RetrievalSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_route_defaults_to_hybrid() {
        let retriever = seeded_retriever().await;
        let features = extract_features("AI regulation for algorithmic systems");
        let strategy = retriever.route(&features, &MetadataFilter::default()).await;
        assert_eq!(strategy, Strategy::Hybrid);
    }

    #[tokio::test]
    async fn test_route_vector_only_without_graph() {
        let mut store = VectorStore::new(Arc::new(HashEmbedder::new(64)));
        store
            .add(&[Chunk::new("x", ChunkKind::Analysis, "some text", "d")])
            .await
            .unwrap();
        let retriever = Retriever::new(
            Arc::new(RwLock::new(store)),
            Arc::new(RwLock::new(KnowledgeGraph::new())),
            RetrievalSettings::default(),
        );
        let features = extract_features("anything at all");
        assert_eq!(
            retriever.route(&features, &MetadataFilter::default()).await,
            Strategy::VectorOnly
        );
    }

    #[tokio::test]
    async fn test_route_graph_first_for_specialist_domain() {
        let chunks: Vec<Chunk> = (0..55)
            .map(|i| {
                Chunk::new(
                    format!("env-{:02}", i),
                    ChunkKind::Analysis,
                    format!("climate impact assessment {}", i),
                    "doc-env",
                )
                .with_categories(vec![PolicyCategory::Environment])
            })
            .collect();
        let mut store = VectorStore::new(Arc::new(HashEmbedder::new(64)));
        store.add(&chunks).await.unwrap();
        let graph = KnowledgeGraph::build_from_chunks(&chunks);
        let retriever = Retriever::new(
            Arc::new(RwLock::new(store)),
            Arc::new(RwLock::new(graph)),
            RetrievalSettings::default(),
        );
        let features = extract_features("restoring the climate and ecosystem resilience");
        assert_eq!(
            retriever.route(&features, &MetadataFilter::default()).await,
            Strategy::GraphFirst
        );
    }

    #[tokio::test]
    async fn test_retrieve_passes_gate_on_seeded_corpus() {
        let retriever = seeded_retriever().await;
        let outcome = retriever
            .retrieve("AI governance framework regulation", &MetadataFilter::default())
            .await
            .unwrap();
        assert!(outcome.metrics.hit_count >= 5);
        assert!(outcome.metrics.top5_mean >= 0.35);
        assert!(!outcome.context.is_empty());
    }

    #[tokio::test]
    async fn test_empty_corpus_surfaces_insufficient() {
        let retriever = Retriever::new(
            Arc::new(RwLock::new(VectorStore::new(Arc::new(HashEmbedder::new(64))))),
            Arc::new(RwLock::new(KnowledgeGraph::new())),
            RetrievalSettings::default(),
        );
        let err = retriever
            .retrieve("a proposal about anything", &MetadataFilter::default())
            .await
            .unwrap_err();
        match err {
            RetrievalError::Insufficient { hits, .. } => assert_eq!(hits, 0),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_synthesize_groups_and_budgets() {
        let retriever = seeded_retriever().await;
        let hits = vec![
            MergedHit {
                hit: hit("cat-a", ChunkKind::Category, 0.9),
                source: HitSource::Vector,
            },
            MergedHit {
                hit: hit("an-a", ChunkKind::Analysis, 0.8),
                source: HitSource::Vector,
            },
            MergedHit {
                hit: hit("ev-a", ChunkKind::Evidence, 0.7),
                source: HitSource::Graph,
            },
        ];
        let bundle = retriever.synthesize(&hits, 8192).await;
        assert_eq!(bundle.sources.len(), 3);
        let cat = bundle.text.find("CATEGORY FRAMING").unwrap();
        let an = bundle.text.find("ANALYSIS PATTERNS").unwrap();
        let ev = bundle.text.find("SUPPORTING EVIDENCE").unwrap();
        assert!(cat < an && an < ev);

        // A tiny budget keeps the bundle nearly empty.
        let tight = retriever.synthesize(&hits, 10).await;
        assert!(tight.sources.len() < 3);
    }

    #[tokio::test]
    async fn test_synthesize_dedupes_identical_content() {
        let retriever = seeded_retriever().await;
        let mut a = hit("dup-1", ChunkKind::Analysis, 0.9);
        let mut b = hit("dup-2", ChunkKind::Analysis, 0.8);
        a.content = "Exactly the same words".to_string();
        b.content = "exactly   the same words".to_string();
        let hits = vec![
            MergedHit { hit: a, source: HitSource::Vector },
            MergedHit { hit: b, source: HitSource::Vector },
        ];
        let bundle = retriever.synthesize(&hits, 8192).await;
        assert_eq!(bundle.sources.len(), 1);
        assert_eq!(bundle.sources[0].chunk_id, "dup-1");
    }
}
