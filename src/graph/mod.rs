//! Policy knowledge graph.
//!
//! A typed directed multigraph over five node kinds: categories, domains,
//! analysis patterns, documents, and chunks. Bidirectional relationships
//! are stored as two directed edges so traversal is O(1) both ways.
//! Traversal is deterministic for a given graph state: adjacency lives in
//! ordered maps and every result carries an explicit sort.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::{AnalysisPattern, Chunk, ChunkKind, Domain, PolicyCategory};
use crate::error::{StorageError, StorageResult};

/// Typed node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeId {
    /// A policy category from the closed set.
    Category(PolicyCategory),
    /// An analytical domain from the closed set.
    Domain(Domain),
    /// An analysis pattern from the closed set.
    Pattern(AnalysisPattern),
    /// A source document.
    Document(String),
    /// A corpus chunk.
    Chunk(String),
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Category(c) => write!(f, "category:{}", c),
            NodeId::Domain(d) => write!(f, "domain:{}", d),
            NodeId::Pattern(p) => write!(f, "pattern:{}", p),
            NodeId::Document(d) => write!(f, "document:{}", d),
            NodeId::Chunk(c) => write!(f, "chunk:{}", c),
        }
    }
}

/// Typed edge kind. Each kind permits a fixed (from, to) node-type pair;
/// bidirectional relationships are two kinds, one per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Category → Domain.
    HasDomain,
    /// Domain → Category.
    BelongsToCategory,
    /// Domain → Pattern, or analysis Chunk → Pattern.
    UsesPattern,
    /// Pattern → Domain.
    AppliesToDomain,
    /// Pattern → Chunk.
    InstantiatedBy,
    /// Document → Chunk.
    ContainsChunk,
    /// Chunk → Document.
    BelongsToDocument,
    /// Category/evidence Chunk → Category.
    ReferencesCategory,
    /// Category → Chunk (category/evidence chunks).
    HasChunk,
    /// Analysis Chunk → Category.
    AnalyzesCategory,
    /// Category → analysis Chunk.
    HasAnalysis,
    /// Evidence Chunk → analysis Chunk.
    SupportsAnalysis,
    /// Analysis Chunk → evidence Chunk.
    SupportedByEvidence,
}

impl EdgeKind {
    fn permits(&self, from: &NodeId, to: &NodeId) -> bool {
        use EdgeKind::*;
        match self {
            HasDomain => matches!((from, to), (NodeId::Category(_), NodeId::Domain(_))),
            BelongsToCategory => matches!((from, to), (NodeId::Domain(_), NodeId::Category(_))),
            UsesPattern => matches!(
                (from, to),
                (NodeId::Domain(_), NodeId::Pattern(_)) | (NodeId::Chunk(_), NodeId::Pattern(_))
            ),
            AppliesToDomain => matches!((from, to), (NodeId::Pattern(_), NodeId::Domain(_))),
            InstantiatedBy => matches!((from, to), (NodeId::Pattern(_), NodeId::Chunk(_))),
            ContainsChunk => matches!((from, to), (NodeId::Document(_), NodeId::Chunk(_))),
            BelongsToDocument => matches!((from, to), (NodeId::Chunk(_), NodeId::Document(_))),
            ReferencesCategory | AnalyzesCategory => {
                matches!((from, to), (NodeId::Chunk(_), NodeId::Category(_)))
            }
            HasChunk | HasAnalysis => {
                matches!((from, to), (NodeId::Category(_), NodeId::Chunk(_)))
            }
            SupportsAnalysis | SupportedByEvidence => {
                matches!((from, to), (NodeId::Chunk(_), NodeId::Chunk(_)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct Edge {
    to: NodeId,
    kind: EdgeKind,
}

/// Chunk payload kept on the graph for ordering and overlap computations.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkNode {
    kind: ChunkKind,
    categories: Vec<PolicyCategory>,
    source_document_id: String,
}

/// A chunk surfaced by graph traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphHit {
    /// Chunk id.
    pub chunk_id: String,
    /// BFS depth at which the chunk was reached (1 = direct neighbor).
    pub depth: usize,
    /// Category overlap with the traversal seed.
    pub category_overlap: usize,
}

/// Serialized form of the graph: explicit node and edge lists, since
/// adjacency keys are typed ids rather than strings.
#[derive(Debug, Serialize, Deserialize)]
struct GraphBlob {
    nodes: Vec<NodeId>,
    edges: Vec<(NodeId, NodeId, EdgeKind)>,
    chunks: BTreeMap<String, ChunkNode>,
}

/// Typed adjacency-list multigraph.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    adjacency: BTreeMap<NodeId, Vec<Edge>>,
    chunks: BTreeMap<String, ChunkNode>,
}

impl KnowledgeGraph {
    /// Create a graph seeded with the closed-set scaffold: all category,
    /// domain, and pattern nodes plus their fixed relationships.
    pub fn new() -> Self {
        let mut graph = Self::default();

        for category in PolicyCategory::ALL {
            graph.adjacency.entry(NodeId::Category(category)).or_default();
            for &domain in category.domains() {
                graph.link(
                    NodeId::Category(category),
                    NodeId::Domain(domain),
                    EdgeKind::HasDomain,
                );
                graph.link(
                    NodeId::Domain(domain),
                    NodeId::Category(category),
                    EdgeKind::BelongsToCategory,
                );
            }
        }
        for domain in Domain::ALL {
            for &pattern in domain.patterns() {
                graph.link(
                    NodeId::Domain(domain),
                    NodeId::Pattern(pattern),
                    EdgeKind::UsesPattern,
                );
                graph.link(
                    NodeId::Pattern(pattern),
                    NodeId::Domain(domain),
                    EdgeKind::AppliesToDomain,
                );
            }
        }
        graph
    }

    /// Build a graph from a chunk corpus.
    pub fn build_from_chunks(chunks: &[Chunk]) -> Self {
        let mut graph = Self::new();
        for chunk in chunks {
            graph.insert_chunk(chunk);
        }
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            chunks = graph.chunks.len(),
            "Knowledge graph built"
        );
        graph
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of directed edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|edges| edges.len()).sum()
    }

    /// Number of chunk nodes.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether a chunk node exists.
    pub fn contains_chunk(&self, chunk_id: &str) -> bool {
        self.chunks.contains_key(chunk_id)
    }

    fn link(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        // Self-loops and mistyped pairs are construction bugs; drop them.
        if from == to || !kind.permits(&from, &to) {
            return;
        }
        self.adjacency.entry(to.clone()).or_default();
        let edges = self.adjacency.entry(from).or_default();
        let edge = Edge { to, kind };
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    }

    /// Insert one chunk: links it to its document, to every category in
    /// its metadata, and (for analysis chunks) to at least one inferred
    /// analysis pattern. Evidence chunks additionally link to analysis
    /// chunks of the same document.
    pub fn insert_chunk(&mut self, chunk: &Chunk) {
        let chunk_node = NodeId::Chunk(chunk.id.clone());
        let doc_node = NodeId::Document(chunk.source_document_id.clone());

        self.chunks.insert(
            chunk.id.clone(),
            ChunkNode {
                kind: chunk.kind,
                categories: chunk.metadata.categories.clone(),
                source_document_id: chunk.source_document_id.clone(),
            },
        );

        self.link(doc_node.clone(), chunk_node.clone(), EdgeKind::ContainsChunk);
        self.link(chunk_node.clone(), doc_node.clone(), EdgeKind::BelongsToDocument);

        for &category in &chunk.metadata.categories {
            let category_node = NodeId::Category(category);
            match chunk.kind {
                ChunkKind::Analysis => {
                    self.link(chunk_node.clone(), category_node.clone(), EdgeKind::AnalyzesCategory);
                    self.link(category_node, chunk_node.clone(), EdgeKind::HasAnalysis);
                }
                ChunkKind::Category | ChunkKind::Evidence => {
                    self.link(chunk_node.clone(), category_node.clone(), EdgeKind::ReferencesCategory);
                    self.link(category_node, chunk_node.clone(), EdgeKind::HasChunk);
                }
            }
        }

        if chunk.kind == ChunkKind::Analysis {
            for pattern in AnalysisPattern::infer(&chunk.content) {
                self.link(chunk_node.clone(), NodeId::Pattern(pattern), EdgeKind::UsesPattern);
                self.link(NodeId::Pattern(pattern), chunk_node.clone(), EdgeKind::InstantiatedBy);
            }
        }

        if chunk.kind == ChunkKind::Evidence {
            // Evidence supports every analysis chunk in the same document.
            let siblings: Vec<String> = self
                .chunks
                .iter()
                .filter(|(id, node)| {
                    node.kind == ChunkKind::Analysis
                        && node.source_document_id == chunk.source_document_id
                        && id.as_str() != chunk.id
                })
                .map(|(id, _)| id.clone())
                .collect();
            for sibling in siblings {
                let analysis_node = NodeId::Chunk(sibling);
                self.link(chunk_node.clone(), analysis_node.clone(), EdgeKind::SupportsAnalysis);
                self.link(analysis_node, chunk_node.clone(), EdgeKind::SupportedByEvidence);
            }
        }
    }

    /// First `k` chunks attached to a category, ordered by descending
    /// count of distinct categories (more overlap is more central), then
    /// ascending chunk id.
    pub fn chunks_by_category(&self, category: PolicyCategory, k: usize) -> Vec<String> {
        let Some(edges) = self.adjacency.get(&NodeId::Category(category)) else {
            return Vec::new();
        };

        let mut ids: Vec<&String> = edges
            .iter()
            .filter(|e| matches!(e.kind, EdgeKind::HasChunk | EdgeKind::HasAnalysis))
            .filter_map(|e| match &e.to {
                NodeId::Chunk(id) => Some(id),
                _ => None,
            })
            .collect();
        ids.sort();
        ids.dedup();

        let mut ranked: Vec<(usize, &String)> = ids
            .into_iter()
            .map(|id| {
                let breadth = self
                    .chunks
                    .get(id)
                    .map(|node| {
                        let distinct: BTreeSet<_> = node.categories.iter().collect();
                        distinct.len()
                    })
                    .unwrap_or(0);
                (breadth, id)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        ranked.into_iter().take(k).map(|(_, id)| id.clone()).collect()
    }

    /// Number of chunks attached to a category. Drives the
    /// specialist-domain routing decision.
    pub fn category_chunk_count(&self, category: PolicyCategory) -> usize {
        self.adjacency
            .get(&NodeId::Category(category))
            .map(|edges| {
                let ids: BTreeSet<&NodeId> = edges
                    .iter()
                    .filter(|e| matches!(e.kind, EdgeKind::HasChunk | EdgeKind::HasAnalysis))
                    .map(|e| &e.to)
                    .collect();
                ids.len()
            })
            .unwrap_or(0)
    }

    /// Chunks reachable from `chunk_id` within `max_depth` hops. Bounded
    /// BFS with a visited set, so it terminates on any graph. Results are
    /// ordered by path length ascending, then category overlap with the
    /// seed descending, then chunk id.
    pub fn related(&self, chunk_id: &str, max_depth: usize) -> Vec<GraphHit> {
        let seed = NodeId::Chunk(chunk_id.to_string());
        if !self.adjacency.contains_key(&seed) {
            return Vec::new();
        }
        let seed_categories: BTreeSet<PolicyCategory> = self
            .chunks
            .get(chunk_id)
            .map(|node| node.categories.iter().copied().collect())
            .unwrap_or_default();

        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        visited.insert(seed.clone());
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        queue.push_back((seed, 0));
        let mut hits: Vec<GraphHit> = Vec::new();

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(edges) = self.adjacency.get(&node) else {
                continue;
            };
            for edge in edges {
                if !visited.insert(edge.to.clone()) {
                    continue;
                }
                if let NodeId::Chunk(id) = &edge.to {
                    let overlap = self
                        .chunks
                        .get(id)
                        .map(|n| {
                            n.categories
                                .iter()
                                .filter(|c| seed_categories.contains(c))
                                .count()
                        })
                        .unwrap_or(0);
                    hits.push(GraphHit {
                        chunk_id: id.clone(),
                        depth: depth + 1,
                        category_overlap: overlap,
                    });
                }
                queue.push_back((edge.to.clone(), depth + 1));
            }
        }

        hits.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| b.category_overlap.cmp(&a.category_overlap))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits
    }

    /// Node and edge counts per kind.
    pub fn stats(&self) -> GraphStats {
        let mut node_kinds: BTreeMap<&'static str, usize> = BTreeMap::new();
        for node in self.adjacency.keys() {
            let kind = match node {
                NodeId::Category(_) => "category",
                NodeId::Domain(_) => "domain",
                NodeId::Pattern(_) => "pattern",
                NodeId::Document(_) => "document",
                NodeId::Chunk(_) => "chunk",
            };
            *node_kinds.entry(kind).or_insert(0) += 1;
        }
        GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            node_kinds: node_kinds.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    fn to_blob(&self) -> GraphBlob {
        let mut edges = Vec::with_capacity(self.edge_count());
        for (from, out) in &self.adjacency {
            for edge in out {
                edges.push((from.clone(), edge.to.clone(), edge.kind));
            }
        }
        GraphBlob {
            nodes: self.adjacency.keys().cloned().collect(),
            edges,
            chunks: self.chunks.clone(),
        }
    }

    fn from_blob(blob: GraphBlob) -> Self {
        let mut graph = Self {
            adjacency: blob.nodes.into_iter().map(|n| (n, Vec::new())).collect(),
            chunks: blob.chunks,
        };
        for (from, to, kind) in blob.edges {
            graph.link(from, to, kind);
        }
        graph
    }

    /// Serialize the graph blob to `path`, write-new-then-rename.
    pub fn persist(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Persist {
                path: parent.display().to_string(),
                message: e.to_string(),
            })?;
        }
        let bytes = serde_json::to_vec(&self.to_blob())?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(|e| StorageError::Persist {
            path: tmp.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::rename(&tmp, path).map_err(|e| StorageError::Persist {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        info!(path = %path.display(), nodes = self.node_count(), "Knowledge graph persisted");
        Ok(())
    }

    /// Load a graph persisted by [`KnowledgeGraph::persist`].
    pub fn load(path: &Path) -> StorageResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| StorageError::Persist {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let blob: GraphBlob = serde_json::from_slice(&bytes)?;
        let graph = Self::from_blob(blob);
        info!(path = %path.display(), nodes = graph.node_count(), "Knowledge graph loaded");
        Ok(graph)
    }
}

/// Graph size summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    /// Total nodes.
    pub nodes: usize,
    /// Total directed edges.
    pub edges: usize,
    /// Node count per kind name.
    pub node_kinds: BTreeMap<String, usize>,
}
