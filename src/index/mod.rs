//! Sparse and dense indices.
//!
//! [`bm25`] scores tokenized text lexically; [`store`] unifies dense
//! embeddings, the sparse index, and a metadata catalog into one hybrid
//! search surface.

pub mod bm25;
pub mod store;

pub use bm25::{tokenize, Bm25Index};
pub use store::{Hit, MetadataFilter, SearchMode, SearchWeights, VectorStore};
