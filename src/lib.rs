//! # RIA Council Engine
//!
//! A deliberative multi-model synthesis engine that turns a regulatory
//! proposal plus a corpus of historical assessments into a structured
//! Regulatory Impact Assessment.
//!
//! ## Features
//!
//! - **Hybrid Retrieval**: Dense embeddings + BM25 sparse scoring with
//!   metadata filtering, unified in one vector store
//! - **Knowledge Graph**: Typed multigraph over categories, domains,
//!   analysis patterns, documents, and chunks with multi-hop traversal
//! - **Three-Stage Council**: First opinions, bootstrap peer ranking with
//!   randomized evaluation contexts, and chairman synthesis
//! - **Workflow Engine**: Resumable state machine with streaming progress
//!   events, human-review gates, and bounded revision loops
//! - **Review Store**: Review queues, decisions, and SLA tracking
//!
//! ## Architecture
//!
//! ```text
//! Proposal → Retrieval (store + graph) → Context Synthesis
//!          → Council (stage 1 → 2 → 3) → Extraction → Human Review
//!          → Report → Knowledge-Base Update
//!                    ↓
//!              SQLite (State)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ria_council::{Config, AssessmentService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let service = AssessmentService::build(config).await?;
//!     let assessment_id = service
//!         .create_assessment(proposal_text, Default::default())
//!         .await?;
//!     let mut events = service.stream_assessment(&assessment_id).await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management for the engine.
pub mod config;
/// Corpus model: chunks and closed policy vocabularies.
pub mod corpus;
/// Three-stage council protocol with bootstrap evaluation.
pub mod council;
/// Embedding providers (remote batch API and local deterministic).
pub mod embedding;
/// Error types and result aliases.
pub mod error;
/// Model gateway client and message types.
pub mod gateway;
/// Knowledge graph: typed multigraph and traversal.
pub mod graph;
/// Sparse/dense indices and the hybrid vector store.
pub mod index;
/// Prompt builders for the council stages.
pub mod prompts;
/// Section extraction into the 21-theme report structure.
pub mod report;
/// Retrieval orchestration and context synthesis.
pub mod retrieval;
/// Review queue, decisions, and SLA tracking.
pub mod review;
/// Inbound service facade (create, stream, review, get, list).
pub mod service;
/// SQLite persistence for assessments and workflow state.
pub mod storage;
/// Workflow state machine, events, and engine.
pub mod workflow;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use service::AssessmentService;
