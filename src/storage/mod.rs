//! Storage layer for assessment persistence.
//!
//! This module provides SQLite-based storage for assessment records,
//! state-transition audit logs, council-run history, review decisions,
//! and the review queue.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::council::CouncilRun;
use crate::error::StorageResult;
use crate::report::StructuredReport;
use crate::retrieval::{RetrievalMetrics, SourceRef};
use crate::review::{QueueEntry, ReviewDecision, ReviewType};
use crate::workflow::state::AssessmentState;

/// Quality metrics accumulated across the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Retrieval gate numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalMetrics>,
    /// Issues found when validating the synthesis.
    #[serde(default)]
    pub synthesis_issues: Vec<String>,
    /// Report completeness ratio (sections and themes).
    pub completeness: f64,
    /// Resolved citations in the report.
    pub citation_count: usize,
    /// Distinct sources behind the report.
    pub sources_count: usize,
    /// Themes the synthesis omitted.
    pub missing_themes: usize,
}

/// Top-level assessment entity. Owned exclusively by the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentRecord {
    /// Assessment identifier.
    pub assessment_id: String,
    /// Submitted proposal text.
    pub proposal_text: String,
    /// Submission metadata (jurisdiction, category, year, priority).
    pub context_metadata: serde_json::Value,
    /// Current lifecycle state.
    pub state: AssessmentState,
    /// Every council run, oldest first; revisions append.
    pub council_history: Vec<CouncilRun>,
    /// Extracted report, once available.
    pub report: Option<StructuredReport>,
    /// Sources from the retrieval context.
    pub sources: Vec<SourceRef>,
    /// Quality metrics.
    pub quality: QualityMetrics,
    /// When the assessment was created.
    pub created_at: DateTime<Utc>,
    /// When the assessment was last updated.
    pub updated_at: DateTime<Utc>,
}

impl AssessmentRecord {
    /// Create a draft assessment for a proposal.
    pub fn new(proposal_text: impl Into<String>, context_metadata: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            assessment_id: Uuid::new_v4().to_string(),
            proposal_text: proposal_text.into(),
            context_metadata,
            state: AssessmentState::Draft,
            council_history: Vec::new(),
            report: None,
            sources: Vec::new(),
            quality: QualityMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The most recent council run.
    pub fn latest_run(&self) -> Option<&CouncilRun> {
        self.council_history.last()
    }

    /// Revision cycles consumed for a review type, counted as council
    /// runs beyond the first for synthesis.
    pub fn revision_count(&self) -> u32 {
        self.council_history.len().saturating_sub(1) as u32
    }
}

/// One audited state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Assessment the transition belongs to.
    pub assessment_id: String,
    /// State left.
    pub from: AssessmentState,
    /// State entered.
    pub to: AssessmentState,
    /// When the transition happened.
    pub at: DateTime<Utc>,
    /// Optional context (reason, node, reviewer).
    pub metadata: Option<serde_json::Value>,
}

/// Storage trait for database operations.
#[async_trait]
pub trait Storage: Send + Sync {
    // Assessment operations

    /// Create a new assessment record.
    async fn create_assessment(&self, record: &AssessmentRecord) -> StorageResult<()>;
    /// Get an assessment by id.
    async fn get_assessment(&self, id: &str) -> StorageResult<Option<AssessmentRecord>>;
    /// Update an existing assessment record.
    async fn update_assessment(&self, record: &AssessmentRecord) -> StorageResult<()>;
    /// List assessments, optionally filtered by state, newest first.
    async fn list_assessments(
        &self,
        state: Option<AssessmentState>,
    ) -> StorageResult<Vec<AssessmentRecord>>;

    // Transition audit log

    /// Append a state transition.
    async fn record_transition(&self, transition: &StateTransition) -> StorageResult<()>;
    /// All transitions for an assessment, oldest first.
    async fn get_transitions(&self, assessment_id: &str) -> StorageResult<Vec<StateTransition>>;

    // Review decisions

    /// Append a review decision.
    async fn add_review_decision(&self, decision: &ReviewDecision) -> StorageResult<()>;
    /// All decisions for an assessment, oldest first.
    async fn get_review_decisions(&self, assessment_id: &str)
        -> StorageResult<Vec<ReviewDecision>>;

    // Review queue

    /// Open a review queue entry (idempotent per assessment).
    async fn enqueue_review(&self, entry: &QueueEntry) -> StorageResult<()>;
    /// Close the open review for an assessment.
    async fn close_review(&self, assessment_id: &str) -> StorageResult<()>;
    /// Open queue entries, optionally filtered by type, oldest first.
    async fn list_review_queue(
        &self,
        review_type: Option<ReviewType>,
    ) -> StorageResult<Vec<QueueEntry>>;
}
