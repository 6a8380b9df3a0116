//! Human review: types, queue, decisions, and SLA tracking.
//!
//! Reviews are externally driven. The workflow parks on a oneshot
//! decision channel registered here; submitting a decision persists it
//! and wakes the waiting workflow. Pending reviews survive in storage so
//! a restarted process can re-bind the wait.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::config::ReviewSettings;
use crate::error::{StorageError, StorageResult};
use crate::storage::Storage;

/// Which checkpoint a review gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    /// Review of the chairman synthesis.
    Synthesis,
    /// Review of the extracted report.
    Report,
}

impl std::fmt::Display for ReviewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewType::Synthesis => write!(f, "synthesis"),
            ReviewType::Report => write!(f, "report"),
        }
    }
}

impl std::str::FromStr for ReviewType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "synthesis" => Ok(ReviewType::Synthesis),
            "report" => Ok(ReviewType::Report),
            _ => Err(format!("Unknown review type: {}", s)),
        }
    }
}

/// Reviewer action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    RequestRevision,
    Reject,
    Edit,
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewAction::Approve => write!(f, "approve"),
            ReviewAction::RequestRevision => write!(f, "request_revision"),
            ReviewAction::Reject => write!(f, "reject"),
            ReviewAction::Edit => write!(f, "edit"),
        }
    }
}

impl std::str::FromStr for ReviewAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" => Ok(ReviewAction::Approve),
            "request_revision" => Ok(ReviewAction::RequestRevision),
            "reject" => Ok(ReviewAction::Reject),
            "edit" => Ok(ReviewAction::Edit),
            _ => Err(format!("Unknown review action: {}", s)),
        }
    }
}

/// Queue priority; higher priority tightens the SLA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    High,
    #[default]
    Normal,
}

impl std::fmt::Display for ReviewPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewPriority::High => write!(f, "high"),
            ReviewPriority::Normal => write!(f, "normal"),
        }
    }
}

impl std::str::FromStr for ReviewPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(ReviewPriority::High),
            "normal" => Ok(ReviewPriority::Normal),
            _ => Err(format!("Unknown review priority: {}", s)),
        }
    }
}

/// A recorded review decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    /// Decision id.
    pub id: String,
    /// Assessment reviewed.
    pub assessment_id: String,
    /// Checkpoint reviewed.
    pub review_type: ReviewType,
    /// Action taken.
    pub decision: ReviewAction,
    /// Reviewer comments.
    pub comments: String,
    /// Reviewer identity.
    pub reviewer_id: String,
    /// When the decision was made.
    pub reviewed_at: DateTime<Utc>,
    /// Feedback carried into a revision cycle.
    pub revision_feedback: Option<String>,
}

impl ReviewDecision {
    /// Create a decision record.
    pub fn new(
        assessment_id: impl Into<String>,
        review_type: ReviewType,
        decision: ReviewAction,
        reviewer_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            assessment_id: assessment_id.into(),
            review_type,
            decision,
            comments: String::new(),
            reviewer_id: reviewer_id.into(),
            reviewed_at: Utc::now(),
            revision_feedback: None,
        }
    }

    /// Set comments.
    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }

    /// Set revision feedback.
    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.revision_feedback = Some(feedback.into());
        self
    }
}

/// An open entry in the review queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Assessment awaiting review.
    pub assessment_id: String,
    /// Checkpoint type.
    pub review_type: ReviewType,
    /// Queue priority.
    pub priority: ReviewPriority,
    /// When the review was requested.
    pub enqueued_at: DateTime<Utc>,
    /// SLA deadline computed on assignment.
    pub sla_deadline: DateTime<Utc>,
}

impl QueueEntry {
    /// Whether the SLA has been breached at `now`.
    pub fn is_breached(&self, now: DateTime<Utc>) -> bool {
        now > self.sla_deadline
    }
}

/// Review store: persistent queue and decisions plus in-memory waiter
/// channels for workflows parked on a review.
pub struct ReviewStore {
    storage: Arc<dyn Storage>,
    settings: ReviewSettings,
    waiters: Mutex<HashMap<String, oneshot::Sender<ReviewDecision>>>,
}

impl ReviewStore {
    /// Create a review store.
    pub fn new(storage: Arc<dyn Storage>, settings: ReviewSettings) -> Self {
        Self {
            storage,
            settings,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// SLA deadline for a review enqueued at `from`.
    pub fn sla_deadline(
        &self,
        review_type: ReviewType,
        priority: ReviewPriority,
        from: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let base_hours = match review_type {
            ReviewType::Synthesis => self.settings.synthesis_sla_hours,
            ReviewType::Report => self.settings.report_sla_hours,
        };
        let hours = match priority {
            ReviewPriority::Normal => base_hours as f64,
            ReviewPriority::High => base_hours as f64 * self.settings.priority_factor,
        };
        from + Duration::minutes((hours * 60.0) as i64)
    }

    /// Enqueue a review and hand back the channel the workflow awaits.
    /// Replaces any stale waiter for the same assessment.
    pub async fn open(
        &self,
        assessment_id: &str,
        review_type: ReviewType,
        priority: ReviewPriority,
    ) -> StorageResult<oneshot::Receiver<ReviewDecision>> {
        let now = Utc::now();
        let entry = QueueEntry {
            assessment_id: assessment_id.to_string(),
            review_type,
            priority,
            enqueued_at: now,
            sla_deadline: self.sla_deadline(review_type, priority, now),
        };
        self.storage.enqueue_review(&entry).await?;

        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock().await;
        if waiters.insert(assessment_id.to_string(), tx).is_some() {
            warn!(assessment_id, "Replaced stale review waiter");
        }
        info!(assessment_id, review_type = %review_type, "Review opened");
        Ok(rx)
    }

    /// Re-bind the waiter channel for a review that is already open in
    /// storage (process restart).
    pub async fn rebind(
        &self,
        assessment_id: &str,
    ) -> StorageResult<oneshot::Receiver<ReviewDecision>> {
        let open = self.storage.list_review_queue(None).await?;
        if !open.iter().any(|e| e.assessment_id == assessment_id) {
            return Err(StorageError::Query {
                message: format!("no open review for assessment {}", assessment_id),
            });
        }
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .await
            .insert(assessment_id.to_string(), tx);
        Ok(rx)
    }

    /// Record a decision: persists it, closes the queue entry, and wakes
    /// the waiting workflow if one is parked.
    pub async fn submit(&self, decision: ReviewDecision) -> StorageResult<()> {
        self.storage.add_review_decision(&decision).await?;
        self.storage
            .close_review(&decision.assessment_id)
            .await?;

        let waiter = self
            .waiters
            .lock()
            .await
            .remove(&decision.assessment_id);
        match waiter {
            Some(tx) => {
                if tx.send(decision.clone()).is_err() {
                    warn!(
                        assessment_id = %decision.assessment_id,
                        "Review waiter dropped before decision delivery"
                    );
                }
            }
            None => {
                // Decision recorded with no parked workflow; resume will
                // pick it up from storage.
                info!(
                    assessment_id = %decision.assessment_id,
                    "Review decision recorded without active waiter"
                );
            }
        }
        Ok(())
    }

    /// Open queue entries, optionally filtered by review type.
    pub async fn queue(&self, review_type: Option<ReviewType>) -> StorageResult<Vec<QueueEntry>> {
        self.storage.list_review_queue(review_type).await
    }

    /// All decisions recorded for an assessment.
    pub async fn decisions(&self, assessment_id: &str) -> StorageResult<Vec<ReviewDecision>> {
        self.storage.get_review_decisions(assessment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn store() -> ReviewStore {
        let storage = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        ReviewStore::new(storage, ReviewSettings::default())
    }

    #[tokio::test]
    async fn test_sla_deadlines_per_type_and_priority() {
        let store = store().await;
        let from = Utc::now();

        let synthesis = store.sla_deadline(ReviewType::Synthesis, ReviewPriority::Normal, from);
        assert_eq!((synthesis - from).num_hours(), 24);

        let report = store.sla_deadline(ReviewType::Report, ReviewPriority::Normal, from);
        assert_eq!((report - from).num_hours(), 48);

        let urgent = store.sla_deadline(ReviewType::Synthesis, ReviewPriority::High, from);
        assert_eq!((urgent - from).num_hours(), 12);
    }

    #[tokio::test]
    async fn test_open_submit_wakes_waiter() {
        let store = store().await;
        let rx = store
            .open("a-1", ReviewType::Synthesis, ReviewPriority::Normal)
            .await
            .unwrap();

        let decision = ReviewDecision::new("a-1", ReviewType::Synthesis, ReviewAction::Approve, "rev-1")
            .with_comments("looks complete");
        store.submit(decision).await.unwrap();

        let received = rx.await.unwrap();
        assert_eq!(received.decision, ReviewAction::Approve);
        assert_eq!(received.comments, "looks complete");

        // Queue entry is closed.
        assert!(store.queue(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_filter_by_type() {
        let store = store().await;
        let _rx1 = store
            .open("a-1", ReviewType::Synthesis, ReviewPriority::Normal)
            .await
            .unwrap();
        let _rx2 = store
            .open("a-2", ReviewType::Report, ReviewPriority::High)
            .await
            .unwrap();

        let all = store.queue(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let reports = store.queue(Some(ReviewType::Report)).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].assessment_id, "a-2");
    }

    #[tokio::test]
    async fn test_rebind_requires_open_review() {
        let store = store().await;
        assert!(store.rebind("ghost").await.is_err());

        let _rx = store
            .open("a-1", ReviewType::Report, ReviewPriority::Normal)
            .await
            .unwrap();
        let rebound = store.rebind("a-1").await.unwrap();
        let decision =
            ReviewDecision::new("a-1", ReviewType::Report, ReviewAction::Reject, "rev-2");
        store.submit(decision).await.unwrap();
        assert_eq!(rebound.await.unwrap().decision, ReviewAction::Reject);
    }

    #[tokio::test]
    async fn test_decisions_history_persists() {
        let store = store().await;
        let _rx = store
            .open("a-1", ReviewType::Synthesis, ReviewPriority::Normal)
            .await
            .unwrap();
        store
            .submit(
                ReviewDecision::new("a-1", ReviewType::Synthesis, ReviewAction::RequestRevision, "rev-1")
                    .with_feedback("expand fundamental rights analysis"),
            )
            .await
            .unwrap();

        let decisions = store.decisions("a-1").await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(
            decisions[0].revision_feedback.as_deref(),
            Some("expand fundamental rights analysis")
        );
    }

    #[test]
    fn test_queue_entry_breach() {
        let now = Utc::now();
        let entry = QueueEntry {
            assessment_id: "a".to_string(),
            review_type: ReviewType::Report,
            priority: ReviewPriority::Normal,
            enqueued_at: now - Duration::hours(50),
            sla_deadline: now - Duration::hours(2),
        };
        assert!(entry.is_breached(now));
    }
}
