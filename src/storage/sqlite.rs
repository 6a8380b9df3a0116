use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use super::{AssessmentRecord, QualityMetrics, StateTransition, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::review::{QueueEntry, ReviewAction, ReviewDecision, ReviewPriority, ReviewType};
use crate::workflow::state::AssessmentState;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage instance for testing
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                StorageError::Connection {
                    message: format!("Invalid in-memory URL: {}", e),
                }
            })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to create in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Query {
            message: format!("invalid timestamp '{}': {}", raw, e),
        })
}

fn parse_state(raw: &str) -> StorageResult<AssessmentState> {
    raw.parse().map_err(|e| StorageError::Query { message: e })
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> StorageResult<AssessmentRecord> {
    let state: String = row.get("state");
    let council_history: String = row.get("council_history");
    let report: Option<String> = row.get("report");
    let sources: String = row.get("sources");
    let quality: String = row.get("quality");
    let context_metadata: String = row.get("context_metadata");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(AssessmentRecord {
        assessment_id: row.get("id"),
        proposal_text: row.get("proposal_text"),
        context_metadata: serde_json::from_str(&context_metadata)?,
        state: parse_state(&state)?,
        council_history: serde_json::from_str(&council_history)?,
        report: report.map(|r| serde_json::from_str(&r)).transpose()?,
        sources: serde_json::from_str(&sources)?,
        quality: serde_json::from_str::<QualityMetrics>(&quality)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_assessment(&self, record: &AssessmentRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO assessments
                (id, proposal_text, context_metadata, state, council_history,
                 report, sources, quality, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.assessment_id)
        .bind(&record.proposal_text)
        .bind(serde_json::to_string(&record.context_metadata)?)
        .bind(record.state.to_string())
        .bind(serde_json::to_string(&record.council_history)?)
        .bind(
            record
                .report
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&record.sources)?)
        .bind(serde_json::to_string(&record.quality)?)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_assessment(&self, id: &str) -> StorageResult<Option<AssessmentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, proposal_text, context_metadata, state, council_history,
                   report, sources, quality, created_at, updated_at
            FROM assessments
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn update_assessment(&self, record: &AssessmentRecord) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE assessments
            SET proposal_text = ?, context_metadata = ?, state = ?,
                council_history = ?, report = ?, sources = ?, quality = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.proposal_text)
        .bind(serde_json::to_string(&record.context_metadata)?)
        .bind(record.state.to_string())
        .bind(serde_json::to_string(&record.council_history)?)
        .bind(
            record
                .report
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&record.sources)?)
        .bind(serde_json::to_string(&record.quality)?)
        .bind(Utc::now().to_rfc3339())
        .bind(&record.assessment_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AssessmentNotFound {
                assessment_id: record.assessment_id.clone(),
            });
        }
        Ok(())
    }

    async fn list_assessments(
        &self,
        state: Option<AssessmentState>,
    ) -> StorageResult<Vec<AssessmentRecord>> {
        let rows = match state {
            Some(state) => {
                sqlx::query(
                    r#"
                    SELECT id, proposal_text, context_metadata, state, council_history,
                           report, sources, quality, created_at, updated_at
                    FROM assessments
                    WHERE state = ?
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(state.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, proposal_text, context_metadata, state, council_history,
                           report, sources, quality, created_at, updated_at
                    FROM assessments
                    ORDER BY created_at DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(record_from_row).collect()
    }

    async fn record_transition(&self, transition: &StateTransition) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO state_transitions (assessment_id, from_state, to_state, created_at, metadata)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&transition.assessment_id)
        .bind(transition.from.to_string())
        .bind(transition.to.to_string())
        .bind(transition.at.to_rfc3339())
        .bind(
            transition
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_transitions(&self, assessment_id: &str) -> StorageResult<Vec<StateTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT assessment_id, from_state, to_state, created_at, metadata
            FROM state_transitions
            WHERE assessment_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let from: String = row.get("from_state");
                let to: String = row.get("to_state");
                let at: String = row.get("created_at");
                let metadata: Option<String> = row.get("metadata");
                Ok(StateTransition {
                    assessment_id: row.get("assessment_id"),
                    from: parse_state(&from)?,
                    to: parse_state(&to)?,
                    at: parse_timestamp(&at)?,
                    metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
                })
            })
            .collect()
    }

    async fn add_review_decision(&self, decision: &ReviewDecision) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO review_decisions
                (id, assessment_id, review_type, decision, comments, reviewer_id,
                 reviewed_at, revision_feedback)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&decision.id)
        .bind(&decision.assessment_id)
        .bind(decision.review_type.to_string())
        .bind(decision.decision.to_string())
        .bind(&decision.comments)
        .bind(&decision.reviewer_id)
        .bind(decision.reviewed_at.to_rfc3339())
        .bind(&decision.revision_feedback)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_review_decisions(
        &self,
        assessment_id: &str,
    ) -> StorageResult<Vec<ReviewDecision>> {
        let rows = sqlx::query(
            r#"
            SELECT id, assessment_id, review_type, decision, comments, reviewer_id,
                   reviewed_at, revision_feedback
            FROM review_decisions
            WHERE assessment_id = ?
            ORDER BY reviewed_at ASC
            "#,
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let review_type: String = row.get("review_type");
                let decision: String = row.get("decision");
                let reviewed_at: String = row.get("reviewed_at");
                Ok(ReviewDecision {
                    id: row.get("id"),
                    assessment_id: row.get("assessment_id"),
                    review_type: ReviewType::from_str(&review_type)
                        .map_err(|e| StorageError::Query { message: e })?,
                    decision: ReviewAction::from_str(&decision)
                        .map_err(|e| StorageError::Query { message: e })?,
                    comments: row.get("comments"),
                    reviewer_id: row.get("reviewer_id"),
                    reviewed_at: parse_timestamp(&reviewed_at)?,
                    revision_feedback: row.get("revision_feedback"),
                })
            })
            .collect()
    }

    async fn enqueue_review(&self, entry: &QueueEntry) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO review_queue
                (assessment_id, review_type, priority, enqueued_at, sla_deadline, open)
            VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(assessment_id) DO UPDATE SET
                review_type = excluded.review_type,
                priority = excluded.priority,
                enqueued_at = excluded.enqueued_at,
                sla_deadline = excluded.sla_deadline,
                open = 1
            "#,
        )
        .bind(&entry.assessment_id)
        .bind(entry.review_type.to_string())
        .bind(entry.priority.to_string())
        .bind(entry.enqueued_at.to_rfc3339())
        .bind(entry.sla_deadline.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn close_review(&self, assessment_id: &str) -> StorageResult<()> {
        sqlx::query("UPDATE review_queue SET open = 0 WHERE assessment_id = ?")
            .bind(assessment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_review_queue(
        &self,
        review_type: Option<ReviewType>,
    ) -> StorageResult<Vec<QueueEntry>> {
        let rows = match review_type {
            Some(review_type) => {
                sqlx::query(
                    r#"
                    SELECT assessment_id, review_type, priority, enqueued_at, sla_deadline
                    FROM review_queue
                    WHERE open = 1 AND review_type = ?
                    ORDER BY enqueued_at ASC
                    "#,
                )
                .bind(review_type.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT assessment_id, review_type, priority, enqueued_at, sla_deadline
                    FROM review_queue
                    WHERE open = 1
                    ORDER BY enqueued_at ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                let review_type: String = row.get("review_type");
                let priority: String = row.get("priority");
                let enqueued_at: String = row.get("enqueued_at");
                let sla_deadline: String = row.get("sla_deadline");
                Ok(QueueEntry {
                    assessment_id: row.get("assessment_id"),
                    review_type: ReviewType::from_str(&review_type)
                        .map_err(|e| StorageError::Query { message: e })?,
                    priority: ReviewPriority::from_str(&priority)
                        .map_err(|e| StorageError::Query { message: e })?,
                    enqueued_at: parse_timestamp(&enqueued_at)?,
                    sla_deadline: parse_timestamp(&sla_deadline)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_assessment_roundtrip() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let record = AssessmentRecord::new(
            "a regulatory proposal of sufficient length",
            json!({"jurisdiction": "EU"}),
        );
        storage.create_assessment(&record).await.unwrap();

        let loaded = storage
            .get_assessment(&record.assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.proposal_text, record.proposal_text);
        assert_eq!(loaded.state, AssessmentState::Draft);
        assert_eq!(loaded.context_metadata["jurisdiction"], "EU");
    }

    #[tokio::test]
    async fn test_update_moves_state_and_history() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let mut record = AssessmentRecord::new("proposal", json!({}));
        storage.create_assessment(&record).await.unwrap();

        record.state = AssessmentState::Preprocessing;
        storage.update_assessment(&record).await.unwrap();

        let loaded = storage
            .get_assessment(&record.assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.state, AssessmentState::Preprocessing);
    }

    #[tokio::test]
    async fn test_update_missing_assessment_errors() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let record = AssessmentRecord::new("proposal", json!({}));
        assert!(matches!(
            storage.update_assessment(&record).await,
            Err(StorageError::AssessmentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_state() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let mut a = AssessmentRecord::new("first proposal", json!({}));
        a.state = AssessmentState::Completed;
        let b = AssessmentRecord::new("second proposal", json!({}));
        storage.create_assessment(&a).await.unwrap();
        storage.create_assessment(&b).await.unwrap();

        let completed = storage
            .list_assessments(Some(AssessmentState::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].assessment_id, a.assessment_id);
        assert_eq!(storage.list_assessments(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transitions_are_ordered() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        for (from, to) in [
            (AssessmentState::Draft, AssessmentState::Preprocessing),
            (AssessmentState::Preprocessing, AssessmentState::Stage1Running),
        ] {
            storage
                .record_transition(&StateTransition {
                    assessment_id: "a-1".to_string(),
                    from,
                    to,
                    at: Utc::now(),
                    metadata: Some(json!({"node": "test"})),
                })
                .await
                .unwrap();
        }

        let transitions = storage.get_transitions("a-1").await.unwrap();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].from, AssessmentState::Draft);
        assert_eq!(transitions[1].to, AssessmentState::Stage1Running);
    }

    #[tokio::test]
    async fn test_review_queue_enqueue_is_idempotent() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let entry = QueueEntry {
            assessment_id: "a-1".to_string(),
            review_type: ReviewType::Synthesis,
            priority: ReviewPriority::Normal,
            enqueued_at: Utc::now(),
            sla_deadline: Utc::now(),
        };
        storage.enqueue_review(&entry).await.unwrap();
        storage.enqueue_review(&entry).await.unwrap();
        assert_eq!(storage.list_review_queue(None).await.unwrap().len(), 1);

        storage.close_review("a-1").await.unwrap();
        assert!(storage.list_review_queue(None).await.unwrap().is_empty());
    }
}
