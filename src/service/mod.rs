//! Inbound service facade.
//!
//! The surrounding API layer talks to the engine through this type:
//! create an assessment (synchronous validation), stream its progress,
//! submit review decisions, and fetch records, status, and reports.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::council::CouncilEngine;
use crate::embedding::{Embedder, HashEmbedder, RemoteEmbedder};
use crate::error::{AppError, AppResult, ValidationError};
use crate::gateway::GatewayClient;
use crate::graph::KnowledgeGraph;
use crate::index::VectorStore;
use crate::report::StructuredReport;
use crate::retrieval::Retriever;
use crate::review::{ReviewAction, ReviewDecision, ReviewStore, ReviewType};
use crate::storage::{AssessmentRecord, SqliteStorage, Storage};
use crate::workflow::engine::PersistPaths;
use crate::workflow::{AssessmentState, EventSink, ProgressEvent, WorkflowEngine};

/// Minimum proposal length in words.
const MIN_PROPOSAL_WORDS: usize = 50;

/// The assessment service: one per process, shared across assessments.
pub struct AssessmentService {
    storage: Arc<dyn Storage>,
    review: Arc<ReviewStore>,
    engine: Arc<WorkflowEngine>,
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl AssessmentService {
    /// Wire the service from configuration: storage, embedder, gateway,
    /// retrieval structures (loaded from `persist` when present), the
    /// council, and the workflow engine.
    pub async fn build(config: Config, persist: PersistPaths) -> AppResult<Self> {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new(&config.database).await?);

        let embedder: Arc<dyn Embedder> = if config.embedding.base_url.is_empty() {
            Arc::new(HashEmbedder::new(config.embedding.dim))
        } else {
            Arc::new(RemoteEmbedder::new(
                &config.embedding,
                config.request.clone(),
            )?)
        };

        let store = match &persist.store_dir {
            Some(dir) if dir.join("metadata.json").exists() => {
                VectorStore::load(dir, embedder.clone())?
            }
            _ => VectorStore::new(embedder.clone()),
        };
        let graph = match &persist.graph_path {
            Some(path) if path.exists() => KnowledgeGraph::load(path)?,
            _ => KnowledgeGraph::new(),
        };

        let store = Arc::new(RwLock::new(store));
        let graph = Arc::new(RwLock::new(graph));
        let retriever = Retriever::new(store.clone(), graph.clone(), config.retrieval.clone());

        let gateway = GatewayClient::http(&config.gateway, config.request.clone())?;
        let mut council = CouncilEngine::new(gateway, config.council.clone())?;
        // Evaluation criteria are configurable as a JSON list of
        // {name, focus, description}; the built-in rotation applies
        // otherwise.
        if let Ok(raw) = std::env::var("EVALUATION_CRITERIA") {
            let criteria: Vec<crate::council::EvaluationCriterion> = serde_json::from_str(&raw)
                .map_err(|e| AppError::Config {
                    message: format!("EVALUATION_CRITERIA is not valid JSON: {}", e),
                })?;
            council = council.with_criteria(criteria);
        }
        let review = Arc::new(ReviewStore::new(storage.clone(), config.review.clone()));

        let engine = Arc::new(WorkflowEngine::new(
            storage.clone(),
            store,
            graph,
            retriever,
            council,
            review.clone(),
            config.review.revision_limit,
            persist,
        ));

        Ok(Self {
            storage,
            review,
            engine,
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Assemble a service from pre-built components.
    pub fn with_components(
        storage: Arc<dyn Storage>,
        review: Arc<ReviewStore>,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        Self {
            storage,
            review,
            engine,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Create an assessment. Proposals shorter than 50 words are
    /// rejected synchronously with guidance; no record is created.
    pub async fn create_assessment(
        &self,
        proposal_text: &str,
        context_metadata: serde_json::Value,
    ) -> AppResult<String> {
        let words = proposal_text.split_whitespace().count();
        if words < MIN_PROPOSAL_WORDS {
            let received: String = proposal_text.chars().take(200).collect();
            return Err(AppError::Validation(ValidationError {
                input_received: received,
                guidance: format!(
                    "A proposal needs at least {} words to assess; received {}. Describe the \
                     measure, its scope, the affected parties, and the intended mechanism.",
                    MIN_PROPOSAL_WORDS, words
                ),
                examples: vec![
                    "Regulation establishing a framework for trustworthy AI systems, including \
                     requirements for high-risk applications, transparency obligations towards \
                     users, conformity assessment procedures before market entry, and governance \
                     mechanisms for development and deployment, with particular attention to the \
                     obligations of providers and deployers of such systems across the internal \
                     market and to enforcement by national supervisory authorities."
                        .to_string(),
                ],
            }));
        }

        let record = AssessmentRecord::new(proposal_text, context_metadata);
        let assessment_id = record.assessment_id.clone();
        self.storage.create_assessment(&record).await?;
        info!(assessment_id = %assessment_id, words, "Assessment created");
        Ok(assessment_id)
    }

    /// Start (or resume) the workflow for an assessment and stream its
    /// progress events. The workflow runs as its own task; dropping the
    /// receiver does not stop it.
    pub async fn stream_assessment(
        &self,
        assessment_id: &str,
    ) -> AppResult<mpsc::UnboundedReceiver<ProgressEvent>> {
        let record = self.require(assessment_id).await?;
        if record.state.is_terminal() {
            return Err(AppError::Internal {
                message: format!(
                    "assessment {} is already {}",
                    assessment_id, record.state
                ),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        {
            let mut running = self.running.lock().await;
            if let Some(previous) = running.insert(assessment_id.to_string(), cancel.clone()) {
                // A stale runner for the same assessment must not race the
                // new one.
                previous.cancel();
                warn!(assessment_id, "Replaced a running workflow task");
            }
        }

        let engine = self.engine.clone();
        let id = assessment_id.to_string();
        tokio::spawn(async move {
            let sink = EventSink::new(tx);
            if let Err(e) = engine.run(&id, sink, cancel).await {
                warn!(assessment_id = %id, error = %e, "Workflow task ended with error");
            }
        });

        Ok(rx)
    }

    /// Submit a review decision for an assessment parked on a review
    /// checkpoint. Returns the state at submission; the workflow applies
    /// the resulting transition asynchronously.
    pub async fn review(
        &self,
        assessment_id: &str,
        action: ReviewAction,
        comments: &str,
        revision_feedback: Option<String>,
        reviewer_id: &str,
    ) -> AppResult<AssessmentState> {
        let record = self.require(assessment_id).await?;
        let review_type = match record.state {
            AssessmentState::SynthesisReviewPending
            | AssessmentState::SynthesisReviewInProgress => ReviewType::Synthesis,
            AssessmentState::ReportReviewPending | AssessmentState::ReportReviewInProgress => {
                ReviewType::Report
            }
            other => {
                return Err(AppError::Internal {
                    message: format!(
                        "assessment {} is not awaiting review (state: {})",
                        assessment_id, other
                    ),
                })
            }
        };

        let mut decision =
            ReviewDecision::new(assessment_id, review_type, action, reviewer_id)
                .with_comments(comments);
        if let Some(feedback) = revision_feedback {
            decision = decision.with_feedback(feedback);
        }
        self.review.submit(decision).await?;
        Ok(record.state)
    }

    /// Cancel a running assessment.
    pub async fn cancel(&self, assessment_id: &str) -> AppResult<()> {
        let running = self.running.lock().await;
        match running.get(assessment_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(AppError::Internal {
                message: format!("assessment {} is not running", assessment_id),
            }),
        }
    }

    /// Fetch a full assessment record.
    pub async fn get_assessment(&self, assessment_id: &str) -> AppResult<AssessmentRecord> {
        self.require(assessment_id).await
    }

    /// Current lifecycle state.
    pub async fn get_status(&self, assessment_id: &str) -> AppResult<AssessmentState> {
        Ok(self.require(assessment_id).await?.state)
    }

    /// The extracted report, once available.
    pub async fn get_report(&self, assessment_id: &str) -> AppResult<StructuredReport> {
        self.require(assessment_id)
            .await?
            .report
            .ok_or_else(|| AppError::Internal {
                message: format!("assessment {} has no report yet", assessment_id),
            })
    }

    /// List assessments, optionally by state.
    pub async fn list(&self, state: Option<AssessmentState>) -> AppResult<Vec<AssessmentRecord>> {
        Ok(self.storage.list_assessments(state).await?)
    }

    /// The review store, for queue inspection.
    pub fn reviews(&self) -> &ReviewStore {
        &self.review
    }

    /// Guidance payload for a validation failure, shaped for the
    /// `validation_error` stream event.
    pub fn validation_payload(error: &ValidationError) -> ProgressEvent {
        ProgressEvent::ValidationError {
            data: json!({
                "input_received": error.input_received,
                "guidance": error.guidance,
                "examples": error.examples,
            }),
        }
    }

    async fn require(&self, assessment_id: &str) -> AppResult<AssessmentRecord> {
        self.storage
            .get_assessment(assessment_id)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("assessment {} not found", assessment_id),
            })
    }
}
