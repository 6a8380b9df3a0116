//! The per-assessment workflow runner.
//!
//! One cooperative task owns each assessment's lifecycle; many tasks may
//! run concurrently. The runner advances the state machine one node at a
//! time, persisting every transition for audit and resume, emitting
//! progress events, and suspending only at I/O boundaries: model calls,
//! embedding calls, storage writes, and human-review waits.
//!
//! Resume reads the latest persisted state and re-enters the loop there.
//! Stage outputs live on the assessment record, so completed council
//! stages are never re-executed.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::events::{EventSink, ProgressEvent};
use super::state::AssessmentState;
use crate::corpus::{match_categories, Chunk, ChunkKind};
use crate::council::{CouncilEngine, CouncilRun, Opinion};
use crate::error::{AppError, AppResult, RetrievalError, StateError};
use crate::graph::KnowledgeGraph;
use crate::index::{MetadataFilter, VectorStore};
use crate::report::{extract_report, validate_synthesis};
use crate::retrieval::{ContextBundle, Retriever};
use crate::review::{ReviewAction, ReviewPriority, ReviewStore, ReviewType};
use crate::storage::{AssessmentRecord, StateTransition, Storage};

/// Where the knowledge-base artifacts persist after updates. Absent
/// paths keep the store and graph memory-only.
#[derive(Debug, Clone, Default)]
pub struct PersistPaths {
    /// Vector store directory.
    pub store_dir: Option<PathBuf>,
    /// Knowledge graph blob path.
    pub graph_path: Option<PathBuf>,
}

/// The workflow engine shared by all assessments.
pub struct WorkflowEngine {
    storage: Arc<dyn Storage>,
    store: Arc<RwLock<VectorStore>>,
    graph: Arc<RwLock<KnowledgeGraph>>,
    retriever: Retriever,
    council: CouncilEngine,
    review: Arc<ReviewStore>,
    revision_limit: u32,
    persist: PersistPaths,
}

/// Mutable per-run context threaded through the loop.
struct RunCtx {
    record: AssessmentRecord,
    bundle: Option<ContextBundle>,
    revision_feedback: Option<String>,
    report_revisions: u32,
    insufficient_context: bool,
}

impl WorkflowEngine {
    /// Create a workflow engine.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        store: Arc<RwLock<VectorStore>>,
        graph: Arc<RwLock<KnowledgeGraph>>,
        retriever: Retriever,
        council: CouncilEngine,
        review: Arc<ReviewStore>,
        revision_limit: u32,
        persist: PersistPaths,
    ) -> Self {
        Self {
            storage,
            store,
            graph,
            retriever,
            council,
            review,
            revision_limit,
            persist,
        }
    }

    /// Drive one assessment from its current persisted state to a
    /// terminal state, emitting progress events along the way.
    pub async fn run(
        &self,
        assessment_id: &str,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> AppResult<AssessmentState> {
        let record = self
            .storage
            .get_assessment(assessment_id)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("assessment {} not found", assessment_id),
            })?;

        let mut ctx = RunCtx {
            record,
            bundle: None,
            revision_feedback: None,
            report_revisions: 0,
            insufficient_context: false,
        };

        if ctx.record.state == AssessmentState::Draft {
            sink.emit(ProgressEvent::WorkflowStart {
                stage: "ingestion".to_string(),
            });
        } else {
            info!(
                assessment_id,
                state = %ctx.record.state,
                "Resuming assessment from persisted state"
            );
        }

        let outcome = self.drive(&mut ctx, &sink, &cancel).await;

        match outcome {
            Ok(state) => Ok(state),
            Err(e) => {
                error!(assessment_id, error = %e, "Workflow failed");
                sink.emit(ProgressEvent::Error {
                    message: e.to_string(),
                });
                // Best effort: park the record in Failed so the audit
                // trail explains the halt.
                if !ctx.record.state.is_terminal()
                    && ctx.record.state.can_transition_to(AssessmentState::Failed)
                {
                    let _ = self
                        .transition(
                            &mut ctx.record,
                            AssessmentState::Failed,
                            Some(json!({"reason": e.to_string()})),
                            &sink,
                        )
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        ctx: &mut RunCtx,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> AppResult<AssessmentState> {
        loop {
            if cancel.is_cancelled() && !ctx.record.state.is_terminal() {
                // No new I/O once cancelled; park cleanly.
                if ctx.record.state.can_transition_to(AssessmentState::Cancelled) {
                    self.transition(&mut ctx.record, AssessmentState::Cancelled, None, sink)
                        .await?;
                }
                return Ok(ctx.record.state);
            }

            match ctx.record.state {
                AssessmentState::Draft => {
                    self.transition(&mut ctx.record, AssessmentState::Preprocessing, None, sink)
                        .await?;
                }
                AssessmentState::Preprocessing => {
                    self.node_preprocessing(ctx, sink).await?;
                }
                AssessmentState::Stage1Running => {
                    self.node_stage1(ctx, sink, cancel).await?;
                }
                AssessmentState::Stage1Complete => {
                    let next = match ctx.record.latest_run() {
                        Some(run) if run.stage1.len() >= 2 => AssessmentState::Stage2Running,
                        // A lone opinion has no peers to rank.
                        _ => AssessmentState::Stage3Running,
                    };
                    self.transition(&mut ctx.record, next, None, sink).await?;
                }
                AssessmentState::Stage2Running => {
                    self.node_stage2(ctx, sink, cancel).await?;
                }
                AssessmentState::Stage2Complete => {
                    self.transition(&mut ctx.record, AssessmentState::Stage3Running, None, sink)
                        .await?;
                }
                AssessmentState::Stage3Running => {
                    self.node_stage3(ctx, sink, cancel).await?;
                }
                AssessmentState::Stage3Complete => {
                    self.transition(
                        &mut ctx.record,
                        AssessmentState::SynthesisReviewPending,
                        None,
                        sink,
                    )
                    .await?;
                }
                AssessmentState::SynthesisReviewPending => {
                    self.node_review(ctx, ReviewType::Synthesis, sink, cancel)
                        .await?;
                }
                AssessmentState::SynthesisApproved => {
                    self.transition(&mut ctx.record, AssessmentState::ExtractingData, None, sink)
                        .await?;
                }
                AssessmentState::SynthesisRevisionRequested => {
                    self.node_synthesis_revision(ctx, sink).await?;
                }
                AssessmentState::ExtractingData => {
                    self.node_extract(ctx, sink).await?;
                }
                AssessmentState::GeneratingReport => {
                    self.node_generate_report(ctx, sink).await?;
                }
                AssessmentState::ReportReviewPending => {
                    self.node_review(ctx, ReviewType::Report, sink, cancel).await?;
                }
                AssessmentState::ReportApproved => {
                    self.transition(
                        &mut ctx.record,
                        AssessmentState::UpdatingKnowledge,
                        None,
                        sink,
                    )
                    .await?;
                }
                AssessmentState::ReportEditRequested => {
                    self.node_report_edit(ctx, sink).await?;
                }
                AssessmentState::ReportRegenerationRequested => {
                    self.node_report_regeneration(ctx, sink).await?;
                }
                AssessmentState::UpdatingKnowledge => {
                    self.node_update_knowledge(ctx, sink).await?;
                }
                AssessmentState::Completed => {
                    sink.emit(ProgressEvent::WorkflowComplete);
                    return Ok(AssessmentState::Completed);
                }
                // In-progress review states only exist transiently while a
                // decision is applied; on resume, fall back to the pending
                // state so the wait re-binds.
                AssessmentState::SynthesisReviewInProgress => {
                    ctx.record.state = AssessmentState::SynthesisReviewPending;
                }
                AssessmentState::ReportReviewInProgress => {
                    ctx.record.state = AssessmentState::ReportReviewPending;
                }
                AssessmentState::SynthesisRejected
                | AssessmentState::ReportRejected
                | AssessmentState::Failed
                | AssessmentState::Cancelled => {
                    return Ok(ctx.record.state);
                }
            }
        }
    }

    /// Validate against the static table, persist the record and the
    /// audit row, and emit the node event.
    async fn transition(
        &self,
        record: &mut AssessmentRecord,
        to: AssessmentState,
        metadata: Option<serde_json::Value>,
        sink: &EventSink,
    ) -> AppResult<()> {
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(AppError::State(StateError {
                assessment_id: record.assessment_id.clone(),
                from: from.to_string(),
                to: to.to_string(),
            }));
        }

        record.state = to;
        record.updated_at = Utc::now();
        self.storage.update_assessment(record).await?;
        self.storage
            .record_transition(&StateTransition {
                assessment_id: record.assessment_id.clone(),
                from,
                to,
                at: record.updated_at,
                metadata,
            })
            .await?;

        info!(assessment_id = %record.assessment_id, from = %from, to = %to, "State transition");
        sink.stage(stage_group(to), &to.to_string());
        Ok(())
    }

    /// Retrieval, the quality gate, and context synthesis.
    async fn node_preprocessing(&self, ctx: &mut RunCtx, sink: &EventSink) -> AppResult<()> {
        let filter = filter_from_metadata(&ctx.record.context_metadata);

        match self
            .retriever
            .retrieve(&ctx.record.proposal_text, &filter)
            .await
        {
            Ok(outcome) => {
                ctx.record.sources = outcome.context.sources.clone();
                ctx.record.quality.retrieval = Some(outcome.metrics.clone());
                ctx.bundle = Some(outcome.context);
                self.transition(&mut ctx.record, AssessmentState::Stage1Running, None, sink)
                    .await
            }
            Err(RetrievalError::Insufficient { hits, mean_score }) => {
                // Quality-gate failure routes to human review rather than
                // failing outright; the reviewer decides whether an
                // assessment without corpus grounding is worth running.
                warn!(
                    assessment_id = %ctx.record.assessment_id,
                    hits, mean_score, "Retrieval insufficient, routing to human review"
                );
                ctx.insufficient_context = true;
                ctx.bundle = Some(ContextBundle::default());
                ctx.record.quality.retrieval = Some(crate::retrieval::RetrievalMetrics {
                    hit_count: hits,
                    top5_mean: mean_score as f32,
                    expanded: true,
                });
                self.transition(
                    &mut ctx.record,
                    AssessmentState::SynthesisReviewPending,
                    Some(json!({"reason": "insufficient_context", "context": "empty"})),
                    sink,
                )
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn node_stage1(
        &self,
        ctx: &mut RunCtx,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let bundle = self.ensure_bundle(ctx).await?;
        let mut errors = Vec::new();
        let opinions = self
            .council
            .stage1(&ctx.record.proposal_text, &bundle.text, cancel, &mut errors)
            .await?;

        let aggregation = self.council.settings().aggregation.to_string();
        let mut run = CouncilRun::draft(opinions, &aggregation);
        run.errors = errors;
        ctx.record.council_history.push(run);
        self.transition(&mut ctx.record, AssessmentState::Stage1Complete, None, sink)
            .await
    }

    async fn node_stage2(
        &self,
        ctx: &mut RunCtx,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let opinions: Vec<Opinion> = ctx
            .record
            .latest_run()
            .map(|run| run.stage1.clone())
            .unwrap_or_default();
        let mut errors = Vec::new();
        let (samples, aggregated, meta) = self
            .council
            .stage2(
                &ctx.record.assessment_id,
                &ctx.record.proposal_text,
                &opinions,
                cancel,
                &mut errors,
            )
            .await;

        let n = opinions.len();
        if let Some(run) = ctx.record.council_history.last_mut() {
            run.stage2_samples = samples;
            run.stage2_aggregated = aggregated;
            run.aggregate_ranking =
                crate::council::ranking::aggregate_across_evaluators(&run.stage2_aggregated, n);
            run.bootstrap = meta;
            run.errors.extend(errors);
        }
        self.transition(&mut ctx.record, AssessmentState::Stage2Complete, None, sink)
            .await
    }

    async fn node_stage3(
        &self,
        ctx: &mut RunCtx,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let bundle = self.ensure_bundle(ctx).await?;
        let feedback = match ctx.revision_feedback.take() {
            Some(feedback) => Some(feedback),
            None => self.stored_revision_feedback(ctx).await?,
        };

        let run = ctx
            .record
            .latest_run()
            .cloned()
            .ok_or_else(|| AppError::Internal {
                message: "stage 3 reached without a council run".to_string(),
            })?;

        let mut errors = Vec::new();
        let (text, fallback) = self
            .council
            .stage3(
                &ctx.record.proposal_text,
                &bundle,
                &run.stage1,
                &run.stage2_aggregated,
                &run.stage2_samples,
                &run.bootstrap,
                feedback.as_deref(),
                cancel,
                &mut errors,
            )
            .await?;

        // Bounded refinement: a synthesis that fails validation gets the
        // issue list back once or twice before the reviewer sees it.
        let mut text = text;
        let mut retry_count = 0;
        if !fallback {
            let max = self.council.settings().max_refinements;
            while retry_count < max {
                let issues = validate_synthesis(&text);
                if issues.is_empty() {
                    break;
                }
                warn!(
                    assessment_id = %ctx.record.assessment_id,
                    issues = issues.len(),
                    pass = retry_count + 1,
                    "Synthesis failed validation, refining"
                );
                let mut scratch = run.clone();
                scratch.stage3_text = text.clone();
                match self
                    .council
                    .refine(&scratch, &ctx.record.proposal_text, &bundle, &issues, cancel)
                    .await
                {
                    Ok(refined) => {
                        text = refined.stage3_text;
                        retry_count += 1;
                    }
                    Err(e) => {
                        errors.push(format!("refinement: {}", e));
                        break;
                    }
                }
            }
            ctx.record.quality.synthesis_issues = validate_synthesis(&text);
        }

        if let Some(run) = ctx.record.council_history.last_mut() {
            run.stage3_text = text;
            run.chairman_model = self.council.settings().chairman_model.clone();
            run.chairman_fallback = fallback;
            run.retry_count = retry_count;
            run.errors.extend(errors);
        }
        self.transition(&mut ctx.record, AssessmentState::Stage3Complete, None, sink)
            .await
    }

    /// Park on a human review checkpoint until a decision arrives or the
    /// assessment is cancelled.
    async fn node_review(
        &self,
        ctx: &mut RunCtx,
        review_type: ReviewType,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let assessment_id = ctx.record.assessment_id.clone();
        let priority = priority_from_metadata(&ctx.record.context_metadata);
        let pending_since = ctx.record.updated_at;

        // A decision may already be in storage when nothing was parked to
        // receive it (process restart between decision and resume).
        let stored = self
            .storage
            .get_review_decisions(&assessment_id)
            .await?
            .into_iter()
            .rev()
            .find(|d| d.review_type == review_type && d.reviewed_at >= pending_since);

        let decision = match stored {
            Some(decision) => decision,
            None => {
                // Register the waiter before announcing the review so a
                // prompt decision cannot slip between the two.
                let rx = match self.review.rebind(&assessment_id).await {
                    Ok(rx) => rx,
                    Err(_) => self.review.open(&assessment_id, review_type, priority).await?,
                };
                sink.emit(ProgressEvent::ReviewRequired {
                    review_type,
                    assessment_id: assessment_id.clone(),
                });

                tokio::select! {
                    decision = rx => decision.map_err(|_| AppError::Internal {
                        message: "review channel closed without a decision".to_string(),
                    })?,
                    _ = cancel.cancelled() => {
                        self.transition(&mut ctx.record, AssessmentState::Cancelled, None, sink).await?;
                        return Ok(());
                    }
                }
            }
        };

        let in_progress = match review_type {
            ReviewType::Synthesis => AssessmentState::SynthesisReviewInProgress,
            ReviewType::Report => AssessmentState::ReportReviewInProgress,
        };
        self.transition(
            &mut ctx.record,
            in_progress,
            Some(json!({"reviewer": decision.reviewer_id})),
            sink,
        )
        .await?;

        let next = match (review_type, decision.decision) {
            (ReviewType::Synthesis, ReviewAction::Approve) => AssessmentState::SynthesisApproved,
            (ReviewType::Synthesis, ReviewAction::RequestRevision) => {
                AssessmentState::SynthesisRevisionRequested
            }
            (ReviewType::Synthesis, ReviewAction::Reject) => AssessmentState::SynthesisRejected,
            // An edit of the raw synthesis is treated as a revision ask.
            (ReviewType::Synthesis, ReviewAction::Edit) => {
                AssessmentState::SynthesisRevisionRequested
            }
            (ReviewType::Report, ReviewAction::Approve) => AssessmentState::ReportApproved,
            (ReviewType::Report, ReviewAction::Edit) => AssessmentState::ReportEditRequested,
            (ReviewType::Report, ReviewAction::RequestRevision) => {
                AssessmentState::ReportRegenerationRequested
            }
            (ReviewType::Report, ReviewAction::Reject) => AssessmentState::ReportRejected,
        };

        if matches!(
            next,
            AssessmentState::SynthesisRevisionRequested
        ) {
            ctx.revision_feedback = decision
                .revision_feedback
                .clone()
                .or_else(|| Some(decision.comments.clone()));
        }
        if next == AssessmentState::ReportEditRequested {
            ctx.revision_feedback = decision.revision_feedback.clone();
        }

        self.transition(
            &mut ctx.record,
            next,
            Some(json!({"decision": decision.decision.to_string()})),
            sink,
        )
        .await
    }

    /// Revision loop back into stage 3: a fresh council run is appended
    /// reusing stages 1 and 2, and the chairman sees the feedback.
    async fn node_synthesis_revision(&self, ctx: &mut RunCtx, sink: &EventSink) -> AppResult<()> {
        if ctx.record.revision_count() >= self.revision_limit {
            warn!(
                assessment_id = %ctx.record.assessment_id,
                limit = self.revision_limit,
                "Revision limit exceeded"
            );
            return self
                .transition(
                    &mut ctx.record,
                    AssessmentState::Failed,
                    Some(json!({"reason": "revision_limit_exceeded"})),
                    sink,
                )
                .await;
        }

        if let Some(previous) = ctx.record.latest_run().cloned() {
            let mut next = previous;
            next.run_id = uuid::Uuid::new_v4().to_string();
            next.stage3_text = String::new();
            next.chairman_fallback = false;
            next.retry_count = 0;
            next.created_at = Utc::now();
            ctx.record.council_history.push(next);
        }
        self.transition(&mut ctx.record, AssessmentState::Stage3Running, None, sink)
            .await
    }

    async fn node_extract(&self, ctx: &mut RunCtx, sink: &EventSink) -> AppResult<()> {
        let synthesis = ctx
            .record
            .latest_run()
            .map(|run| run.stage3_text.clone())
            .unwrap_or_default();
        let report = extract_report(&synthesis, &ctx.record.sources);
        ctx.record.report = Some(report);
        self.transition(&mut ctx.record, AssessmentState::GeneratingReport, None, sink)
            .await
    }

    async fn node_generate_report(&self, ctx: &mut RunCtx, sink: &EventSink) -> AppResult<()> {
        let assessment_id = ctx.record.assessment_id.clone();
        if let Some(report) = &ctx.record.report {
            ctx.record.quality.completeness = report.completeness();
            ctx.record.quality.citation_count = report.citations.len();
            ctx.record.quality.missing_themes = report.missing_themes;
            let mut documents: Vec<&str> = ctx
                .record
                .sources
                .iter()
                .map(|s| s.document_id.as_str())
                .collect();
            documents.sort_unstable();
            documents.dedup();
            ctx.record.quality.sources_count = documents.len();
        }

        sink.emit(ProgressEvent::Report { assessment_id });
        self.transition(
            &mut ctx.record,
            AssessmentState::ReportReviewPending,
            None,
            sink,
        )
        .await
    }

    /// A reviewer edit: the feedback text replaces the overall summary
    /// section, then the report goes back for review.
    async fn node_report_edit(&self, ctx: &mut RunCtx, sink: &EventSink) -> AppResult<()> {
        ctx.report_revisions += 1;
        if ctx.report_revisions > self.revision_limit {
            return self
                .transition(
                    &mut ctx.record,
                    AssessmentState::Failed,
                    Some(json!({"reason": "revision_limit_exceeded"})),
                    sink,
                )
                .await;
        }
        if let (Some(report), Some(edit)) =
            (ctx.record.report.as_mut(), ctx.revision_feedback.take())
        {
            report
                .sections
                .insert(crate::report::SectionName::OverallAssessmentSummary, edit);
        }
        self.transition(
            &mut ctx.record,
            AssessmentState::ReportReviewPending,
            Some(json!({"edited": true})),
            sink,
        )
        .await
    }

    /// Regeneration reuses the prior stage-3 text and re-runs extraction.
    async fn node_report_regeneration(&self, ctx: &mut RunCtx, sink: &EventSink) -> AppResult<()> {
        ctx.report_revisions += 1;
        if ctx.report_revisions > self.revision_limit {
            return self
                .transition(
                    &mut ctx.record,
                    AssessmentState::Failed,
                    Some(json!({"reason": "revision_limit_exceeded"})),
                    sink,
                )
                .await;
        }
        let synthesis = ctx
            .record
            .latest_run()
            .map(|run| run.stage3_text.clone())
            .unwrap_or_default();
        ctx.record.report = Some(extract_report(&synthesis, &ctx.record.sources));
        self.transition(&mut ctx.record, AssessmentState::GeneratingReport, None, sink)
            .await
    }

    /// Fold the finalized assessment back into the knowledge base. Adds
    /// are idempotent by content hash, so repeats are safe.
    async fn node_update_knowledge(&self, ctx: &mut RunCtx, sink: &EventSink) -> AppResult<()> {
        let synthesis = ctx
            .record
            .latest_run()
            .map(|run| run.stage3_text.clone())
            .unwrap_or_default();
        let categories = match_categories(&ctx.record.proposal_text);
        let document_id = format!("assessment-{}", ctx.record.assessment_id);

        let mut chunks = vec![Chunk::new(
            format!("{}-proposal", document_id),
            ChunkKind::Category,
            ctx.record.proposal_text.clone(),
            document_id.clone(),
        )
        .with_categories(categories.clone())];
        if !synthesis.is_empty() {
            chunks.push(
                Chunk::new(
                    format!("{}-synthesis", document_id),
                    ChunkKind::Analysis,
                    synthesis,
                    document_id.clone(),
                )
                .with_categories(categories),
            );
        }

        {
            // Writes are serialized per store; readers keep the previous
            // snapshot until the lock releases.
            let mut store = self.store.write().await;
            store.add(&chunks).await?;
            if let Some(dir) = &self.persist.store_dir {
                store.persist(dir)?;
            }
        }
        {
            let mut graph = self.graph.write().await;
            for chunk in &chunks {
                graph.insert_chunk(chunk);
            }
            if let Some(path) = &self.persist.graph_path {
                graph.persist(path)?;
            }
        }

        self.transition(&mut ctx.record, AssessmentState::Completed, None, sink)
            .await
    }

    /// The context bundle for council stages, rebuilt deterministically
    /// from the corpus snapshot when resuming mid-council.
    async fn ensure_bundle(&self, ctx: &mut RunCtx) -> AppResult<ContextBundle> {
        if let Some(bundle) = &ctx.bundle {
            return Ok(bundle.clone());
        }
        if ctx.insufficient_context {
            return Ok(ContextBundle::default());
        }
        let filter = filter_from_metadata(&ctx.record.context_metadata);
        match self
            .retriever
            .retrieve(&ctx.record.proposal_text, &filter)
            .await
        {
            Ok(outcome) => {
                ctx.bundle = Some(outcome.context.clone());
                Ok(outcome.context)
            }
            Err(RetrievalError::Insufficient { .. }) => {
                ctx.insufficient_context = true;
                Ok(ContextBundle::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Feedback for a stage-3 rerun after a process restart: the latest
    /// persisted request-revision decision.
    async fn stored_revision_feedback(&self, ctx: &RunCtx) -> AppResult<Option<String>> {
        if ctx.record.council_history.len() < 2 {
            return Ok(None);
        }
        let decisions = self
            .storage
            .get_review_decisions(&ctx.record.assessment_id)
            .await?;
        Ok(decisions
            .into_iter()
            .rev()
            .find(|d| {
                d.review_type == ReviewType::Synthesis
                    && d.decision == ReviewAction::RequestRevision
            })
            .and_then(|d| d.revision_feedback.or(Some(d.comments))))
    }
}

/// Stage grouping for progress events.
fn stage_group(state: AssessmentState) -> &'static str {
    use AssessmentState::*;
    match state {
        Draft | Preprocessing => "ingestion",
        Stage1Running | Stage1Complete | Stage2Running | Stage2Complete | Stage3Running
        | Stage3Complete => "council",
        SynthesisReviewPending | SynthesisReviewInProgress | SynthesisApproved
        | SynthesisRevisionRequested | SynthesisRejected => "synthesis_review",
        ExtractingData | GeneratingReport => "report",
        ReportReviewPending | ReportReviewInProgress | ReportApproved | ReportEditRequested
        | ReportRegenerationRequested | ReportRejected => "report_review",
        UpdatingKnowledge => "knowledge",
        Completed | Failed | Cancelled => "terminal",
    }
}

/// Build the retrieval filter from submission metadata.
fn filter_from_metadata(metadata: &serde_json::Value) -> MetadataFilter {
    let mut filter = MetadataFilter::default();
    if let Some(jurisdiction) = metadata.get("jurisdiction").and_then(|v| v.as_str()) {
        filter.jurisdiction = Some(jurisdiction.to_string());
    }
    if let Some(document_type) = metadata.get("document_type").and_then(|v| v.as_str()) {
        filter.document_type = Some(document_type.to_string());
    }
    if let Some(year) = metadata.get("year").and_then(|v| v.as_i64()) {
        filter.year_range = Some((year as i32, year as i32));
    }
    if let Some(category) = metadata.get("category").and_then(|v| v.as_str()) {
        if let Ok(category) = category.parse() {
            filter.categories = vec![category];
        }
    }
    filter
}

fn priority_from_metadata(metadata: &serde_json::Value) -> ReviewPriority {
    metadata
        .get("priority")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}
