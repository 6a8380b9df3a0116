//! End-to-end workflow tests with a scripted council and local embedder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;

use ria_council::config::{
    AggregationMethod, CouncilSettings, RequestConfig, RetrievalSettings, ReviewSettings,
};
use ria_council::corpus::{Chunk, ChunkKind, PolicyCategory};
use ria_council::council::CouncilEngine;
use ria_council::embedding::{Embedder, HashEmbedder};
use ria_council::error::ModelError;
use ria_council::gateway::{GatewayClient, ModelBackend, ModelRequest, ModelResponse};
use ria_council::graph::KnowledgeGraph;
use ria_council::index::VectorStore;
use ria_council::report::{ImpactTag, THEME_COUNT};
use ria_council::retrieval::Retriever;
use ria_council::review::{ReviewAction, ReviewStore};
use ria_council::service::AssessmentService;
use ria_council::storage::{SqliteStorage, Storage};
use ria_council::workflow::engine::{PersistPaths, WorkflowEngine};
use ria_council::workflow::{AssessmentState, ProgressEvent};

const PROPOSAL: &str = "Regulation establishing a framework for trustworthy artificial \
intelligence systems across the internal market, including mandatory risk assessments for \
high-risk applications, transparency obligations towards end users, conformity assessment \
procedures before market entry, post-market monitoring duties for providers, and governance \
mechanisms coordinated between national supervisory authorities and a central board, with \
particular attention to the digital economy and fundamental rights of affected persons.";

/// Scripted council: drafts, rankings, and a fully structured chairman
/// synthesis that passes validation and cites a corpus chunk.
struct ScriptedCouncil {
    fail_chairman: bool,
}

fn synthesis_text(revised: bool) -> String {
    let mut text = String::new();
    if revised {
        text.push_str("REVISED ");
    }
    text.push_str(
        "1. Background and Problem Definition\nThe proposal addresses documented gaps in \
         oversight of algorithmic systems [kb-0], following the analytical approach of earlier \
         assessments.\n\n2. Executive Summary\nThe framework is expected to deliver net \
         benefits.\n\n3. Proposal Overview\nRisk-tiered obligations with conformity assessment \
         before market entry.\n\n4. 21 Belgian Impact Themes Assessment\n",
    );
    for number in 1..=THEME_COUNT {
        let tag = match number % 3 {
            0 => "NO IMPACT",
            1 => "POSITIVE IMPACT",
            _ => "NEGATIVE IMPACT",
        };
        text.push_str(&format!(
            "[{}] {}: the measure changes incentives for the affected actors and the \
             evidence base supports this determination [kb-0].\n",
            number, tag
        ));
    }
    text.push_str("\n5. Overall Assessment Summary\nOn balance the framework is proportionate.\n");
    text
}

#[async_trait]
impl ModelBackend for ScriptedCouncil {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let prompt = &request.messages[0].content;
        let content = if prompt.contains("FINAL RANKING") {
            "Weighed all responses.\n\nFINAL RANKING:\n1. Response B\n2. Response A\n3. Response C"
                .to_string()
        } else if prompt.contains("Chairman") {
            if self.fail_chairman {
                return Err(ModelError::Permanent {
                    model: request.model.clone(),
                    status: 403,
                    message: "quota exhausted".to_string(),
                });
            }
            synthesis_text(prompt.contains("REVIEWER FEEDBACK"))
        } else if prompt.contains("needs refinement") {
            synthesis_text(false)
        } else {
            format!("DRAFT from {} proposing a risk-tiered approach", request.model)
        };
        Ok(ModelResponse {
            model: request.model.clone(),
            content,
            latency_ms: 1,
        })
    }
}

struct Harness {
    service: AssessmentService,
    store: Arc<RwLock<VectorStore>>,
    storage: Arc<dyn Storage>,
}

fn corpus() -> Vec<Chunk> {
    (0..6)
        .map(|i| {
            Chunk::new(
                format!("kb-{}", i),
                ChunkKind::Analysis,
                format!(
                    "artificial intelligence governance framework analysis {} covering risk \
                     assessment obligations and transparency for digital systems",
                    i
                ),
                format!("doc-{}", i),
            )
            .with_categories(vec![PolicyCategory::Digital])
        })
        .collect()
}

async fn harness(fail_chairman: bool, seed_corpus: bool) -> Harness {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(128));

    let mut store = VectorStore::new(embedder);
    let graph = if seed_corpus {
        let chunks = corpus();
        store.add(&chunks).await.unwrap();
        KnowledgeGraph::build_from_chunks(&chunks)
    } else {
        KnowledgeGraph::new()
    };
    let store = Arc::new(RwLock::new(store));
    let graph = Arc::new(RwLock::new(graph));

    let retriever = Retriever::new(store.clone(), graph.clone(), RetrievalSettings::default());
    let gateway = GatewayClient::new(
        Arc::new(ScriptedCouncil { fail_chairman }),
        RequestConfig {
            timeout_ms: 2_000,
            max_retries: 0,
            retry_delay_ms: 1,
        },
    );
    let council = CouncilEngine::new(
        gateway,
        CouncilSettings {
            council_models: vec!["m-a".to_string(), "m-b".to_string(), "m-c".to_string()],
            chairman_model: "chairman".to_string(),
            bootstrap_iterations: 3,
            aggregation: AggregationMethod::Borda,
            ..CouncilSettings::default()
        },
    )
    .unwrap();

    let review_settings = ReviewSettings::default();
    let review = Arc::new(ReviewStore::new(storage.clone(), review_settings.clone()));
    let engine = Arc::new(WorkflowEngine::new(
        storage.clone(),
        store.clone(),
        graph,
        retriever,
        council,
        review.clone(),
        review_settings.revision_limit,
        PersistPaths::default(),
    ));

    Harness {
        service: AssessmentService::with_components(storage.clone(), review, engine),
        store,
        storage,
    }
}

async fn wait_for_review(
    events: &mut mpsc::UnboundedReceiver<ProgressEvent>,
    expected: ria_council::review::ReviewType,
) -> String {
    loop {
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for review event")
            .expect("event stream closed unexpectedly");
        if let ProgressEvent::ReviewRequired {
            review_type,
            assessment_id,
        } = event
        {
            assert_eq!(review_type, expected);
            return assessment_id;
        }
    }
}

async fn wait_for_state(harness: &Harness, assessment_id: &str, want: AssessmentState) {
    for _ in 0..100 {
        let state = harness.service.get_status(assessment_id).await.unwrap();
        if state == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "assessment never reached {}, last state: {}",
        want,
        harness.service.get_status(assessment_id).await.unwrap()
    );
}

#[tokio::test]
async fn happy_path_runs_to_completion() {
    let harness = harness(false, true).await;
    let id = harness
        .service
        .create_assessment(PROPOSAL, json!({"jurisdiction": "EU"}))
        .await
        .unwrap();

    let before = harness.store.read().await.len();
    let mut events = harness.service.stream_assessment(&id).await.unwrap();

    wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;
    harness
        .service
        .review(&id, ReviewAction::Approve, "synthesis holds up", None, "reviewer-1")
        .await
        .unwrap();

    wait_for_review(&mut events, ria_council::review::ReviewType::Report).await;
    harness
        .service
        .review(&id, ReviewAction::Approve, "ship it", None, "reviewer-1")
        .await
        .unwrap();

    wait_for_state(&harness, &id, AssessmentState::Completed).await;

    let record = harness.service.get_assessment(&id).await.unwrap();
    let report = record.report.expect("report present");
    assert_eq!(report.themes.len(), THEME_COUNT);
    assert_eq!(report.missing_themes, 0);
    assert!(report
        .themes
        .iter()
        .all(|t| t.impact != ImpactTag::Unknown));
    assert!(report.citations.contains(&"kb-0".to_string()));
    assert_eq!(record.council_history.len(), 1);

    // Knowledge-base update folded the proposal and synthesis back in.
    let after = harness.store.read().await.len();
    assert_eq!(after, before + 2);

    // The audit log replays the full path.
    let transitions = harness.storage.get_transitions(&id).await.unwrap();
    assert_eq!(transitions[0].from, AssessmentState::Draft);
    assert_eq!(
        transitions.last().unwrap().to,
        AssessmentState::Completed
    );
    for pair in transitions.windows(2) {
        assert_eq!(pair[0].to, pair[1].from, "audit log must chain");
    }
}

#[tokio::test]
async fn revision_loop_reruns_chairman_with_feedback() {
    let harness = harness(false, true).await;
    let id = harness
        .service
        .create_assessment(PROPOSAL, json!({}))
        .await
        .unwrap();
    let mut events = harness.service.stream_assessment(&id).await.unwrap();

    wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;
    harness
        .service
        .review(
            &id,
            ReviewAction::RequestRevision,
            "needs more depth",
            Some("expand fundamental rights analysis".to_string()),
            "reviewer-1",
        )
        .await
        .unwrap();

    // The second synthesis arrives for review with the feedback applied.
    wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;
    let record = harness.service.get_assessment(&id).await.unwrap();
    assert_eq!(record.council_history.len(), 2);
    let latest = record.council_history.last().unwrap();
    assert!(
        latest.stage3_text.starts_with("REVISED"),
        "feedback should reach the chairman prompt"
    );

    harness
        .service
        .review(&id, ReviewAction::Approve, "better", None, "reviewer-1")
        .await
        .unwrap();
    wait_for_review(&mut events, ria_council::review::ReviewType::Report).await;
    harness
        .service
        .review(&id, ReviewAction::Approve, "done", None, "reviewer-1")
        .await
        .unwrap();
    wait_for_state(&harness, &id, AssessmentState::Completed).await;
}

#[tokio::test]
async fn revision_limit_fails_the_workflow() {
    let harness = harness(false, true).await;
    let id = harness
        .service
        .create_assessment(PROPOSAL, json!({}))
        .await
        .unwrap();
    let mut events = harness.service.stream_assessment(&id).await.unwrap();

    // Default limit is three revisions; the fourth request trips it.
    for round in 0..4 {
        wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;
        harness
            .service
            .review(
                &id,
                ReviewAction::RequestRevision,
                &format!("round {}", round),
                Some("still insufficient".to_string()),
                "reviewer-1",
            )
            .await
            .unwrap();
    }

    wait_for_state(&harness, &id, AssessmentState::Failed).await;
    let transitions = harness.storage.get_transitions(&id).await.unwrap();
    let last = transitions.last().unwrap();
    assert_eq!(last.to, AssessmentState::Failed);
    assert_eq!(
        last.metadata.as_ref().and_then(|m| m["reason"].as_str()),
        Some("revision_limit_exceeded")
    );
}

#[tokio::test]
async fn chairman_fallback_still_reaches_review() {
    let harness = harness(true, true).await;
    let id = harness
        .service
        .create_assessment(PROPOSAL, json!({}))
        .await
        .unwrap();
    let mut events = harness.service.stream_assessment(&id).await.unwrap();

    wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;

    let record = harness.service.get_assessment(&id).await.unwrap();
    assert_eq!(record.state, AssessmentState::SynthesisReviewPending);
    let run = record.council_history.last().unwrap();
    assert!(run.chairman_fallback);
    assert!(run.stage3_text.starts_with("DRAFT from"));
}

#[tokio::test]
async fn empty_corpus_routes_to_review_with_empty_context() {
    let harness = harness(false, false).await;
    let id = harness
        .service
        .create_assessment(PROPOSAL, json!({}))
        .await
        .unwrap();
    let mut events = harness.service.stream_assessment(&id).await.unwrap();

    wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;

    let record = harness.service.get_assessment(&id).await.unwrap();
    assert_eq!(record.state, AssessmentState::SynthesisReviewPending);
    let retrieval = record.quality.retrieval.expect("retrieval metrics recorded");
    assert_eq!(retrieval.hit_count, 0);
    assert!(record.council_history.is_empty());
    assert!(record.sources.is_empty());
}

#[tokio::test]
async fn cancellation_during_review_parks_cleanly() {
    let harness = harness(false, true).await;
    let id = harness
        .service
        .create_assessment(PROPOSAL, json!({}))
        .await
        .unwrap();
    let mut events = harness.service.stream_assessment(&id).await.unwrap();

    wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;
    harness.service.cancel(&id).await.unwrap();
    wait_for_state(&harness, &id, AssessmentState::Cancelled).await;
}

#[tokio::test]
async fn resume_applies_decision_recorded_while_offline() {
    let harness = harness(false, true).await;
    let id = harness
        .service
        .create_assessment(PROPOSAL, json!({}))
        .await
        .unwrap();

    // First run: reach the synthesis review, then drop the runner without
    // deciding (as if the process died while parked).
    let mut events = harness.service.stream_assessment(&id).await.unwrap();
    wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;
    drop(events);
    harness.service.cancel(&id).await.ok();
    wait_for_state(&harness, &id, AssessmentState::Cancelled).await;
    // Cancellation lands the record in Cancelled, which is terminal; for
    // this scenario force the parked state back as a crash would leave it.
    let mut record = harness.service.get_assessment(&id).await.unwrap();
    record.state = AssessmentState::SynthesisReviewPending;
    harness.storage.update_assessment(&record).await.unwrap();

    // Decision arrives while nothing is running.
    harness
        .service
        .review(&id, ReviewAction::Approve, "approved offline", None, "reviewer-2")
        .await
        .unwrap();

    // A fresh runner picks the stored decision up and drives on.
    let mut events = harness.service.stream_assessment(&id).await.unwrap();
    wait_for_review(&mut events, ria_council::review::ReviewType::Report).await;
    harness
        .service
        .review(&id, ReviewAction::Approve, "ok", None, "reviewer-2")
        .await
        .unwrap();
    wait_for_state(&harness, &id, AssessmentState::Completed).await;
}

#[tokio::test]
async fn report_regeneration_reextracts_from_same_synthesis() {
    let harness = harness(false, true).await;
    let id = harness
        .service
        .create_assessment(PROPOSAL, json!({}))
        .await
        .unwrap();
    let mut events = harness.service.stream_assessment(&id).await.unwrap();

    wait_for_review(&mut events, ria_council::review::ReviewType::Synthesis).await;
    harness
        .service
        .review(&id, ReviewAction::Approve, "fine", None, "reviewer-1")
        .await
        .unwrap();

    wait_for_review(&mut events, ria_council::review::ReviewType::Report).await;
    let first = harness.service.get_report(&id).await.unwrap();
    harness
        .service
        .review(&id, ReviewAction::RequestRevision, "re-extract", None, "reviewer-1")
        .await
        .unwrap();

    // Regeneration reuses the stage-3 text, so the report content is
    // stable while the council history stays at one run.
    wait_for_review(&mut events, ria_council::review::ReviewType::Report).await;
    let second = harness.service.get_report(&id).await.unwrap();
    assert_eq!(first.themes.len(), second.themes.len());
    let record = harness.service.get_assessment(&id).await.unwrap();
    assert_eq!(record.council_history.len(), 1);

    harness
        .service
        .review(&id, ReviewAction::Approve, "good now", None, "reviewer-1")
        .await
        .unwrap();
    wait_for_state(&harness, &id, AssessmentState::Completed).await;
}
