//! Three-stage council protocol.
//!
//! Stage 1 collects first opinions from every council model in parallel.
//! Stage 2 runs bootstrap peer ranking: each iteration pairs a rotating
//! evaluation criterion with a seeded permutation of the anonymized
//! responses, and every council model ranks the set. Stage 3 hands the
//! full deliberation record to the chairman for final synthesis.
//!
//! The chairman never sits on the council; that invariant is checked at
//! construction and again at run start.

pub mod bootstrap;
pub mod ranking;

pub use bootstrap::{default_criteria, BootstrapContext, EvaluationCriterion};
pub use ranking::{AggregateRank, BootstrapSample, ConsensusRanking};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AggregationMethod, CouncilSettings};
use crate::error::{CouncilError, ModelError};
use crate::gateway::{GatewayClient, Message, QueryParams};
use crate::prompts::{self, SpecialistRole};
use crate::retrieval::ContextBundle;

/// A stage-1 opinion from one council model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opinion {
    /// Model that produced the opinion.
    pub model: String,
    /// Anonymized label in enumeration order ("Response A", ...).
    pub label: String,
    /// Opinion text.
    pub text: String,
}

/// Bootstrap configuration recorded on a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapMeta {
    /// Iterations executed.
    pub iterations: usize,
    /// Whether randomized contexts were enabled.
    pub enabled: bool,
    /// Criterion names used, in iteration order.
    pub criteria: Vec<String>,
    /// Aggregation method name.
    pub aggregation: String,
}

/// Record of one full council pass. Fields populate monotonically; after
/// `stage3_text` is set the run is never mutated; a revision cycle
/// appends a fresh run to the assessment's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilRun {
    /// Run identifier.
    pub run_id: String,
    /// Stage-1 opinions, labels in enumeration order.
    pub stage1: Vec<Opinion>,
    /// Every parsed stage-2 sample (original indices).
    pub stage2_samples: Vec<BootstrapSample>,
    /// Per-evaluator consensus rankings.
    pub stage2_aggregated: Vec<ConsensusRanking>,
    /// Cross-evaluator average positions.
    pub aggregate_ranking: Vec<AggregateRank>,
    /// Chairman synthesis text.
    pub stage3_text: String,
    /// Model that produced `stage3_text`.
    pub chairman_model: String,
    /// True when the best stage-1 response stood in for the chairman.
    pub chairman_fallback: bool,
    /// Bootstrap configuration used.
    pub bootstrap: BootstrapMeta,
    /// Chairman refinement passes consumed.
    pub retry_count: u32,
    /// Non-fatal errors collected along the way.
    pub errors: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl CouncilRun {
    /// A run holding only stage-1 output; later stages populate
    /// monotonically as the workflow advances.
    pub fn draft(stage1: Vec<Opinion>, aggregation: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            stage1,
            stage2_samples: Vec::new(),
            stage2_aggregated: Vec::new(),
            aggregate_ranking: Vec::new(),
            stage3_text: String::new(),
            chairman_model: String::new(),
            chairman_fallback: false,
            bootstrap: BootstrapMeta {
                iterations: 0,
                enabled: false,
                criteria: Vec::new(),
                aggregation: aggregation.to_string(),
            },
            retry_count: 0,
            errors: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// The council engine.
#[derive(Clone)]
pub struct CouncilEngine {
    gateway: GatewayClient,
    settings: CouncilSettings,
    criteria: Vec<EvaluationCriterion>,
}

impl CouncilEngine {
    /// Create a council engine. Fails if the chairman sits on the council
    /// or the council is empty.
    pub fn new(gateway: GatewayClient, settings: CouncilSettings) -> Result<Self, CouncilError> {
        if settings.council_models.is_empty() {
            return Err(CouncilError::Config {
                message: "council has no models".to_string(),
            });
        }
        if settings.council_models.contains(&settings.chairman_model) {
            return Err(CouncilError::Config {
                message: format!(
                    "chairman '{}' must not be a council member",
                    settings.chairman_model
                ),
            });
        }
        Ok(Self {
            gateway,
            settings,
            criteria: default_criteria(),
        })
    }

    /// Override the evaluation criteria.
    pub fn with_criteria(mut self, criteria: Vec<EvaluationCriterion>) -> Self {
        if !criteria.is_empty() {
            self.criteria = criteria;
        }
        self
    }

    /// The council settings in effect.
    pub fn settings(&self) -> &CouncilSettings {
        &self.settings
    }

    /// Run the full three-stage protocol.
    pub async fn run(
        &self,
        assessment_id: &str,
        proposal: &str,
        context: &ContextBundle,
        revision_feedback: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CouncilRun, CouncilError> {
        let mut errors: Vec<String> = Vec::new();

        let opinions = self.stage1(proposal, &context.text, cancel, &mut errors).await?;
        info!(
            assessment_id = %assessment_id,
            opinions = opinions.len(),
            "Council stage 1 complete"
        );

        let (samples, aggregated, meta) = self
            .stage2(assessment_id, proposal, &opinions, cancel, &mut errors)
            .await;
        info!(
            assessment_id = %assessment_id,
            samples = samples.len(),
            evaluators = aggregated.len(),
            "Council stage 2 complete"
        );

        let aggregate_ranking = ranking::aggregate_across_evaluators(&aggregated, opinions.len());

        let (stage3_text, chairman_fallback) = self
            .stage3(
                proposal,
                context,
                &opinions,
                &aggregated,
                &samples,
                &meta,
                revision_feedback,
                cancel,
                &mut errors,
            )
            .await?;
        info!(
            assessment_id = %assessment_id,
            fallback = chairman_fallback,
            "Council stage 3 complete"
        );

        Ok(CouncilRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            stage1: opinions,
            stage2_samples: samples,
            stage2_aggregated: aggregated,
            aggregate_ranking,
            stage3_text,
            chairman_model: self.settings.chairman_model.clone(),
            chairman_fallback,
            bootstrap: meta,
            retry_count: 0,
            errors,
            created_at: Utc::now(),
        })
    }

    /// Re-invoke the chairman once with a refinement prompt. Used by the
    /// workflow's bounded validation loop; the refined text replaces
    /// `stage3_text` on a cloned run with `retry_count` bumped.
    pub async fn refine(
        &self,
        run: &CouncilRun,
        proposal: &str,
        context: &ContextBundle,
        issues: &[String],
        cancel: &CancellationToken,
    ) -> Result<CouncilRun, CouncilError> {
        let prompt = prompts::refinement(&run.stage3_text, issues, proposal, &context.text);
        let params = QueryParams::default().with_timeout_ms(self.settings.chairman_timeout_ms);
        let response = self
            .gateway
            .query(
                &self.settings.chairman_model,
                vec![Message::user(prompt)],
                params,
                cancel,
            )
            .await
            .map_err(CouncilError::Chairman)?;

        let mut refined = run.clone();
        refined.stage3_text = response.content;
        refined.retry_count += 1;
        Ok(refined)
    }

    /// Stage 1: collect first opinions from every council model in
    /// parallel. Non-fatal per-model failures are appended to `errors`.
    pub async fn stage1(
        &self,
        proposal: &str,
        context_text: &str,
        cancel: &CancellationToken,
        errors: &mut Vec<String>,
    ) -> Result<Vec<Opinion>, CouncilError> {
        let mut set = JoinSet::new();
        for (seat, model) in self.settings.council_models.iter().enumerate() {
            let prompt = prompts::stage1(proposal, context_text, SpecialistRole::for_seat(seat));
            let gateway = self.gateway.clone();
            let model = model.clone();
            let cancel = cancel.clone();
            let params = QueryParams::default().with_timeout_ms(self.settings.model_timeout_ms);
            set.spawn(async move {
                let result = gateway
                    .query(&model, vec![Message::user(prompt)], params, &cancel)
                    .await;
                (seat, model, result)
            });
        }

        let mut by_seat: Vec<Option<(String, String)>> =
            vec![None; self.settings.council_models.len()];
        while let Some(joined) = set.join_next().await {
            let Ok((seat, model, result)) = joined else {
                continue;
            };
            match result {
                Ok(response) => by_seat[seat] = Some((model, response.content)),
                Err(e) => {
                    warn!(model = %model, error = %e, "Stage 1 opinion failed");
                    errors.push(format!("stage1 {}: {}", model, e));
                }
            }
        }

        let opinions: Vec<Opinion> = by_seat
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(idx, (model, text))| Opinion {
                model,
                label: ranking::label(idx),
                text,
            })
            .collect();

        // A single-model council legitimately produces one opinion; any
        // larger council needs at least two to deliberate.
        let minimum = if self.settings.council_models.len() == 1 { 1 } else { 2 };
        if opinions.len() < minimum {
            return Err(CouncilError::InsufficientResponses {
                received: opinions.len(),
                expected: self.settings.council_models.len(),
            });
        }
        Ok(opinions)
    }

    /// Stage 2: bootstrap peer ranking over the stage-1 opinions.
    pub async fn stage2(
        &self,
        assessment_id: &str,
        proposal: &str,
        opinions: &[Opinion],
        cancel: &CancellationToken,
        errors: &mut Vec<String>,
    ) -> (Vec<BootstrapSample>, Vec<ConsensusRanking>, BootstrapMeta) {
        let n = opinions.len();
        let enabled = self.settings.enable_bootstrap && self.settings.bootstrap_iterations > 0;

        if n < 2 {
            // No peers to rank.
            return (
                Vec::new(),
                Vec::new(),
                BootstrapMeta {
                    iterations: 0,
                    enabled,
                    criteria: Vec::new(),
                    aggregation: self.settings.aggregation.to_string(),
                },
            );
        }

        let contexts = if enabled {
            bootstrap::contexts(
                assessment_id,
                self.settings.bootstrap_iterations,
                &self.criteria,
                n,
            )
        } else {
            // Single non-randomized pass: identity order, balanced lens.
            vec![BootstrapContext {
                iteration: 0,
                criterion: self
                    .criteria
                    .iter()
                    .find(|c| c.name == "balanced")
                    .cloned()
                    .unwrap_or_else(|| self.criteria[0].clone()),
                permutation: (0..n).collect(),
            }]
        };

        let mut samples: Vec<BootstrapSample> = Vec::new();
        let criteria_used: Vec<String> =
            contexts.iter().map(|c| c.criterion.name.clone()).collect();

        for context in &contexts {
            let labeled: Vec<(String, String)> = context
                .permutation
                .iter()
                .enumerate()
                .map(|(position, &original)| {
                    (ranking::label(position), opinions[original].text.clone())
                })
                .collect();
            let prompt = prompts::evaluation(
                proposal,
                &context.criterion.name,
                &context.criterion.description,
                &labeled,
            );
            let params = QueryParams::default().with_timeout_ms(self.settings.model_timeout_ms);
            let results = self
                .gateway
                .query_parallel(
                    &self.settings.council_models,
                    vec![Message::user(prompt)],
                    params,
                    cancel,
                )
                .await;

            for (model, result) in results {
                match result {
                    Ok(response) => match ranking::parse_ranking(&response.content, n) {
                        Ok(displayed) => {
                            let original: Vec<usize> =
                                displayed.iter().map(|&p| context.permutation[p]).collect();
                            samples.push(BootstrapSample {
                                evaluator: model,
                                iteration: context.iteration,
                                criterion: context.criterion.name.clone(),
                                ranking: original,
                            });
                        }
                        Err(e) => {
                            // Unparseable ranking drops this iteration for
                            // this evaluator only.
                            warn!(model = %model, iteration = context.iteration, error = %e, "Dropping unparseable ranking");
                            errors.push(format!(
                                "stage2 {} iteration {}: {}",
                                model, context.iteration, e
                            ));
                        }
                    },
                    Err(e) => {
                        warn!(model = %model, iteration = context.iteration, error = %e, "Stage 2 ranking failed");
                        errors.push(format!(
                            "stage2 {} iteration {}: {}",
                            model, context.iteration, e
                        ));
                    }
                }
            }
        }

        // Aggregate per evaluator; an evaluator with fewer than half the
        // iterations valid is omitted from stage 3 with an error note.
        let required = contexts.len().div_ceil(2);
        let mut aggregated: Vec<ConsensusRanking> = Vec::new();
        for model in &self.settings.council_models {
            let own: Vec<BootstrapSample> = samples
                .iter()
                .filter(|s| &s.evaluator == model)
                .cloned()
                .collect();
            if own.is_empty() {
                continue;
            }
            if own.len() < required {
                errors.push(format!(
                    "stage2 {}: only {}/{} valid iterations, ranking omitted",
                    model,
                    own.len(),
                    contexts.len()
                ));
                continue;
            }
            let (order, scores) = ranking::aggregate(&own, n, self.settings.aggregation);
            aggregated.push(ConsensusRanking {
                evaluator: model.clone(),
                ranking: order,
                scores,
                iterations_used: own.len(),
                criteria_used: own.iter().map(|s| s.criterion.clone()).collect(),
                method: self.settings.aggregation.to_string(),
            });
        }

        let meta = BootstrapMeta {
            iterations: contexts.len(),
            enabled,
            criteria: criteria_used,
            aggregation: self.settings.aggregation.to_string(),
        };
        (samples, aggregated, meta)
    }

    /// Stage 3: chairman synthesis over the full deliberation record.
    #[allow(clippy::too_many_arguments)]
    pub async fn stage3(
        &self,
        proposal: &str,
        context: &ContextBundle,
        opinions: &[Opinion],
        aggregated: &[ConsensusRanking],
        samples: &[BootstrapSample],
        meta: &BootstrapMeta,
        revision_feedback: Option<&str>,
        cancel: &CancellationToken,
        errors: &mut Vec<String>,
    ) -> Result<(String, bool), CouncilError> {
        let labeled: Vec<(String, String)> = opinions
            .iter()
            .map(|o| (o.model.clone(), o.text.clone()))
            .collect();
        let summary = rankings_summary(opinions, aggregated, meta);
        let prompt = prompts::chairman(
            proposal,
            &context.text,
            &labeled,
            &summary,
            revision_feedback,
        );
        let params = QueryParams::default().with_timeout_ms(self.settings.chairman_timeout_ms);

        match self
            .gateway
            .query(
                &self.settings.chairman_model,
                vec![Message::user(prompt)],
                params,
                cancel,
            )
            .await
        {
            Ok(response) => Ok((response.content, false)),
            Err(ModelError::Cancelled { model }) => {
                Err(CouncilError::Chairman(ModelError::Cancelled { model }))
            }
            Err(e) if self.settings.chairman_fallback => {
                // The highest Borda-scored stage-1 response stands in.
                warn!(error = %e, "Chairman failed, falling back to best stage-1 response");
                errors.push(format!("stage3 chairman: {} (fallback used)", e));
                let winner = if samples.is_empty() {
                    0
                } else {
                    ranking::borda_winner(samples, opinions.len())
                };
                Ok((opinions[winner].text.clone(), true))
            }
            Err(e) => Err(CouncilError::Chairman(e)),
        }
    }
}

/// Human-readable summary of the stage-2 outcome for the chairman.
fn rankings_summary(
    opinions: &[Opinion],
    aggregated: &[ConsensusRanking],
    meta: &BootstrapMeta,
) -> String {
    if aggregated.is_empty() {
        return "No peer rankings available (single response or all evaluators failed).".to_string();
    }

    let mut summary = format!(
        "Bootstrap evaluation: {} iterations, aggregation: {}, criteria: {}\n",
        meta.iterations,
        meta.aggregation,
        meta.criteria.join(", "),
    );
    for consensus in aggregated {
        let order = consensus
            .ranking
            .iter()
            .enumerate()
            .map(|(position, &idx)| {
                format!(
                    "{}. {} ({})",
                    position + 1,
                    opinions[idx].label,
                    opinions[idx].model
                )
            })
            .collect::<Vec<_>>()
            .join("  ");
        summary.push_str(&format!(
            "Evaluator {} (from {} iterations): {}\n",
            consensus.evaluator, consensus.iterations_used, order
        ));
    }
    summary
}

/// Map of anonymized labels to model ids for a run.
pub fn label_to_model(opinions: &[Opinion]) -> HashMap<String, String> {
    opinions
        .iter()
        .map(|o| (o.label.clone(), o.model.clone()))
        .collect()
}
