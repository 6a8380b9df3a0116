//! Bootstrap evaluation contexts.
//!
//! Stage 2 reduces pattern-recognition bias by varying the evaluation
//! criterion and the presentation order of responses across iterations.
//! Permutations are seeded from the assessment id and iteration number,
//! so a rerun over the same inputs ranks identically.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One evaluation criterion for a bootstrap iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationCriterion {
    /// Short name, used in prompts and metadata.
    pub name: String,
    /// What the criterion emphasizes.
    pub focus: String,
    /// Full ranking instruction.
    pub description: String,
}

impl EvaluationCriterion {
    fn new(name: &str, focus: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            focus: focus.to_string(),
            description: description.to_string(),
        }
    }
}

/// The rotating criterion list: accuracy, completeness, clarity,
/// utility, balanced. Cycled when iterations exceed the list length.
pub fn default_criteria() -> Vec<EvaluationCriterion> {
    vec![
        EvaluationCriterion::new(
            "accuracy",
            "factual and regulatory accuracy",
            "adherence to the proposal's facts, correct use of the retrieved context, and sound regulatory reasoning",
        ),
        EvaluationCriterion::new(
            "completeness",
            "coverage of the assessment form",
            "coverage of all 21 impact themes, a thorough problem definition, and no skipped determinations",
        ),
        EvaluationCriterion::new(
            "clarity",
            "structure and readability",
            "clear section structure, explicit impact tags, and readable evidence-backed explanations",
        ),
        EvaluationCriterion::new(
            "utility",
            "usefulness to a reviewer",
            "actionable determinations, concrete mitigation measures, and citations a reviewer can verify",
        ),
        EvaluationCriterion::new(
            "balanced",
            "overall assessment quality",
            "holistic quality considering accuracy, completeness, clarity, and utility together",
        ),
    ]
}

/// The randomized tuple driving one stage-2 iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapContext {
    /// Iteration number, 0-based.
    pub iteration: usize,
    /// Criterion for this iteration.
    pub criterion: EvaluationCriterion,
    /// Presentation order: position `p` shows the response with original
    /// index `permutation[p]`.
    pub permutation: Vec<usize>,
}

/// Seed for `(assessment_id, iteration)`: the first eight bytes of
/// `sha256(assessment_id)` xor the iteration.
fn seed_for(assessment_id: &str, iteration: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(assessment_id.as_bytes());
    let digest = hasher.finalize();
    let base = u64::from_le_bytes(digest[0..8].try_into().expect("sha256 digest is 32 bytes"));
    base ^ iteration as u64
}

/// Deterministic permutation of `0..n` for one iteration.
pub fn permutation(assessment_id: &str, iteration: usize, n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed_for(assessment_id, iteration));
    order.shuffle(&mut rng);
    order
}

/// Build the contexts for `iterations` rounds over `n` responses,
/// cycling the criterion list.
pub fn contexts(
    assessment_id: &str,
    iterations: usize,
    criteria: &[EvaluationCriterion],
    n: usize,
) -> Vec<BootstrapContext> {
    (0..iterations)
        .map(|iteration| BootstrapContext {
            iteration,
            criterion: criteria[iteration % criteria.len()].clone(),
            permutation: permutation(assessment_id, iteration, n),
        })
        .collect()
}
