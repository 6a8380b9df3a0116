//! Ranking parse and rank aggregation.
//!
//! Evaluators return a `FINAL RANKING:` block of `Response X` labels.
//! Parsed rankings are mapped back through the iteration's permutation,
//! then aggregated per evaluator by Borda count, position average, or
//! consensus score, with deterministic tie-breaks.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::AggregationMethod;
use crate::error::ParseError;

static NUMBERED_RANK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\.\s*Response ([A-Z])").expect("static regex"));
static ANY_RANK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Response ([A-Z])").expect("static regex"));

/// Label for the response at original index `idx`: A, B, C, ...
pub fn label(idx: usize) -> String {
    format!("Response {}", (b'A' + idx as u8) as char)
}

/// Parse a strict ordered ranking out of evaluator text.
///
/// Looks for the `FINAL RANKING:` section first and prefers the numbered
/// form; falls back to any `Response X` sequence. The ranking must cover
/// all `n` responses exactly once (positions are displayed labels, which
/// the caller maps back through the permutation).
pub fn parse_ranking(text: &str, n: usize) -> Result<Vec<usize>, ParseError> {
    let section = text
        .split("FINAL RANKING:")
        .nth(1)
        .unwrap_or(text);

    let mut displayed: Vec<usize> = Vec::new();
    let numbered: Vec<usize> = NUMBERED_RANK
        .captures_iter(section)
        .filter_map(|c| letter_index(&c[1], n))
        .collect();
    let candidates = if numbered.is_empty() {
        ANY_RANK
            .captures_iter(section)
            .filter_map(|c| letter_index(&c[1], n))
            .collect()
    } else {
        numbered
    };

    for idx in candidates {
        if !displayed.contains(&idx) {
            displayed.push(idx);
        }
    }

    if displayed.len() != n {
        return Err(ParseError::MissingRanking);
    }
    Ok(displayed)
}

fn letter_index(letter: &str, n: usize) -> Option<usize> {
    let idx = (letter.bytes().next()? - b'A') as usize;
    (idx < n).then_some(idx)
}

/// One parsed evaluator ranking from one bootstrap iteration, expressed
/// in ORIGINAL response indices (permutation already unwound).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSample {
    /// Evaluating model.
    pub evaluator: String,
    /// Iteration number.
    pub iteration: usize,
    /// Criterion name used.
    pub criterion: String,
    /// Original indices, best first.
    pub ranking: Vec<usize>,
}

/// Per-evaluator consensus ranking with bootstrap metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRanking {
    /// Evaluating model.
    pub evaluator: String,
    /// Original indices, best first.
    pub ranking: Vec<usize>,
    /// Aggregated score per entry of `ranking` (same order). Higher is
    /// better for Borda/consensus, lower for position average.
    pub scores: Vec<f64>,
    /// Valid iterations behind this consensus.
    pub iterations_used: usize,
    /// Criteria that contributed.
    pub criteria_used: Vec<String>,
    /// Aggregation method.
    pub method: String,
}

/// Cross-evaluator aggregate: average displayed position per response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRank {
    /// Original response index.
    pub response: usize,
    /// Mean 0-indexed position across all consensus rankings.
    pub average_position: f64,
    /// Number of rankings that placed this response.
    pub rankings_count: usize,
}

#[derive(Debug, Default, Clone)]
struct Tally {
    score: f64,
    positions: Vec<usize>,
    first_count: usize,
    worst_count: usize,
}

/// Aggregate one evaluator's samples into a consensus ranking.
///
/// Scoring per method, with position `p` 0-indexed over `n` responses:
/// - Borda: `n - p` points per iteration, summed; higher wins.
/// - Position average: mean `p`; lower wins.
/// - Consensus: `(n - p)^2` summed; rewards consistent high placements.
///
/// Ties break on: more first-place finishes, then fewer worst-place
/// finishes, then label order.
pub fn aggregate(
    samples: &[BootstrapSample],
    n: usize,
    method: AggregationMethod,
) -> (Vec<usize>, Vec<f64>) {
    let mut tallies: BTreeMap<usize, Tally> = (0..n).map(|i| (i, Tally::default())).collect();

    for sample in samples {
        for (position, &response) in sample.ranking.iter().enumerate() {
            let tally = tallies.entry(response).or_default();
            tally.positions.push(position);
            if position == 0 {
                tally.first_count += 1;
            }
            if position == n - 1 {
                tally.worst_count += 1;
            }
            match method {
                AggregationMethod::Borda => tally.score += (n - position) as f64,
                AggregationMethod::Consensus => {
                    tally.score += ((n - position) * (n - position)) as f64
                }
                AggregationMethod::PositionAverage => {}
            }
        }
    }

    if method == AggregationMethod::PositionAverage {
        for tally in tallies.values_mut() {
            tally.score = if tally.positions.is_empty() {
                n as f64
            } else {
                tally.positions.iter().sum::<usize>() as f64 / tally.positions.len() as f64
            };
        }
    }

    let mut order: Vec<(usize, Tally)> = tallies.into_iter().collect();
    order.sort_by(|(a_idx, a), (b_idx, b)| {
        let primary = match method {
            AggregationMethod::PositionAverage => {
                a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal)
            }
            _ => b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal),
        };
        primary
            .then_with(|| b.first_count.cmp(&a.first_count))
            .then_with(|| a.worst_count.cmp(&b.worst_count))
            .then_with(|| a_idx.cmp(b_idx))
    });

    let ranking: Vec<usize> = order.iter().map(|(idx, _)| *idx).collect();
    let scores: Vec<f64> = order.iter().map(|(_, t)| t.score).collect();
    (ranking, scores)
}

/// Summed Borda score across every sample from every evaluator. Used for
/// the chairman fallback: the stage-1 response the whole council scored
/// highest. Ties break on label order.
pub fn borda_winner(samples: &[BootstrapSample], n: usize) -> usize {
    if samples.is_empty() {
        return 0;
    }
    let (ranking, _) = aggregate(samples, n, AggregationMethod::Borda);
    ranking[0]
}

/// Average consensus position per response across evaluators.
pub fn aggregate_across_evaluators(rankings: &[ConsensusRanking], n: usize) -> Vec<AggregateRank> {
    let mut positions: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for consensus in rankings {
        for (position, &response) in consensus.ranking.iter().enumerate() {
            positions.entry(response).or_default().push(position);
        }
    }
    let mut out: Vec<AggregateRank> = (0..n)
        .map(|response| {
            let ps = positions.get(&response).cloned().unwrap_or_default();
            AggregateRank {
                response,
                average_position: if ps.is_empty() {
                    n as f64
                } else {
                    ps.iter().sum::<usize>() as f64 / ps.len() as f64
                },
                rankings_count: ps.len(),
            }
        })
        .collect();
    out.sort_by(|a, b| {
        a.average_position
            .partial_cmp(&b.average_position)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.response.cmp(&b.response))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(evaluator: &str, iteration: usize, ranking: Vec<usize>) -> BootstrapSample {
        BootstrapSample {
            evaluator: evaluator.to_string(),
            iteration,
            criterion: "balanced".to_string(),
            ranking,
        }
    }

    #[test]
    fn test_parse_numbered_ranking() {
        let text = "Response A is decent...\n\nFINAL RANKING:\n1. Response C\n2. Response A\n3. Response B\n";
        assert_eq!(parse_ranking(text, 3).unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_parse_falls_back_to_bare_labels() {
        let text = "FINAL RANKING:\nResponse B then Response A then Response C";
        assert_eq!(parse_ranking(text, 3).unwrap(), vec![1, 0, 2]);
    }

    #[test]
    fn test_parse_rejects_incomplete_ranking() {
        let text = "FINAL RANKING:\n1. Response A\n2. Response B\n";
        assert!(parse_ranking(text, 3).is_err());
    }

    #[test]
    fn test_parse_ignores_out_of_range_labels() {
        let text = "FINAL RANKING:\n1. Response A\n2. Response Z\n3. Response B\n";
        assert!(parse_ranking(text, 3).is_err());
    }

    #[test]
    fn test_parse_dedupes_repeated_labels() {
        let text = "FINAL RANKING:\n1. Response A\n2. Response A\n3. Response B\n4. Response C";
        assert_eq!(parse_ranking(text, 3).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_borda_matches_worked_example() {
        // Three iterations: [R1,R2,R3], [R2,R1,R3], [R1,R3,R2].
        // Borda: R1 = 3+2+3 = 8, R2 = 2+3+1 = 6, R3 = 1+1+2 = 4.
        let samples = vec![
            sample("e", 0, vec![0, 1, 2]),
            sample("e", 1, vec![1, 0, 2]),
            sample("e", 2, vec![0, 2, 1]),
        ];
        let (ranking, scores) = aggregate(&samples, 3, AggregationMethod::Borda);
        assert_eq!(ranking, vec![0, 1, 2]);
        assert_eq!(scores, vec![8.0, 6.0, 4.0]);
    }

    #[test]
    fn test_position_average_prefers_lower() {
        let samples = vec![
            sample("e", 0, vec![0, 1, 2]),
            sample("e", 1, vec![1, 0, 2]),
        ];
        let (ranking, scores) = aggregate(&samples, 3, AggregationMethod::PositionAverage);
        // R0 and R1 both average 0.5; tie breaks on first-place count
        // (one each), worst count (zero each), then label order.
        assert_eq!(ranking, vec![0, 1, 2]);
        assert_eq!(scores[0], 0.5);
        assert_eq!(scores[2], 2.0);
    }

    #[test]
    fn test_consensus_rewards_consistency() {
        // R0 always second; R1 alternates first and last.
        let samples = vec![
            sample("e", 0, vec![1, 0, 2]),
            sample("e", 1, vec![2, 0, 1]),
        ];
        let (ranking, _) = aggregate(&samples, 3, AggregationMethod::Consensus);
        // Consensus: R0 = 4+4 = 8, R1 = 9+1 = 10, R2 = 1+9 = 10;
        // R1 vs R2 tie breaks on first-place count (one each), then worst
        // count (one each), then label order.
        assert_eq!(ranking, vec![1, 2, 0]);
    }

    #[test]
    fn test_full_tie_breaks_on_label_order() {
        let samples = vec![
            sample("e", 0, vec![1, 0]),
            sample("e", 1, vec![0, 1]),
            sample("e", 2, vec![1, 0]),
            sample("e", 3, vec![0, 1]),
        ];
        let (ranking, _) = aggregate(&samples, 2, AggregationMethod::Borda);
        // Scores tie at 6 each with 2 firsts and 2 worsts each; label
        // order decides.
        assert_eq!(ranking, vec![0, 1]);
    }

    #[test]
    fn test_borda_winner_over_all_samples() {
        let samples = vec![
            sample("e1", 0, vec![2, 0, 1]),
            sample("e2", 0, vec![2, 1, 0]),
        ];
        assert_eq!(borda_winner(&samples, 3), 2);
        assert_eq!(borda_winner(&[], 3), 0);
    }

    #[test]
    fn test_cross_evaluator_aggregate() {
        let rankings = vec![
            ConsensusRanking {
                evaluator: "e1".to_string(),
                ranking: vec![0, 1, 2],
                scores: vec![],
                iterations_used: 3,
                criteria_used: vec![],
                method: "borda".to_string(),
            },
            ConsensusRanking {
                evaluator: "e2".to_string(),
                ranking: vec![1, 0, 2],
                scores: vec![],
                iterations_used: 3,
                criteria_used: vec![],
                method: "borda".to_string(),
            },
        ];
        let aggregate = aggregate_across_evaluators(&rankings, 3);
        assert_eq!(aggregate[0].average_position, 0.5);
        assert_eq!(aggregate[2].response, 2);
        assert_eq!(aggregate[2].average_position, 2.0);
    }

    #[test]
    fn test_label_letters() {
        assert_eq!(label(0), "Response A");
        assert_eq!(label(2), "Response C");
    }
}
