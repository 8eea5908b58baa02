// truthnet/src/engine/fusion.rs
//
// Weighted consensus over detector results, plus the confidence rule.
//
// Scoring set S = results with status=success. Partial and failed results
// never move the number. Weights come from config and are renormalised over
// the members of S that carry one:
//
//   aggregate = Σ_{r∈S} risk(r)·w(r) / Σ_{r∈S} w(r)
//
// A kind without a configured weight weighs 0: it drops out of the mean but
// its signals can still be quoted in the explanation.
//
// Confidence is a step rule a reviewer can redo by hand:
//   |S| = 0  → 0.00
//   |S| = 1  → 0.60
//   |S| ≥ 2  → spread = max(risk) − min(risk)
//              spread < 0.2 → 0.95   agreement
//              spread < 0.4 → 0.85   partial agreement
//              otherwise    → 0.80   disagreement

use crate::config::DetectorWeights;
use crate::contracts::{DetectorResult, Status};

pub const CONFIDENCE_NONE:        f64 = 0.0;
pub const CONFIDENCE_SINGLE:      f64 = 0.6;
pub const CONFIDENCE_DISAGREE:    f64 = 0.8;
pub const CONFIDENCE_PARTIAL:     f64 = 0.85;
pub const CONFIDENCE_AGREE:       f64 = 0.95;

const AGREEMENT_SPREAD:         f64 = 0.2;
const PARTIAL_AGREEMENT_SPREAD: f64 = 0.4;

fn succeeded(results: &[DetectorResult]) -> impl Iterator<Item = &DetectorResult> {
    results.iter().filter(|r| r.status() == Status::Success)
}

/// Successful results whose kind carries a positive weight.
pub fn contributors(results: &[DetectorResult], weights: &DetectorWeights) -> usize {
    succeeded(results).filter(|r| weights.weight(r.detector) > 0.0).count()
}

pub fn score(results: &[DetectorResult], weights: &DetectorWeights) -> f64 {
    let mut weighted = 0.0f64;
    let mut total    = 0.0f64;

    for r in succeeded(results) {
        let w = weights.weight(r.detector);
        if w <= 0.0 {
            continue;
        }
        weighted += r.risk_score() * w;
        total    += w;
    }

    if total <= 0.0 {
        return 0.0;
    }
    (weighted / total).clamp(0.0, 1.0)
}

/// `_aggregate_risk` is part of the estimator's contract but the current
/// rule only looks at coverage and spread.
pub fn confidence(results: &[DetectorResult], _aggregate_risk: f64) -> f64 {
    let scores: Vec<f64> = succeeded(results).map(|r| r.risk_score()).collect();
    match scores.len() {
        0 => CONFIDENCE_NONE,
        1 => CONFIDENCE_SINGLE,
        _ => {
            let max = scores.iter().copied().fold(f64::MIN, f64::max);
            let min = scores.iter().copied().fold(f64::MAX, f64::min);
            let spread = max - min;
            if spread < AGREEMENT_SPREAD {
                CONFIDENCE_AGREE
            } else if spread < PARTIAL_AGREEMENT_SPREAD {
                CONFIDENCE_PARTIAL
            } else {
                CONFIDENCE_DISAGREE
            }
        }
    }
}
