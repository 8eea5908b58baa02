// truthnet/src/engine/explain.rs
//
// Human-readable reasons for a verdict, at most MAX_REASONS lines.
//
// Line 1 is a fixed sentence for the verdict. After that, walking detectors
// in registration order and each detector's signals in emitted order, every
// signal with confidence > SIGNAL_FLOOR adds "<Detector>: <description>"
// until the cap is hit. Nothing is re-sorted, so the same inputs always
// give the same lines.
//
// Partial results are quoted at reduced trust: their signal confidence is
// scaled by PARTIAL_TRUST before the floor test. Failed results carry no
// signals.

use crate::contracts::{DetectorResult, Status, Verdict};

pub const MAX_REASONS:   usize = 5;
pub const SIGNAL_FLOOR:  f64   = 0.6;
pub const PARTIAL_TRUST: f64   = 0.75;

pub const UNVERIFIABLE_REASON: &str =
    "No weighted detector completed its analysis; authenticity could not be verified";

pub fn verdict_sentence(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Authentic  => "No significant manipulation indicators detected",
        Verdict::Suspicious => "Some manipulation indicators detected",
        Verdict::HighRisk   => "Multiple strong manipulation indicators detected",
    }
}

fn trust(status: Status) -> f64 {
    match status {
        Status::Success => 1.0,
        Status::Partial => PARTIAL_TRUST,
        Status::Failed  => 0.0,
    }
}

/// `results` must be in detector registration order.
pub fn explain(results: &[DetectorResult], verdict: Verdict) -> Vec<String> {
    let mut reasons = Vec::with_capacity(MAX_REASONS);
    reasons.push(verdict_sentence(verdict).to_string());

    'detectors: for r in results {
        let factor = trust(r.status());
        for signal in r.signals() {
            if reasons.len() >= MAX_REASONS {
                break 'detectors;
            }
            if signal.confidence * factor > SIGNAL_FLOOR {
                reasons.push(format!("{}: {}", r.detector.label(), signal.description));
            }
        }
    }
    reasons
}
