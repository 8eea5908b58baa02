// truthnet/src/engine/verdict.rs
//
// Verdict tiers over aggregate risk. Half-open on the low edge:
//
//   [0.0, 0.3)  AUTHENTIC
//   [0.3, 0.6)  SUSPICIOUS
//   [0.6, 1.0]  HIGH_RISK

use crate::contracts::Verdict;

pub const AUTHENTIC_CEILING: f64 = 0.3;
/// Lower bound of HIGH_RISK. The only place this boundary is defined.
pub const HIGH_RISK_FLOOR:   f64 = 0.6;

pub fn classify(aggregate_risk: f64) -> Verdict {
    if aggregate_risk < AUTHENTIC_CEILING {
        Verdict::Authentic
    } else if aggregate_risk < HIGH_RISK_FLOOR {
        Verdict::Suspicious
    } else {
        Verdict::HighRisk
    }
}
