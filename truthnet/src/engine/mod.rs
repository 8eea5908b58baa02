// truthnet/src/engine/mod.rs
//
// One analysis end to end: fan out to every registered detector, then run
// the pure stages over the collected results.
//
//   fanout  ─►  fusion::score ─► fusion::confidence ─► verdict::classify ─► explain
//
// The aggregate is "unverifiable" when no successful result carries a
// positive weight. Such a verdict still reads AUTHENTIC at risk 0 (that is
// what the arithmetic says) but it is flagged, has confidence 0, and leads
// with a "could not verify" reason so no caller mistakes it for a clean
// result.

pub mod explain;
pub mod fanout;
pub mod fusion;
pub mod verdict;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::{ConfigError, DetectorWeights, EngineConfig};
use crate::contracts::{AggregateVerdict, Coverage, DetectorResult, MediaKind};
use crate::detectors::{build_registry, RegisteredDetector};
use crate::metrics::Metrics;

pub struct Orchestrator {
    registry: Vec<RegisteredDetector>,
    weights:  DetectorWeights,
    deadline: Duration,
    metrics:  Option<Arc<Metrics>>,
}

impl Orchestrator {
    pub fn new(registry: Vec<RegisteredDetector>, deadline: Duration) -> Self {
        let weights = DetectorWeights::from_specs(registry.iter().map(|r| &r.spec));
        Self { registry, weights, deadline, metrics: None }
    }

    /// HTTP detectors for every entry in `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(build_registry(config)?, config.overall_deadline()))
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn detectors(&self) -> &[RegisteredDetector] {
        &self.registry
    }

    pub async fn analyze(&self, work_id: &str, media_ref: &str, media_kind: MediaKind) -> AggregateVerdict {
        let started = Instant::now();
        info!("work={} media={} kind={} detectors={}", work_id, media_ref, media_kind, self.registry.len());

        let fan = fanout::run(work_id, media_ref, media_kind, &self.registry, self.deadline).await;
        let verdict = aggregate(work_id, fan.results, &self.weights, started.elapsed().as_millis() as u64);

        if verdict.unverifiable {
            warn!(
                "work={} UNVERIFIABLE succeeded={} partial={} failed={}",
                work_id, verdict.coverage.succeeded, verdict.coverage.partial, verdict.coverage.failed
            );
        } else {
            info!(
                "work={} verdict={} risk={:.4} confidence={:.2} coverage={}/{} {}ms",
                work_id, verdict.verdict, verdict.aggregate_risk, verdict.confidence,
                verdict.coverage.succeeded, verdict.coverage.requested, verdict.elapsed_ms
            );
        }

        if let Some(m) = &self.metrics {
            m.record_verdict(&verdict, fan.abandoned);
        }
        verdict
    }
}

/// Pure aggregation over one result per detector, in registration order.
pub fn aggregate(
    work_id:    &str,
    results:    Vec<DetectorResult>,
    weights:    &DetectorWeights,
    elapsed_ms: u64,
) -> AggregateVerdict {
    let aggregate_risk = fusion::score(&results, weights);
    let unverifiable   = fusion::contributors(&results, weights) == 0;
    let confidence     = if unverifiable { 0.0 } else { fusion::confidence(&results, aggregate_risk) };
    let tier           = verdict::classify(aggregate_risk);

    let mut reasons = explain::explain(&results, tier);
    if unverifiable {
        reasons[0] = explain::UNVERIFIABLE_REASON.to_string();
    }

    AggregateVerdict {
        work_id:  work_id.to_string(),
        verdict:  tier,
        aggregate_risk,
        confidence,
        reasons,
        coverage: Coverage::from_results(&results),
        results,
        elapsed_ms,
        timestamp: Utc::now(),
        unverifiable,
    }
}
