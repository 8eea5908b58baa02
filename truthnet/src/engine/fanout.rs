// truthnet/src/engine/fanout.rs
//
// Fan-out coordinator: one concurrent detector client call per registered
// detector, joined on all of them under a single overall deadline.
//
//   DISPATCHED  every call issued, each on its own task
//   AWAITING    collecting (slot, result) pairs until every slot is filled,
//               the overall deadline passes, or every task has gone away
//   AGGREGATED  missing slots filled with failures, results handed back
//
// Each task owns exactly one slot index and sends once. The coordinator is
// the only writer of the slot table. Tasks still running at the deadline
// are abandoned, not killed: their late sends hit a closed channel and are
// dropped. Each call's budget is min(per-detector timeout, time left), so
// abandoned tasks also wind down on their own.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::contracts::{AnalysisRequest, DetectorFailure, DetectorResult, ErrorCode, MediaKind, Options};
use crate::detectors::{client, RegisteredDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dispatched,
    Awaiting,
    Aggregated,
}

#[derive(Debug)]
pub struct FanOut {
    /// Exactly one result per registered detector, in registration order.
    pub results:   Vec<DetectorResult>,
    /// Slots filled by the coordinator because the deadline passed first.
    pub abandoned: usize,
    pub phase:     Phase,
}

pub async fn run(
    work_id:          &str,
    media_ref:        &str,
    media_kind:       MediaKind,
    detectors:        &[RegisteredDetector],
    overall_deadline: Duration,
) -> FanOut {
    let deadline = Instant::now() + overall_deadline;
    let n = detectors.len();
    let (tx, mut rx) = mpsc::channel::<(usize, DetectorResult)>(n.max(1));

    // ── DISPATCHED ────────────────────────────────────────────────────────────
    for (slot, registered) in detectors.iter().enumerate() {
        let request = AnalysisRequest {
            work_id:    work_id.to_string(),
            media_ref:  media_ref.to_string(),
            media_kind,
            detector:   registered.kind(),
            options:    registered.spec.options.clone(),
        };
        let budget   = registered.spec.timeout().min(deadline.saturating_duration_since(Instant::now()));
        let detector = registered.detector.clone();
        let tx       = tx.clone();

        tokio::spawn(async move {
            let result = client::invoke(detector.as_ref(), &request, budget).await;
            // Receiver is gone once the coordinator has moved on.
            let _ = tx.send((slot, result)).await;
        });
    }
    drop(tx);
    let mut phase = Phase::Dispatched;
    debug!("work={} phase={:?} detectors={}", work_id, phase, n);

    // ── AWAITING ──────────────────────────────────────────────────────────────
    phase = Phase::Awaiting;
    let mut slots: Vec<Option<DetectorResult>> = vec![None; n];
    let mut filled = 0usize;
    let mut deadline_hit = false;

    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    while filled < n {
        tokio::select! {
            // A result and the deadline ready together: take the result.
            biased;
            msg = rx.recv() => match msg {
                Some((slot, result)) => {
                    if slots[slot].is_none() {
                        slots[slot] = Some(result);
                        filled += 1;
                    }
                }
                // Every sender dropped: remaining tasks died without a result.
                None => break,
            },
            _ = &mut sleep => {
                deadline_hit = true;
                break;
            }
        }
    }
    if deadline_hit {
        while let Ok((slot, result)) = rx.try_recv() {
            if slots[slot].is_none() {
                slots[slot] = Some(result);
                filled += 1;
            }
        }
    }
    drop(rx);
    debug!("work={} phase={:?} filled={}/{}", work_id, phase, filled, n);

    // ── AGGREGATED ────────────────────────────────────────────────────────────
    let mut abandoned = 0usize;
    let results = slots
        .into_iter()
        .zip(detectors)
        .map(|(slot, registered)| match slot {
            Some(result) => result,
            None => {
                let failure = if deadline_hit {
                    abandoned += 1;
                    DetectorFailure {
                        code:    ErrorCode::Timeout,
                        message: format!("no result before the {}ms overall deadline", overall_deadline.as_millis()),
                        details: Options::new(),
                    }
                } else {
                    DetectorFailure {
                        code:    ErrorCode::TransportError,
                        message: "detector task ended without a result".into(),
                        details: Options::new(),
                    }
                };
                warn!("work={} detector={} {}", work_id, registered.kind(), failure.message);
                DetectorResult::failed(work_id, registered.kind(), failure)
                    .with_elapsed_ms(overall_deadline.as_millis() as u64)
            }
        })
        .collect();

    phase = Phase::Aggregated;
    debug!("work={} phase={:?} abandoned={}", work_id, phase, abandoned);

    FanOut { results, abandoned, phase }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Instant as StdInstant;

    use crate::contracts::{DetectorKind, Status};
    use crate::detectors::mock::{success, Script, ScriptedDetector};

    const LONG: Duration = Duration::from_secs(5);

    fn kinds(fan: &FanOut) -> Vec<DetectorKind> {
        fan.results.iter().map(|r| r.detector).collect()
    }

    #[tokio::test]
    async fn waits_for_every_detector() {
        let detectors = vec![
            success(DetectorKind::Visual, 0.8, vec![]).with_delay(Duration::from_millis(80)).register(0.45, LONG),
            success(DetectorKind::Metadata, 0.65, vec![]).register(0.55, LONG),
        ];
        let fan = run("w1", "/tmp/a.jpg", MediaKind::Image, &detectors, LONG).await;
        assert_eq!(fan.phase, Phase::Aggregated);
        assert_eq!(fan.abandoned, 0);
        // The slow visual result is still there: no first-completed return.
        assert_eq!(kinds(&fan), vec![DetectorKind::Visual, DetectorKind::Metadata]);
        assert!(fan.results.iter().all(|r| r.status() == Status::Success));
        assert!(fan.results.iter().all(|r| r.work_id == "w1"));
    }

    #[tokio::test]
    async fn simultaneous_timeouts_yield_one_result_each() {
        let detectors = vec![
            success(DetectorKind::Visual, 0.1, vec![]).with_delay(LONG).register(0.45, LONG),
            success(DetectorKind::Metadata, 0.1, vec![]).with_delay(LONG).register(0.55, LONG),
            success(DetectorKind::Audio, 0.1, vec![]).with_delay(LONG).register(0.30, LONG),
        ];
        let started = StdInstant::now();
        let fan = run("w2", "/tmp/a.mp4", MediaKind::Video, &detectors, Duration::from_millis(60)).await;
        assert!(started.elapsed() < Duration::from_secs(2), "must not block past the deadline");

        assert_eq!(fan.results.len(), 3);
        let unique: HashSet<_> = kinds(&fan).into_iter().collect();
        assert_eq!(unique.len(), 3);
        for r in &fan.results {
            assert_eq!(r.status(), Status::Failed);
            assert_eq!(r.error().unwrap().code, ErrorCode::Timeout);
        }
    }

    #[tokio::test]
    async fn per_detector_timeout_is_tighter_than_deadline() {
        let detectors = vec![
            success(DetectorKind::Visual, 0.3, vec![])
                .with_delay(Duration::from_millis(400))
                .register(0.45, Duration::from_millis(30)),
            success(DetectorKind::Metadata, 0.6, vec![]).register(0.55, LONG),
        ];
        let fan = run("w3", "/tmp/a.jpg", MediaKind::Image, &detectors, LONG).await;
        // Visual timed out inside its own client call, not at the overall deadline.
        assert_eq!(fan.abandoned, 0);
        assert_eq!(fan.results[0].error().unwrap().code, ErrorCode::Timeout);
        assert_eq!(fan.results[1].status(), Status::Success);
    }

    #[tokio::test]
    async fn panicking_detector_still_gets_a_slot() {
        let detectors = vec![
            ScriptedDetector::new(DetectorKind::Visual, Script::Panic).register(0.45, LONG),
            success(DetectorKind::Metadata, 0.75, vec![]).register(0.55, LONG),
        ];
        let fan = run("w4", "/tmp/a.jpg", MediaKind::Image, &detectors, LONG).await;
        assert_eq!(fan.results.len(), 2);
        assert_eq!(fan.results[0].status(), Status::Failed);
        assert_eq!(fan.results[0].error().unwrap().code, ErrorCode::TransportError);
        assert_eq!(fan.results[1].status(), Status::Success);
    }

    #[tokio::test]
    async fn options_and_ids_reach_the_detector() {
        use std::sync::Arc;
        use crate::config::DetectorSpec;

        let visual   = Arc::new(success(DetectorKind::Visual, 0.2, vec![]));
        let metadata = Arc::new(success(DetectorKind::Metadata, 0.4, vec![]));
        let mut visual_spec = DetectorSpec::new(DetectorKind::Visual, "mock://", 0.45, 1000);
        visual_spec.options.insert("extract_frames".into(), serde_json::Value::Bool(true));
        let registered = vec![
            RegisteredDetector::new(visual_spec, visual.clone()),
            RegisteredDetector::new(DetectorSpec::new(DetectorKind::Metadata, "mock://", 0.55, 1000), metadata.clone()),
        ];

        let fan = run("w5", "/tmp/a.jpg", MediaKind::Image, &registered, LONG).await;
        assert!(fan.results.iter().all(|r| r.status() == Status::Success));
        assert_eq!(visual.calls(), 1);
        assert_eq!(metadata.calls(), 1);

        let v = visual.last_request().unwrap();
        let m = metadata.last_request().unwrap();
        assert_eq!(v.options["extract_frames"], true);
        assert!(m.options.is_empty());
        for (req, kind) in [(&v, DetectorKind::Visual), (&m, DetectorKind::Metadata)] {
            assert_eq!(req.work_id, "w5");
            assert_eq!(req.media_ref, "/tmp/a.jpg");
            assert_eq!(req.media_kind, MediaKind::Image);
            assert_eq!(req.detector, kind);
        }
    }

    #[tokio::test]
    async fn result_ready_at_the_deadline_is_kept() {
        // The visual call holds the runtime thread past the overall deadline,
        // so its result and the deadline are both ready when the coordinator
        // next runs.
        let detectors = vec![
            success(DetectorKind::Visual, 0.7, vec![])
                .with_stall(Duration::from_millis(120))
                .register(0.45, LONG),
            success(DetectorKind::Metadata, 0.1, vec![]).with_delay(LONG).register(0.55, LONG),
        ];
        let fan = run("w7", "/tmp/a.jpg", MediaKind::Image, &detectors, Duration::from_millis(30)).await;
        assert_eq!(fan.results[0].status(), Status::Success);
        assert_eq!(fan.results[0].risk_score(), 0.7);
        assert_eq!(fan.results[1].error().unwrap().code, ErrorCode::Timeout);
        assert_eq!(fan.abandoned, 1);
    }

    #[tokio::test]
    async fn empty_registry_returns_immediately() {
        let fan = run("w6", "/tmp/a.jpg", MediaKind::Image, &[], LONG).await;
        assert!(fan.results.is_empty());
        assert_eq!(fan.phase, Phase::Aggregated);
    }
}
