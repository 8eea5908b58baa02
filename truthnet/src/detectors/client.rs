// truthnet/src/detectors/client.rs
//
// Detector Client: one bounded call to one detector.
//
// invoke() never fails. Whatever happens on the way (transport error,
// overrun, garbage payload, a result for some other request) comes back as
// a DetectorResult with status=failed and a closed-set error code. The
// measured round-trip time is stamped into elapsed_ms on every path.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::{Detector, DetectorError};
use crate::contracts::{AnalysisRequest, DetectorResult};

pub async fn invoke(detector: &dyn Detector, request: &AnalysisRequest, budget: Duration) -> DetectorResult {
    let started = Instant::now();

    let outcome = match tokio::time::timeout(budget, detector.analyze(request, budget)).await {
        Ok(Ok(result)) => check(request, result),
        Ok(Err(e))     => Err(e),
        Err(_)         => Err(DetectorError::Timeout(budget)),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            debug!(
                "detector={} work={} status={} risk={:.4} signals={} {}ms",
                request.detector, request.work_id, result.status(),
                result.risk_score(), result.signals().len(), elapsed_ms
            );
            result.with_elapsed_ms(elapsed_ms)
        }
        Err(e) => {
            warn!("detector={} work={} failed [{}]: {}", request.detector, request.work_id, e.code(), e);
            DetectorResult::failed(&request.work_id, request.detector, e.into_failure())
                .with_elapsed_ms(elapsed_ms)
        }
    }
}

/// The result must answer this request and respect the value ranges.
fn check(request: &AnalysisRequest, result: DetectorResult) -> Result<DetectorResult, DetectorError> {
    if result.work_id != request.work_id {
        return Err(DetectorError::BadResponse(format!(
            "result for work '{}' returned to work '{}'",
            result.work_id, request.work_id
        )));
    }
    if result.detector != request.detector {
        return Err(DetectorError::BadResponse(format!(
            "result from '{}' returned to '{}' call",
            result.detector, request.detector
        )));
    }
    result.validate().map_err(DetectorError::BadResponse)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{DetectorKind, ErrorCode, MediaKind, Options, Signal, Status};
    use crate::detectors::mock::{success, Script, ScriptedDetector};

    fn request(kind: DetectorKind) -> AnalysisRequest {
        AnalysisRequest {
            work_id:    "work-7".into(),
            media_ref:  "/tmp/media/work-7/clip.mp4".into(),
            media_kind: MediaKind::Video,
            detector:   kind,
            options:    Options::new(),
        }
    }

    const BUDGET: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn success_passes_through_with_elapsed() {
        let det = success(DetectorKind::Visual, 0.8, vec![Signal::new("face_warp", 0.9, "Face warping")])
            .with_delay(Duration::from_millis(20));
        let r = invoke(&det, &request(DetectorKind::Visual), BUDGET).await;
        assert_eq!(r.status(), Status::Success);
        assert_eq!(r.risk_score(), 0.8);
        assert_eq!(r.signals().len(), 1);
        assert!(r.elapsed_ms >= 20);
    }

    #[tokio::test]
    async fn overrun_becomes_timeout_failure() {
        let det = success(DetectorKind::Visual, 0.8, vec![]).with_delay(Duration::from_millis(300));
        let started = Instant::now();
        let r = invoke(&det, &request(DetectorKind::Visual), Duration::from_millis(30)).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(r.status(), Status::Failed);
        assert_eq!(r.error().unwrap().code, ErrorCode::Timeout);
        assert_eq!(r.risk_score(), 0.0);
        assert!(r.signals().is_empty());
    }

    #[tokio::test]
    async fn transport_and_protocol_errors_are_folded() {
        let det = ScriptedDetector::new(DetectorKind::Metadata, Script::Transport);
        let r = invoke(&det, &request(DetectorKind::Metadata), BUDGET).await;
        assert_eq!(r.error().unwrap().code, ErrorCode::TransportError);
        assert_eq!(r.detector, DetectorKind::Metadata);
        assert_eq!(r.work_id, "work-7");

        let det = ScriptedDetector::new(DetectorKind::Metadata, Script::Protocol);
        let r = invoke(&det, &request(DetectorKind::Metadata), BUDGET).await;
        assert_eq!(r.error().unwrap().code, ErrorCode::ProtocolError);
    }

    #[tokio::test]
    async fn foreign_work_id_is_bad_response() {
        let det = ScriptedDetector::new(DetectorKind::Visual, Script::WrongWorkId);
        let r = invoke(&det, &request(DetectorKind::Visual), BUDGET).await;
        assert_eq!(r.status(), Status::Failed);
        assert_eq!(r.error().unwrap().code, ErrorCode::BadResponse);
    }

    #[tokio::test]
    async fn mismatched_detector_kind_is_bad_response() {
        let det = success(DetectorKind::Audio, 0.2, vec![]);
        let r = invoke(&det, &request(DetectorKind::Visual), BUDGET).await;
        assert_eq!(r.error().unwrap().code, ErrorCode::BadResponse);
        assert_eq!(r.detector, DetectorKind::Visual);
    }

    #[tokio::test]
    async fn out_of_range_success_is_never_coerced() {
        let det = success(DetectorKind::Visual, 1.7, vec![]);
        let r = invoke(&det, &request(DetectorKind::Visual), BUDGET).await;
        assert_eq!(r.status(), Status::Failed);
        assert_eq!(r.error().unwrap().code, ErrorCode::BadResponse);
    }

    #[tokio::test]
    async fn partial_is_not_an_error() {
        let det = ScriptedDetector::new(DetectorKind::Visual, Script::Partial { risk: 0.4, signals: vec![] });
        let r = invoke(&det, &request(DetectorKind::Visual), BUDGET).await;
        assert_eq!(r.status(), Status::Partial);
        assert!(r.error().is_none());
    }
}
