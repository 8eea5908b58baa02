// truthnet/src/contracts.rs
//
// Shared domain types flowing through the orchestrator, and the JSON shapes
// exchanged with detector services and with callers.
//
// Field names and enum spellings are a stable external contract:
//   verdict   AUTHENTIC | SUSPICIOUS | HIGH_RISK
//   status    success | partial | failed
//   error     transport_error | timeout | bad_response | protocol_error
//
// Internally a DetectorResult carries a tagged Outcome. The flat wire shape
// (status + risk_score + signals + error) is produced and consumed through
// WireResult, which is where the "failed => no score, no signals" rule and
// the [0,1] range checks are enforced.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Opaque key/value bag carried on requests, signals and errors.
pub type Options = Map<String, Value>;

/// Detectors send `null` for optional fields they never set; read that as
/// the field's default, same as an absent key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Media ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    /// Infer the media kind from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => Some(Self::Image),
            "mp4" | "avi" | "mov" | "mkv" | "wmv" | "flv" | "webm" => Some(Self::Video),
            "wav" | "mp3" | "flac" | "ogg" | "m4a" | "aac" => Some(Self::Audio),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            other   => Err(format!("unknown media type '{}'", other)),
        }
    }
}

// ── Detectors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Visual,   // face / frame artifact analysis
    Metadata, // EXIF, container and timestamp consistency
    Audio,    // voice synthesis artifacts
    Lipsync,  // audio/visual alignment
}

impl DetectorKind {
    /// Human-facing label used as the prefix of explanation lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Visual   => "Visual",
            Self::Metadata => "Metadata",
            Self::Audio    => "Audio",
            Self::Lipsync  => "Lipsync",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visual   => write!(f, "visual"),
            Self::Metadata => write!(f, "metadata"),
            Self::Audio    => write!(f, "audio"),
            Self::Lipsync  => write!(f, "lipsync"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed  => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Authentic,
    Suspicious,
    HighRisk,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentic  => write!(f, "AUTHENTIC"),
            Self::Suspicious => write!(f, "SUSPICIOUS"),
            Self::HighRisk   => write!(f, "HIGH_RISK"),
        }
    }
}

/// Closed set of failure codes a Detector Client may attach to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    TransportError,
    Timeout,
    BadResponse,
    ProtocolError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportError => "transport_error",
            Self::Timeout        => "timeout",
            Self::BadResponse    => "bad_response",
            Self::ProtocolError  => "protocol_error",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "transport_error" => Some(Self::TransportError),
            "timeout"         => Some(Self::Timeout),
            "bad_response"    => Some(Self::BadResponse),
            "protocol_error"  => Some(Self::ProtocolError),
            _                 => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// One unit of work sent to one detector. The work id is shared by every
/// request issued for the same analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(rename = "request_id")]
    pub work_id:    String,
    #[serde(rename = "media_path")]
    pub media_ref:  String,
    #[serde(rename = "media_type")]
    pub media_kind: MediaKind,
    #[serde(rename = "agent_type")]
    pub detector:   DetectorKind,
    #[serde(default)]
    pub options:    Options,
}

// ── Signals ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "signal_type")]
    pub kind:        String,
    pub confidence:  f64,
    pub description: String,
    /// None means "unspecified", which is not the same as Low.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity:    Option<Severity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata:    Options,
}

impl Signal {
    pub fn new(kind: impl Into<String>, confidence: f64, description: impl Into<String>) -> Self {
        Self {
            kind:        kind.into(),
            confidence,
            description: description.into(),
            severity:    None,
            metadata:    Options::new(),
        }
    }
}

// ── Detector results ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorFailure {
    pub code:    ErrorCode,
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub details: Options,
}

/// What one detector call produced. Only `Success` contributes to the score;
/// `Partial` signals remain eligible for explanation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success { risk_score: f64, signals: Vec<Signal> },
    Partial { risk_score: f64, signals: Vec<Signal> },
    Failed(DetectorFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireResult", try_from = "WireResult")]
pub struct DetectorResult {
    pub work_id:    String,
    pub detector:   DetectorKind,
    pub outcome:    Outcome,
    pub elapsed_ms: u64,
    pub metadata:   Options,
}

impl DetectorResult {
    pub fn success(work_id: impl Into<String>, detector: DetectorKind, risk_score: f64, signals: Vec<Signal>) -> Self {
        Self::with_outcome(work_id, detector, Outcome::Success { risk_score, signals })
    }

    pub fn partial(work_id: impl Into<String>, detector: DetectorKind, risk_score: f64, signals: Vec<Signal>) -> Self {
        Self::with_outcome(work_id, detector, Outcome::Partial { risk_score, signals })
    }

    pub fn failed(work_id: impl Into<String>, detector: DetectorKind, failure: DetectorFailure) -> Self {
        Self::with_outcome(work_id, detector, Outcome::Failed(failure))
    }

    fn with_outcome(work_id: impl Into<String>, detector: DetectorKind, outcome: Outcome) -> Self {
        Self {
            work_id: work_id.into(),
            detector,
            outcome,
            elapsed_ms: 0,
            metadata: Options::new(),
        }
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn status(&self) -> Status {
        match self.outcome {
            Outcome::Success { .. } => Status::Success,
            Outcome::Partial { .. } => Status::Partial,
            Outcome::Failed(_)      => Status::Failed,
        }
    }

    /// Reported risk; always 0 for a failed result.
    pub fn risk_score(&self) -> f64 {
        match &self.outcome {
            Outcome::Success { risk_score, .. } | Outcome::Partial { risk_score, .. } => *risk_score,
            Outcome::Failed(_) => 0.0,
        }
    }

    pub fn signals(&self) -> &[Signal] {
        match &self.outcome {
            Outcome::Success { signals, .. } | Outcome::Partial { signals, .. } => signals,
            Outcome::Failed(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&DetectorFailure> {
        match &self.outcome {
            Outcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// Range checks on everything a detector reported.
    pub fn validate(&self) -> Result<(), String> {
        let (risk, signals) = match &self.outcome {
            Outcome::Success { risk_score, signals } | Outcome::Partial { risk_score, signals } => {
                (*risk_score, signals)
            }
            Outcome::Failed(_) => return Ok(()),
        };
        if !unit_interval(risk) {
            return Err(format!("risk_score {} outside [0,1]", risk));
        }
        for (i, s) in signals.iter().enumerate() {
            if !unit_interval(s.confidence) {
                return Err(format!(
                    "signal {} ({}) confidence {} outside [0,1]",
                    i, s.kind, s.confidence
                ));
            }
        }
        Ok(())
    }
}

fn unit_interval(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

// ── Wire shape ────────────────────────────────────────────────────────────────

/// Flat JSON shape of a detector result as detectors emit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResult {
    pub request_id: String,
    pub agent_type: DetectorKind,
    pub status:     Status,
    pub risk_score: f64,
    pub signals:    Vec<Signal>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:      Option<WireError>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata:   Options,
}

/// Error block as emitted by detectors, whose codes are not restricted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code:    String,
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub details: Options,
}

impl From<DetectorResult> for WireResult {
    fn from(r: DetectorResult) -> Self {
        let status = r.status();
        let (risk_score, signals, error) = match r.outcome {
            Outcome::Success { risk_score, signals } | Outcome::Partial { risk_score, signals } => {
                (risk_score, signals, None)
            }
            Outcome::Failed(f) => (
                0.0,
                Vec::new(),
                Some(WireError { code: f.code.as_str().to_string(), message: f.message, details: f.details }),
            ),
        };
        Self {
            request_id: r.work_id,
            agent_type: r.detector,
            status,
            risk_score,
            signals,
            processing_time_ms: r.elapsed_ms,
            error,
            metadata: r.metadata,
        }
    }
}

impl TryFrom<WireResult> for DetectorResult {
    type Error = String;

    fn try_from(w: WireResult) -> Result<Self, Self::Error> {
        let outcome = match w.status {
            Status::Success => Outcome::Success { risk_score: w.risk_score, signals: w.signals },
            Status::Partial => Outcome::Partial { risk_score: w.risk_score, signals: w.signals },
            // A failed payload keeps none of its score or signals.
            Status::Failed  => Outcome::Failed(fold_remote_error(w.error)),
        };
        let result = DetectorResult {
            work_id:    w.request_id,
            detector:   w.agent_type,
            outcome,
            elapsed_ms: w.processing_time_ms,
            metadata:   w.metadata,
        };
        result.validate()?;
        Ok(result)
    }
}

/// Map a detector-reported error onto the closed code set. Codes outside the
/// set become protocol_error with the detector's own code kept in details.
fn fold_remote_error(error: Option<WireError>) -> DetectorFailure {
    let Some(e) = error else {
        return DetectorFailure {
            code:    ErrorCode::ProtocolError,
            message: "detector reported failure without an error block".into(),
            details: Options::new(),
        };
    };
    if let Some(code) = ErrorCode::parse(&e.code) {
        return DetectorFailure { code, message: e.message, details: e.details };
    }
    let mut details = e.details;
    details.insert("remote_code".into(), Value::String(e.code.clone()));
    details.insert("remote_message".into(), Value::String(e.message.clone()));
    DetectorFailure {
        code:    ErrorCode::ProtocolError,
        message: format!("detector reported {}: {}", e.code, e.message),
        details,
    }
}

// ── Aggregate output ──────────────────────────────────────────────────────────

/// How many detectors were asked and how each one ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub requested: usize,
    pub succeeded: usize,
    pub partial:   usize,
    pub failed:    usize,
}

impl Coverage {
    pub fn from_results(results: &[DetectorResult]) -> Self {
        let mut c = Coverage { requested: results.len(), ..Default::default() };
        for r in results {
            match r.status() {
                Status::Success => c.succeeded += 1,
                Status::Partial => c.partial   += 1,
                Status::Failed  => c.failed    += 1,
            }
        }
        c
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateVerdict {
    #[serde(rename = "request_id")]
    pub work_id:        String,
    pub verdict:        Verdict,
    #[serde(rename = "risk_score")]
    pub aggregate_risk: f64,
    pub confidence:     f64,
    pub reasons:        Vec<String>,
    #[serde(rename = "agent_breakdown")]
    pub results:        Vec<DetectorResult>,
    #[serde(rename = "processing_time_ms")]
    pub elapsed_ms:     u64,
    pub timestamp:      DateTime<Utc>,
    /// True when no detector produced a usable score. A verdict with this
    /// flag set is "could not verify", never "verified authentic".
    pub unverifiable:   bool,
    pub coverage:       Coverage,
}

impl AggregateVerdict {
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_verdict() -> AggregateVerdict {
        AggregateVerdict {
            work_id:        "req-1".into(),
            verdict:        Verdict::HighRisk,
            aggregate_risk: 0.7175,
            confidence:     0.95,
            reasons:        vec!["Multiple strong manipulation indicators detected".into()],
            results:        vec![DetectorResult::success("req-1", DetectorKind::Visual, 0.8, vec![])],
            elapsed_ms:     12,
            timestamp:      Utc::now(),
            unverifiable:   false,
            coverage:       Coverage { requested: 1, succeeded: 1, partial: 0, failed: 0 },
        }
    }

    #[test]
    fn aggregate_verdict_uses_contract_field_names() {
        let v = serde_json::to_value(sample_verdict()).unwrap();
        let obj = v.as_object().unwrap();
        for key in [
            "request_id", "verdict", "risk_score", "confidence", "reasons",
            "agent_breakdown", "processing_time_ms", "timestamp", "unverifiable", "coverage",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(v["verdict"], "HIGH_RISK");
        assert_eq!(v["agent_breakdown"][0]["status"], "success");
        assert_eq!(v["agent_breakdown"][0]["agent_type"], "visual");
    }

    #[test]
    fn verdict_spellings() {
        assert_eq!(serde_json::to_value(Verdict::Authentic).unwrap(), "AUTHENTIC");
        assert_eq!(serde_json::to_value(Verdict::Suspicious).unwrap(), "SUSPICIOUS");
        assert_eq!(serde_json::to_value(Verdict::HighRisk).unwrap(), "HIGH_RISK");
        assert_eq!(Verdict::HighRisk.to_string(), "HIGH_RISK");
    }

    #[test]
    fn remote_failure_code_is_folded_into_protocol_error() {
        let payload = json!({
            "request_id": "req-1",
            "agent_type": "visual",
            "status": "failed",
            "risk_score": 0.4,
            "signals": [{ "signal_type": "x", "confidence": 0.9, "description": "stale" }],
            "error": { "code": "FILE_NOT_FOUND", "message": "Media file not found: /tmp/a.jpg" }
        });
        let r: DetectorResult = serde_json::from_value(payload).unwrap();
        assert_eq!(r.status(), Status::Failed);
        assert_eq!(r.risk_score(), 0.0);
        assert!(r.signals().is_empty());
        let err = r.error().unwrap();
        assert_eq!(err.code, ErrorCode::ProtocolError);
        assert_eq!(err.details["remote_code"], "FILE_NOT_FOUND");
    }

    #[test]
    fn unset_optional_fields_arrive_as_null() {
        // Shape a FastAPI detector emits for a missing file: unset Optional
        // fields are serialised as explicit nulls.
        let body = r#"{"request_id":"req-1","agent_type":"visual","status":"failed","risk_score":0.0,
            "signals":[],"processing_time_ms":null,
            "error":{"code":"FILE_NOT_FOUND","message":"Media file not found: /tmp/a.jpg","details":null},
            "metadata":null}"#;
        let r: DetectorResult = serde_json::from_str(body).unwrap();
        assert_eq!(r.elapsed_ms, 0);
        assert!(r.metadata.is_empty());
        let err = r.error().unwrap();
        assert_eq!(err.code, ErrorCode::ProtocolError);
        assert_eq!(err.details["remote_code"], "FILE_NOT_FOUND");
        assert_eq!(err.details["remote_message"], "Media file not found: /tmp/a.jpg");

        let s: Signal = serde_json::from_str(
            r#"{"signal_type":"blur","confidence":0.7,"description":"Blur","severity":null,"metadata":null}"#,
        )
        .unwrap();
        assert_eq!(s.severity, None);
        assert!(s.metadata.is_empty());
    }

    #[test]
    fn known_failure_code_survives_round_trip() {
        let r = DetectorResult::failed(
            "req-1",
            DetectorKind::Metadata,
            DetectorFailure { code: ErrorCode::Timeout, message: "late".into(), details: Options::new() },
        );
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["error"]["code"], "timeout");
        assert_eq!(v["risk_score"], 0.0);
        let back: DetectorResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        let payload = json!({
            "request_id": "req-1", "agent_type": "visual", "status": "success",
            "risk_score": 1.3, "signals": []
        });
        assert!(serde_json::from_value::<DetectorResult>(payload).is_err());

        let payload = json!({
            "request_id": "req-1", "agent_type": "visual", "status": "partial",
            "risk_score": 0.3,
            "signals": [{ "signal_type": "x", "confidence": -0.1, "description": "d" }]
        });
        assert!(serde_json::from_value::<DetectorResult>(payload).is_err());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let payload = json!({
            "request_id": "req-1", "agent_type": "visual", "status": "done",
            "risk_score": 0.3, "signals": []
        });
        assert!(serde_json::from_value::<DetectorResult>(payload).is_err());
    }

    #[test]
    fn missing_severity_stays_unspecified() {
        let s: Signal = serde_json::from_value(json!({
            "signal_type": "exif_missing", "confidence": 0.7, "description": "No EXIF block"
        }))
        .unwrap();
        assert_eq!(s.severity, None);
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("severity").is_none());
    }

    #[test]
    fn analysis_request_wire_names() {
        let req = AnalysisRequest {
            work_id:    "550e8400-e29b-41d4-a716-446655440000".into(),
            media_ref:  "/tmp/media/test.mp4".into(),
            media_kind: MediaKind::Video,
            detector:   DetectorKind::Visual,
            options:    Options::new(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["request_id"], "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(v["media_path"], "/tmp/media/test.mp4");
        assert_eq!(v["media_type"], "video");
        assert_eq!(v["agent_type"], "visual");
    }

    #[test]
    fn media_kind_from_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a/b/photo.JPG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("clip.webm")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("voice.flac")), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn coverage_counts_each_status() {
        let fail = DetectorFailure { code: ErrorCode::Timeout, message: String::new(), details: Options::new() };
        let results = vec![
            DetectorResult::success("w", DetectorKind::Visual, 0.1, vec![]),
            DetectorResult::partial("w", DetectorKind::Metadata, 0.2, vec![]),
            DetectorResult::failed("w", DetectorKind::Audio, fail),
        ];
        let c = Coverage::from_results(&results);
        assert_eq!(c, Coverage { requested: 3, succeeded: 1, partial: 1, failed: 1 });
    }
}
