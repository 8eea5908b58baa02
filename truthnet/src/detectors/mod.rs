// truthnet/src/detectors/mod.rs
//
// The seam between the orchestrator and the detector services.
//
// A Detector is one remote analysis capability (visual, metadata, ...).
// Implementations may fail in any way they like; the Detector Client in
// client.rs is the only caller and folds every failure into a `failed`
// DetectorResult, so nothing past this module ever sees a DetectorError.

pub mod client;
pub mod http;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::{ConfigError, DetectorSpec, EngineConfig};
use crate::contracts::{AnalysisRequest, DetectorFailure, DetectorKind, DetectorResult, ErrorCode, Options};

/// Failure of one detector call. One variant per closed error code.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Unreachable detector, connection reset, request could not be sent
    #[error("transport error: {0}")]
    Transport(String),

    /// The detector did not answer within its budget
    #[error("no response within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The detector answered with something that is not a valid result
    #[error("bad response: {0}")]
    BadResponse(String),

    /// Non-success protocol status, or the detector reported its own failure
    #[error("protocol error: {message}")]
    Protocol { message: String, details: Options },
}

impl DetectorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_)     => ErrorCode::TransportError,
            Self::Timeout(_)       => ErrorCode::Timeout,
            Self::BadResponse(_)   => ErrorCode::BadResponse,
            Self::Protocol { .. }  => ErrorCode::ProtocolError,
        }
    }

    pub fn into_failure(self) -> DetectorFailure {
        let code = self.code();
        let message = self.to_string();
        let details = match self {
            Self::Protocol { details, .. } => details,
            Self::Timeout(budget) => {
                let mut d = Options::new();
                d.insert("budget_ms".into(), Value::from(budget.as_millis() as u64));
                d
            }
            _ => Options::new(),
        };
        DetectorFailure { code, message, details }
    }
}

#[async_trait]
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// Run one analysis. `budget` is the time this call has been given; the
    /// client enforces it as well, so honouring it here is an optimisation.
    async fn analyze(&self, request: &AnalysisRequest, budget: Duration) -> Result<DetectorResult, DetectorError>;

    /// Liveness probe.
    async fn is_available(&self) -> bool;
}

/// A detector together with the configuration it was registered under.
#[derive(Clone)]
pub struct RegisteredDetector {
    pub spec:     DetectorSpec,
    pub detector: Arc<dyn Detector>,
}

impl RegisteredDetector {
    pub fn new(spec: DetectorSpec, detector: Arc<dyn Detector>) -> Self {
        Self { spec, detector }
    }

    pub fn kind(&self) -> DetectorKind {
        self.spec.kind
    }
}

/// Build one HTTP detector per configured spec, in registration order.
pub fn build_registry(config: &EngineConfig) -> Result<Vec<RegisteredDetector>, ConfigError> {
    config
        .detectors
        .iter()
        .map(|spec| {
            let detector = http::HttpDetector::new(spec.kind, spec.endpoint.clone())?;
            Ok(RegisteredDetector::new(spec.clone(), Arc::new(detector)))
        })
        .collect()
}
