// truthnet/src/detectors/mock.rs
//
// Scripted in-process detector for coordinator and engine tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{Detector, DetectorError, RegisteredDetector};
use crate::config::DetectorSpec;
use crate::contracts::{AnalysisRequest, DetectorKind, DetectorResult, Signal};

#[derive(Clone)]
pub enum Script {
    Success { risk: f64, signals: Vec<Signal> },
    Partial { risk: f64, signals: Vec<Signal> },
    Transport,
    Protocol,
    /// Answer for a different work id than the one asked about.
    WrongWorkId,
    Panic,
}

pub struct ScriptedDetector {
    kind:         DetectorKind,
    script:       Script,
    delay:        Duration,
    /// Blocking sleep on the runtime thread before answering.
    stall:        Duration,
    calls:        AtomicU32,
    last_request: Mutex<Option<AnalysisRequest>>,
}

impl ScriptedDetector {
    pub fn new(kind: DetectorKind, script: Script) -> Self {
        Self {
            kind,
            script,
            delay:        Duration::ZERO,
            stall:        Duration::ZERO,
            calls:        AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_stall(mut self, stall: Duration) -> Self {
        self.stall = stall;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<AnalysisRequest> {
        self.last_request.lock().unwrap().clone()
    }

    /// Register under a DetectorSpec with the given weight and timeout.
    pub fn register(self, weight: f64, timeout: Duration) -> RegisteredDetector {
        let spec = DetectorSpec::new(self.kind, "mock://", weight, timeout.as_millis() as u64);
        RegisteredDetector::new(spec, Arc::new(self))
    }
}

pub fn success(kind: DetectorKind, risk: f64, signals: Vec<Signal>) -> ScriptedDetector {
    ScriptedDetector::new(kind, Script::Success { risk, signals })
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    async fn analyze(&self, request: &AnalysisRequest, _budget: Duration) -> Result<DetectorResult, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if !self.stall.is_zero() {
            std::thread::sleep(self.stall);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            Script::Success { risk, signals } => {
                Ok(DetectorResult::success(&request.work_id, self.kind, *risk, signals.clone()))
            }
            Script::Partial { risk, signals } => {
                Ok(DetectorResult::partial(&request.work_id, self.kind, *risk, signals.clone()))
            }
            Script::Transport => Err(DetectorError::Transport("connection reset by peer".into())),
            Script::Protocol => Err(DetectorError::Protocol {
                message: "HTTP 500 Internal Server Error".into(),
                details: Default::default(),
            }),
            Script::WrongWorkId => Ok(DetectorResult::success("someone-else", self.kind, 0.5, vec![])),
            Script::Panic => panic!("scripted detector panic"),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }
}
