// truthnet/src/config.rs
//
// Process-wide engine configuration: which detectors exist, where they live,
// how much each one is trusted and how long each may take.
//
// Loaded once at startup (JSON file or built-in defaults), validated, then
// shared as Arc<EngineConfig>. Nothing mutates it after load; a future
// reload would build a fresh value and swap the Arc, never edit in place.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::contracts::{DetectorKind, Options};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse { path: String, source: serde_json::Error },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

// ── Detector registration ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSpec {
    pub kind:       DetectorKind,
    /// Base URL; the client posts to {endpoint}/analyze.
    pub endpoint:   String,
    /// Relative trust. Need not sum to 1 across detectors.
    pub weight:     f64,
    pub timeout_ms: u64,
    /// Passed verbatim as AnalysisRequest.options.
    #[serde(default)]
    pub options:    Options,
}

impl DetectorSpec {
    pub fn new(kind: DetectorKind, endpoint: impl Into<String>, weight: f64, timeout_ms: u64) -> Self {
        Self { kind, endpoint: endpoint.into(), weight, timeout_ms, options: Options::new() }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Engine config ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Registration order is the order explanations are drawn in.
    pub detectors:           Vec<DetectorSpec>,
    pub overall_deadline_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detectors: vec![
                DetectorSpec::new(DetectorKind::Visual,   "http://localhost:8001", 0.45, 30_000),
                DetectorSpec::new(DetectorKind::Metadata, "http://localhost:8002", 0.55, 30_000),
            ],
            overall_deadline_ms: 35_000,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: display.clone(), source })?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: display, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detectors.is_empty() {
            return Err(ConfigError::Invalid("no detectors registered".into()));
        }
        if self.overall_deadline_ms == 0 {
            return Err(ConfigError::Invalid("overall_deadline_ms must be > 0".into()));
        }

        let mut seen = HashSet::new();
        for d in &self.detectors {
            if !seen.insert(d.kind) {
                return Err(ConfigError::Invalid(format!("detector '{}' registered twice", d.kind)));
            }
            if !d.weight.is_finite() || d.weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "detector '{}' weight {} must be finite and >= 0",
                    d.kind, d.weight
                )));
            }
            if d.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!("detector '{}' timeout_ms must be > 0", d.kind)));
            }
            if d.weight == 0.0 {
                warn!("detector '{}' has weight 0; its signals explain but never score", d.kind);
            }
        }
        Ok(())
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.overall_deadline_ms)
    }
}

// ── Weights ───────────────────────────────────────────────────────────────────

/// Detector kind → weight. Kinds without an entry weigh 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorWeights(HashMap<DetectorKind, f64>);

impl DetectorWeights {
    pub fn from_specs<'a>(specs: impl IntoIterator<Item = &'a DetectorSpec>) -> Self {
        specs.into_iter().map(|d| (d.kind, d.weight)).collect()
    }

    pub fn weight(&self, kind: DetectorKind) -> f64 {
        self.0.get(&kind).copied().unwrap_or(0.0)
    }
}

impl FromIterator<(DetectorKind, f64)> for DetectorWeights {
    fn from_iter<I: IntoIterator<Item = (DetectorKind, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
