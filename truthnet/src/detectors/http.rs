// truthnet/src/detectors/http.rs
//
// JSON-over-HTTP transport to a detector service.
//
//   POST {endpoint}/analyze   body: AnalysisRequest   → 200 + DetectorResult
//   GET  {endpoint}/health                            → 2xx when alive
//
// Failure mapping:
//   connect / reset / send failure      → Transport
//   reqwest deadline                    → Timeout
//   non-2xx status                      → Protocol (status + body excerpt)
//   body not a valid DetectorResult     → BadResponse

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::debug;

use super::{Detector, DetectorError};
use crate::contracts::{AnalysisRequest, DetectorKind, DetectorResult, Options, WireResult};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const BODY_EXCERPT:   usize    = 512;

pub struct HttpDetector {
    kind:     DetectorKind,
    client:   Client,
    endpoint: String,
}

impl HttpDetector {
    pub fn new(kind: DetectorKind, endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));

        let client = Client::builder().default_headers(headers).build()?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self { kind, client, endpoint })
    }

    fn analyze_url(&self) -> String {
        format!("{}/analyze", self.endpoint)
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.endpoint)
    }
}

fn classify(err: reqwest::Error, budget: Duration) -> DetectorError {
    if err.is_timeout() {
        DetectorError::Timeout(budget)
    } else if err.is_decode() {
        DetectorError::BadResponse(err.to_string())
    } else {
        DetectorError::Transport(err.to_string())
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT).collect()
}

#[async_trait]
impl Detector for HttpDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    async fn analyze(&self, request: &AnalysisRequest, budget: Duration) -> Result<DetectorResult, DetectorError> {
        debug!("POST {} work={} budget={}ms", self.analyze_url(), request.work_id, budget.as_millis());

        let response = self
            .client
            .post(self.analyze_url())
            .timeout(budget)
            .json(request)
            .send()
            .await
            .map_err(|e| classify(e, budget))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| classify(e, budget))?;

        if !status.is_success() {
            let mut details = Options::new();
            details.insert("http_status".into(), Value::from(status.as_u16()));
            details.insert("body".into(), Value::String(excerpt(&body)));
            return Err(DetectorError::Protocol { message: format!("HTTP {}", status), details });
        }

        let wire: WireResult = serde_json::from_str(&body)
            .map_err(|e| DetectorError::BadResponse(format!("unparsable payload: {}", e)))?;
        DetectorResult::try_from(wire).map_err(DetectorError::BadResponse)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.health_url())
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
