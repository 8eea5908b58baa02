// truthnet/src/metrics.rs
//
// Operational metrics in Prometheus text exposition format.
//
//   truthnet_analyses_total                        Counter  analyses completed
//   truthnet_verdicts_total{verdict}               Counter  verdicts by tier
//   truthnet_unverifiable_total                    Counter  analyses with no usable score
//   truthnet_detector_results_total{detector,status} Counter per-detector outcomes
//   truthnet_detector_failures_total{detector,code}  Counter per-detector failure codes
//   truthnet_abandoned_total                       Counter  slots filled at the overall deadline
//   truthnet_risk_score{le}                        Histogram aggregate risk, 0.1-wide buckets
//
// Endpoint: GET /metrics (default 127.0.0.1:9091)

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::contracts::{AggregateVerdict, DetectorKind, ErrorCode, Status, Verdict};

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Metrics {
    pub analyses:           AtomicU64,
    pub verdict_authentic:  AtomicU64,
    pub verdict_suspicious: AtomicU64,
    pub verdict_high_risk:  AtomicU64,
    pub unverifiable:       AtomicU64,
    pub abandoned:          AtomicU64,
    detector_results:       DashMap<(DetectorKind, Status), u64>,
    detector_failures:      DashMap<(DetectorKind, ErrorCode), u64>,
    /// Per-bucket counts: [0.0, 0.1], (0.1, 0.2], ... (0.9, 1.0].
    /// Rendered cumulatively.
    risk_buckets:           [AtomicU64; 10],
    /// Sum of aggregate risk in millionths.
    risk_sum_micros:        AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_verdict(&self, verdict: &AggregateVerdict, abandoned: usize) {
        self.analyses.fetch_add(1, Ordering::Relaxed);
        match verdict.verdict {
            Verdict::Authentic  => self.verdict_authentic.fetch_add(1, Ordering::Relaxed),
            Verdict::Suspicious => self.verdict_suspicious.fetch_add(1, Ordering::Relaxed),
            Verdict::HighRisk   => self.verdict_high_risk.fetch_add(1, Ordering::Relaxed),
        };
        if verdict.unverifiable {
            self.unverifiable.fetch_add(1, Ordering::Relaxed);
        }
        self.abandoned.fetch_add(abandoned as u64, Ordering::Relaxed);

        let risk = verdict.aggregate_risk;
        let bucket = (0..10).find(|&i| risk <= risk_bound(i)).unwrap_or(9);
        self.risk_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.risk_sum_micros.fetch_add((risk * 1e6).round() as u64, Ordering::Relaxed);

        for r in &verdict.results {
            *self.detector_results.entry((r.detector, r.status())).or_insert(0) += 1;
            if let Some(err) = r.error() {
                *self.detector_failures.entry((r.detector, err.code)).or_insert(0) += 1;
            }
        }
    }

    pub fn detector_count(&self, kind: DetectorKind, status: Status) -> u64 {
        self.detector_results.get(&(kind, status)).map(|v| *v).unwrap_or(0)
    }

    pub fn prometheus_text(&self) -> String {
        let mut out = String::with_capacity(2048);

        macro_rules! counter {
            ($name:expr, $help:expr, $val:expr) => {
                out.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
                    $name, $help, $name, $name, $val
                ));
            };
        }

        counter!(
            "truthnet_analyses_total",
            "Analyses completed",
            self.analyses.load(Ordering::Relaxed)
        );

        out.push_str("# HELP truthnet_verdicts_total Verdicts by tier\n");
        out.push_str("# TYPE truthnet_verdicts_total counter\n");
        for (label, counter) in [
            ("AUTHENTIC", &self.verdict_authentic),
            ("SUSPICIOUS", &self.verdict_suspicious),
            ("HIGH_RISK", &self.verdict_high_risk),
        ] {
            out.push_str(&format!(
                "truthnet_verdicts_total{{verdict=\"{}\"}} {}\n",
                label,
                counter.load(Ordering::Relaxed)
            ));
        }

        counter!(
            "truthnet_unverifiable_total",
            "Analyses where no detector produced a usable score",
            self.unverifiable.load(Ordering::Relaxed)
        );
        counter!(
            "truthnet_abandoned_total",
            "Detector calls still running at the overall deadline",
            self.abandoned.load(Ordering::Relaxed)
        );

        // DashMap iteration order is arbitrary; sort so scrapes diff cleanly.
        let mut results: Vec<String> = self
            .detector_results
            .iter()
            .map(|e| {
                let (kind, status) = e.key();
                format!(
                    "truthnet_detector_results_total{{detector=\"{}\",status=\"{}\"}} {}\n",
                    kind, status, e.value()
                )
            })
            .collect();
        results.sort();
        out.push_str("# HELP truthnet_detector_results_total Detector outcomes by status\n");
        out.push_str("# TYPE truthnet_detector_results_total counter\n");
        results.iter().for_each(|l| out.push_str(l));

        let mut failures: Vec<String> = self
            .detector_failures
            .iter()
            .map(|e| {
                let (kind, code) = e.key();
                format!(
                    "truthnet_detector_failures_total{{detector=\"{}\",code=\"{}\"}} {}\n",
                    kind, code, e.value()
                )
            })
            .collect();
        failures.sort();
        out.push_str("# HELP truthnet_detector_failures_total Detector failures by error code\n");
        out.push_str("# TYPE truthnet_detector_failures_total counter\n");
        failures.iter().for_each(|l| out.push_str(l));

        out.push_str("# HELP truthnet_risk_score Aggregate risk distribution (0.1-wide buckets)\n");
        out.push_str("# TYPE truthnet_risk_score histogram\n");
        let mut cumulative = 0u64;
        for (i, bucket) in self.risk_buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            out.push_str(&format!(
                "truthnet_risk_score_bucket{{le=\"{:.1}\"}} {}\n",
                risk_bound(i), cumulative
            ));
        }
        out.push_str(&format!("truthnet_risk_score_bucket{{le=\"+Inf\"}} {}\n", cumulative));
        out.push_str(&format!(
            "truthnet_risk_score_sum {}\n",
            self.risk_sum_micros.load(Ordering::Relaxed) as f64 / 1e6
        ));
        out.push_str(&format!("truthnet_risk_score_count {}\n", cumulative));

        out
    }
}

/// Upper bound of risk bucket `i`.
fn risk_bound(i: usize) -> f64 {
    (i + 1) as f64 / 10.0
}

// ── HTTP /metrics endpoint ────────────────────────────────────────────────────

pub struct MetricsServer {
    pub metrics: Arc<Metrics>,
    addr:        SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("/metrics endpoint listening on {}", self.addr);
        self.serve_on(listener).await
    }

    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (mut stream, peer) = listener.accept().await?;
            let metrics = Arc::clone(&self.metrics);

            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let n = match stream.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("metrics read from {} failed: {}", peer, e);
                        return;
                    }
                };
                let request = String::from_utf8_lossy(&buf[..n]);
                let response = if request.starts_with("GET /metrics") {
                    let body = metrics.prometheus_text();
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(), body
                    )
                } else {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                };
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    }
}
