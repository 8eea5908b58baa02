// truthnet/src/sink.rs
//
// Writes verdicts to output JSONL files.
//
//   verdicts.jsonl      every verdict, full agent breakdown
//   review_queue.jsonl  HIGH_RISK verdicts awaiting a human reviewer
//   unverifiable.jsonl  analyses where no detector produced a usable score
//   audit_log.jsonl     one compact line per verdict
//
// Append-only output. Nothing here is read back by the engine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::contracts::{AggregateVerdict, Coverage, Verdict};

#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    request_id:   &'a str,
    verdict:      Verdict,
    risk_score:   f64,
    confidence:   f64,
    unverifiable: bool,
    coverage:     Coverage,
    timestamp:    DateTime<Utc>,
}

pub struct VerdictSink {
    out: PathBuf,
}

impl VerdictSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)
            .with_context(|| format!("failed to create output directory {}", out.display()))?;
        Ok(Self { out })
    }

    pub async fn record(&self, verdict: &AggregateVerdict) -> Result<()> {
        let line = verdict.to_jsonl() + "\n";
        self.write("verdicts.jsonl", &line).await?;

        if verdict.unverifiable {
            self.write("unverifiable.jsonl", &line).await?;
            info!("UNVERIFIABLE work={} queued", verdict.work_id);
        } else if verdict.verdict == Verdict::HighRisk {
            self.write("review_queue.jsonl", &line).await?;
            info!("REVIEW work={} risk={:.4}", verdict.work_id, verdict.aggregate_risk);
        }

        let audit = AuditEntry {
            request_id:   &verdict.work_id,
            verdict:      verdict.verdict,
            risk_score:   verdict.aggregate_risk,
            confidence:   verdict.confidence,
            unverifiable: verdict.unverifiable,
            coverage:     verdict.coverage,
            timestamp:    verdict.timestamp,
        };
        self.write("audit_log.jsonl", &(serde_json::to_string(&audit)? + "\n")).await?;
        Ok(())
    }

    async fn write(&self, file: &str, content: &str) -> Result<()> {
        let mut f = OpenOptions::new().create(true).append(true)
            .open(self.out.join(file)).await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}
