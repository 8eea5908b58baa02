// truthnet/src/query_api.rs
//
// Analysis query API.
//
// Callers (upload services, moderation tooling) send one frame per media
// item and get the AggregateVerdict back on the same connection:
//
//   request   {"media_path": "...", "media_type"?: "image|video|audio", "request_id"?: "..."}
//   response  AggregateVerdict | {"error": "..."}
//
// Frame format:
//   [4 bytes little-endian length] [JSON payload]
//
// Frames above 1 MiB close the connection. A request that parses but cannot
// be analysed gets an error frame and the connection stays open.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::contracts::{AggregateVerdict, MediaKind};
use crate::engine::Orchestrator;
use crate::sink::VerdictSink;

pub const MAX_FRAME_BYTES: usize = 1_048_576;

// ── Wire protocol ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeCall {
    pub media_path: String,
    #[serde(default)]
    pub media_type: Option<MediaKind>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl AnalyzeCall {
    /// Fill in the work id and media kind when the caller left them out.
    pub fn resolve(&self) -> Result<(String, MediaKind), String> {
        let kind = match self.media_type {
            Some(k) => k,
            None => MediaKind::from_path(Path::new(&self.media_path))
                .ok_or_else(|| format!("cannot infer media type from '{}'", self.media_path))?,
        };
        let work_id = self.request_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok((work_id, kind))
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AnalyzeReply {
    Verdict(Box<AggregateVerdict>),
    Error { error: String },
}

// ── Server ────────────────────────────────────────────────────────────────────

pub struct QueryServer {
    engine: Arc<Orchestrator>,
    sink:   Option<Arc<VerdictSink>>,
}

impl QueryServer {
    pub fn new(engine: Arc<Orchestrator>, sink: Option<Arc<VerdictSink>>) -> Self {
        Self { engine, sink }
    }

    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("query API listening on {}", addr);
        self.serve_on(listener).await
    }

    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let srv = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(stream).await {
                    warn!("query API connection error from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let mut len_buf = [0u8; 4];
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_BYTES { anyhow::bail!("frame too large: {} bytes", len); }

            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await?;

            let reply = match serde_json::from_slice::<AnalyzeCall>(&body) {
                Ok(call) => self.answer(&call).await,
                Err(e)   => AnalyzeReply::Error { error: format!("malformed request: {}", e) },
            };
            let resp_bytes = serde_json::to_vec(&reply)?;

            let resp_len = resp_bytes.len() as u32;
            stream.write_all(&resp_len.to_le_bytes()).await?;
            stream.write_all(&resp_bytes).await?;
        }
        Ok(())
    }

    async fn answer(&self, call: &AnalyzeCall) -> AnalyzeReply {
        let (work_id, kind) = match call.resolve() {
            Ok(r)      => r,
            Err(error) => return AnalyzeReply::Error { error },
        };
        let verdict = self.engine.analyze(&work_id, &call.media_path, kind).await;
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&verdict).await {
                error!("sink write failed for work={}: {}", work_id, e);
            }
        }
        AnalyzeReply::Verdict(Box::new(verdict))
    }
}
