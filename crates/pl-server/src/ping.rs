use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// GET /ping
// ---------------------------------------------------------------------------

pub async fn ping_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "reply": "pong",
        "time": chrono::Utc::now().timestamp(),
    }))
}

// ---------------------------------------------------------------------------
// External URL probe
// ---------------------------------------------------------------------------

/// Whether the configured public URL reached this server at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ExternalUrlStatus {
    NotConfigured,
    Pending,
    Reachable { latency_ms: u64 },
    Unreachable { reason: String },
}

impl ExternalUrlStatus {
    pub fn is_ok(&self) -> Option<bool> {
        match self {
            Self::Reachable { .. } => Some(true),
            Self::Unreachable { .. } => Some(false),
            Self::NotConfigured | Self::Pending => None,
        }
    }
}

pub type SharedUrlStatus = Arc<RwLock<ExternalUrlStatus>>;

pub struct PingProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    /// GET `{base_url}/ping` and expect a pong back.
    pub async fn probe(&self, base_url: &str) -> ExternalUrlStatus {
        let url = format!("{}/ping", base_url.trim_end_matches('/'));
        let start = Instant::now();
        let resp = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) => resp,
            Err(e) => {
                return ExternalUrlStatus::Unreachable {
                    reason: e.to_string(),
                }
            }
        };
        if !resp.status().is_success() {
            return ExternalUrlStatus::Unreachable {
                reason: format!("HTTP {}", resp.status().as_u16()),
            };
        }
        let latency_ms = start.elapsed().as_millis() as u64;
        match resp.json::<serde_json::Value>().await {
            Ok(body) if body["reply"] == "pong" => ExternalUrlStatus::Reachable { latency_ms },
            Ok(_) => ExternalUrlStatus::Unreachable {
                reason: "unexpected ping reply".to_owned(),
            },
            Err(e) => ExternalUrlStatus::Unreachable {
                reason: e.to_string(),
            },
        }
    }
}

/// Probe `external_url` once in the background and record the outcome.
pub fn spawn_external_probe(
    external_url: String,
    probe: PingProbe,
    status: SharedUrlStatus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        *status.write().await = ExternalUrlStatus::Pending;
        let outcome = probe.probe(&external_url).await;
        match &outcome {
            ExternalUrlStatus::Reachable { latency_ms } => {
                tracing::info!(url = %external_url, latency_ms, "external url reachable");
            }
            other => {
                tracing::warn!(url = %external_url, outcome = ?other, "external url not reachable");
            }
        }
        *status.write().await = outcome;
    })
}
