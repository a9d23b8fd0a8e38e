use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;
use tracing::warn;

use crate::config::BridgeConfig;
use crate::store::Opaque;

/// Polled endpoints with a fixed path. Chart and swing-point reads are parameterized and
/// built from the active [`crate::candles::ChartQuery`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Status,
    Account,
    Positions,
    Quotes,
    Levels,
    Trades,
    Signals,
}

impl Endpoint {
    pub const FAST: [Endpoint; 4] = [
        Endpoint::Status,
        Endpoint::Account,
        Endpoint::Positions,
        Endpoint::Quotes,
    ];
    pub const SLOW: [Endpoint; 3] = [Endpoint::Levels, Endpoint::Trades, Endpoint::Signals];

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Status => "/api/status",
            Endpoint::Account => "/api/account",
            Endpoint::Positions => "/api/positions",
            Endpoint::Quotes => "/api/quotes",
            Endpoint::Levels => "/api/levels",
            Endpoint::Trades => "/api/trades",
            Endpoint::Signals => "/api/signals",
        }
    }

    /// Store slot for endpoints whose payload is kept verbatim.
    pub fn opaque_slot(self) -> Option<Opaque> {
        match self {
            Endpoint::Status => Some(Opaque::Status),
            Endpoint::Account => Some(Opaque::Account),
            Endpoint::Positions => Some(Opaque::Positions),
            Endpoint::Trades => Some(Opaque::Trades),
            Endpoint::Signals => Some(Opaque::Signals),
            Endpoint::Quotes | Endpoint::Levels => None,
        }
    }
}

pub fn swing_points_path(symbol: &str) -> String {
    format!("/api/swing-points?symbol={symbol}")
}

/// One bounded request/response fetch.
///
/// Implementations never fail past the call site: timeouts, non-success status, oversize
/// bodies and decode errors all come back as `None`.
pub trait Transport: Send + Sync + 'static {
    fn get_json(&self, path: &str) -> impl Future<Output = Option<Value>> + Send;
}

pub struct HttpBridge {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpBridge {
    pub fn new(cfg: &BridgeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lsr-sync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_millis(cfg.http_connect_timeout_ms))
            .timeout(cfg.http_timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base: cfg.http_base.trim_end_matches('/').to_string(),
            timeout: cfg.http_timeout(),
            max_body_bytes: cfg.max_body_bytes,
        })
    }

    async fn fetch(&self, path: &str) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base, path);
        let mut resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("GET {path}: http status {status}");
        }
        if let Some(len) = resp.content_length() {
            if len > self.max_body_bytes as u64 {
                anyhow::bail!("GET {path}: content-length {len} exceeds {}", self.max_body_bytes);
            }
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await.with_context(|| format!("read {path}"))? {
            body.extend_from_slice(&chunk);
            if body.len() > self.max_body_bytes {
                anyhow::bail!("GET {path}: body exceeds {} bytes", self.max_body_bytes);
            }
        }

        serde_json::from_slice(&body).with_context(|| format!("decode {path}"))
    }
}

impl Transport for HttpBridge {
    async fn get_json(&self, path: &str) -> Option<Value> {
        match tokio::time::timeout(self.timeout, self.fetch(path)).await {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                warn!(path, error = %format!("{e:#}"), "bridge request failed");
                None
            }
            Err(_) => {
                warn!(path, timeout_ms = self.timeout.as_millis() as u64, "bridge request timed out");
                None
            }
        }
    }
}
