use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: Config =
            toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        fn check_positive(name: &str, v: u64) -> anyhow::Result<()> {
            if v == 0 {
                anyhow::bail!("invalid {name}=0 (must be > 0)");
            }
            Ok(())
        }

        if self.bridge.http_base.trim().is_empty() {
            anyhow::bail!("bridge.http_base must not be empty");
        }
        if !self.bridge.ws_url.starts_with("ws://") && !self.bridge.ws_url.starts_with("wss://") {
            anyhow::bail!(
                "bridge.ws_url must start with ws:// or wss://, got {}",
                self.bridge.ws_url
            );
        }
        check_positive("bridge.http_timeout_ms", self.bridge.http_timeout_ms)?;
        check_positive("bridge.ws_connect_timeout_ms", self.bridge.ws_connect_timeout_ms)?;
        check_positive("bridge.max_body_bytes", self.bridge.max_body_bytes as u64)?;
        check_positive(
            "bridge.offline_after_failures",
            self.bridge.offline_after_failures,
        )?;

        check_positive("sync.fast_poll_ms", self.sync.fast_poll_ms)?;
        check_positive("sync.slow_poll_ms", self.sync.slow_poll_ms)?;
        if self.sync.fast_min_interval_ms > self.sync.fast_poll_ms {
            anyhow::bail!(
                "sync.fast_min_interval_ms={} must be <= sync.fast_poll_ms={}",
                self.sync.fast_min_interval_ms,
                self.sync.fast_poll_ms
            );
        }
        if self.sync.slow_min_interval_ms > self.sync.slow_poll_ms {
            anyhow::bail!(
                "sync.slow_min_interval_ms={} must be <= sync.slow_poll_ms={}",
                self.sync.slow_min_interval_ms,
                self.sync.slow_poll_ms
            );
        }

        check_positive("push.reconnect_base_ms", self.push.reconnect_base_ms)?;
        if self.push.reconnect_cap_ms < self.push.reconnect_base_ms {
            anyhow::bail!(
                "push.reconnect_cap_ms={} must be >= push.reconnect_base_ms={}",
                self.push.reconnect_cap_ms,
                self.push.reconnect_base_ms
            );
        }
        if !(1..=32).contains(&self.push.max_attempts) {
            anyhow::bail!(
                "push.max_attempts must be in [1, 32], got {}",
                self.push.max_attempts
            );
        }
        check_positive("push.ping_interval_ms", self.push.ping_interval_ms)?;
        if self.push.idle_timeout_ms <= self.push.ping_interval_ms {
            anyhow::bail!(
                "push.idle_timeout_ms={} must be > push.ping_interval_ms={}",
                self.push.idle_timeout_ms,
                self.push.ping_interval_ms
            );
        }

        crate::candles::ChartQuery::new(&self.chart.symbol, &self.chart.timeframe, self.chart.hours)
            .context("invalid [chart] defaults")?;
        if self.chart.max_candles == 0 {
            anyhow::bail!("invalid chart.max_candles=0 (must be > 0)");
        }

        check_positive("health.heartbeat_ms", self.health.heartbeat_ms)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BridgeConfig {
    /// Dashboard API base; endpoint paths (`/api/...`) are appended.
    #[serde(default = "default_http_base")]
    pub http_base: String,
    /// Push stream endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Deadline for one GET including body download (ms).
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    /// TCP connect timeout for HTTP requests (ms).
    #[serde(default = "default_http_connect_timeout_ms")]
    pub http_connect_timeout_ms: u64,
    /// WebSocket connect timeout (ms).
    #[serde(default = "default_ws_connect_timeout_ms")]
    pub ws_connect_timeout_ms: u64,
    /// Responses larger than this are treated as failures.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Consecutive failures after which the bridge is reported offline.
    #[serde(default = "default_offline_after_failures")]
    pub offline_after_failures: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            http_base: default_http_base(),
            ws_url: default_ws_url(),
            http_timeout_ms: default_http_timeout_ms(),
            http_connect_timeout_ms: default_http_connect_timeout_ms(),
            ws_connect_timeout_ms: default_ws_connect_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            offline_after_failures: default_offline_after_failures(),
        }
    }
}

impl BridgeConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn ws_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_connect_timeout_ms)
    }
}

fn default_http_base() -> String {
    "http://127.0.0.1:3004".to_string()
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:3004/api/ws".to_string()
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_http_connect_timeout_ms() -> u64 {
    5_000
}

fn default_ws_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_offline_after_failures() -> u64 {
    3
}

#[derive(Clone, Debug, Deserialize)]
pub struct SyncConfig {
    /// Minimum spacing between two fast-channel cycles (ms).
    #[serde(default = "default_fast_min_interval_ms")]
    pub fast_min_interval_ms: u64,
    /// Minimum spacing between two slow-channel cycles (ms).
    #[serde(default = "default_slow_min_interval_ms")]
    pub slow_min_interval_ms: u64,
    /// Background poll cadence for the fast channel (ms).
    #[serde(default = "default_fast_poll_ms")]
    pub fast_poll_ms: u64,
    /// Background poll cadence for the slow channel (ms).
    #[serde(default = "default_slow_poll_ms")]
    pub slow_poll_ms: u64,
    /// Upper bound on latency between a position/order push event and the refresh (ms).
    #[serde(default = "default_push_fast_within_ms")]
    pub push_fast_within_ms: u64,
    /// Same for unrecognised push events routed to the slow channel (ms).
    #[serde(default = "default_push_slow_within_ms")]
    pub push_slow_within_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fast_min_interval_ms: default_fast_min_interval_ms(),
            slow_min_interval_ms: default_slow_min_interval_ms(),
            fast_poll_ms: default_fast_poll_ms(),
            slow_poll_ms: default_slow_poll_ms(),
            push_fast_within_ms: default_push_fast_within_ms(),
            push_slow_within_ms: default_push_slow_within_ms(),
        }
    }
}

fn default_fast_min_interval_ms() -> u64 {
    400
}

fn default_slow_min_interval_ms() -> u64 {
    1_500
}

fn default_fast_poll_ms() -> u64 {
    2_000
}

fn default_slow_poll_ms() -> u64 {
    10_000
}

fn default_push_fast_within_ms() -> u64 {
    150
}

fn default_push_slow_within_ms() -> u64 {
    1_000
}

#[derive(Clone, Debug, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
    /// Uniform jitter added on top of the capped backoff (ms, inclusive upper bound).
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,
    /// Ceiling for the attempt counter; bounds the exponent, never stops retrying.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Drop the link when nothing (data, pong or ping) arrives for this long (ms).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Route unrecognised push events to a slow refresh instead of dropping them.
    #[serde(default = "default_refresh_on_unknown")]
    pub refresh_on_unknown: bool,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            max_attempts: default_max_attempts(),
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            refresh_on_unknown: default_refresh_on_unknown(),
        }
    }
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_cap_ms() -> u64 {
    30_000
}

fn default_reconnect_jitter_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    10
}

fn default_ping_interval_ms() -> u64 {
    20_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_refresh_on_unknown() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_chart_symbol")]
    pub symbol: String,
    #[serde(default = "default_chart_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_chart_hours")]
    pub hours: u32,
    /// Candle rows kept per series; older rows are dropped.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            symbol: default_chart_symbol(),
            timeframe: default_chart_timeframe(),
            hours: default_chart_hours(),
            max_candles: default_max_candles(),
        }
    }
}

fn default_chart_symbol() -> String {
    "ES".to_string()
}

fn default_chart_timeframe() -> String {
    "5m".to_string()
}

fn default_chart_hours() -> u32 {
    24
}

fn default_max_candles() -> usize {
    5_000
}

#[derive(Clone, Debug, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Append heartbeats to this JSONL file when set.
    #[serde(default)]
    pub jsonl_path: Option<PathBuf>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            jsonl_path: None,
        }
    }
}

fn default_heartbeat_ms() -> u64 {
    30_000
}
