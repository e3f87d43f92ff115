use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flowscope_core::config::{BufferConfig, ConnectionConfig, IngestConfig, LayoutConfig, ProjectionConfig};
use flowscope_core::protocol::SubscriptionFilters;
use flowscope_core::topology::{GroupingMode, LayoutMode};
use flowscope_core::FlowscopeConfig;

/// High-level configuration for the flow watcher
#[derive(Clone, Debug)]
pub struct FlowWatchConfig {
    pub core: FlowscopeConfig,
    /// Stream topic to follow
    pub topic: String,
    /// How often a status line is logged
    pub report_interval: Duration,
    /// Optional server-side scoping sent with `subscribe`
    pub server_filters: Option<SubscriptionFilters>,
}

impl Default for FlowWatchConfig {
    fn default() -> Self {
        Self {
            core: FlowscopeConfig::default(),
            topic: std::env::var("FLOW_WATCH_TOPIC")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "traffic".to_string()),
            report_interval: Duration::from_millis(
                std::env::var("FLOW_WATCH_REPORT_MS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(5_000),
            ),
            server_filters: std::env::var("FLOW_WATCH_SESSION")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|session| SubscriptionFilters {
                    session_id: Some(session),
                    ..Default::default()
                }),
        }
    }
}

impl FlowWatchConfig {
    /// Load configuration from a TOML file (path via FLOW_WATCH_CONFIG or ./flow_watch.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("FLOW_WATCH_CONFIG").unwrap_or_else(|_| "flow_watch.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target = "flow_watch", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => Self::from_toml(&s, default),
            Err(e) => {
                tracing::warn!(target = "flow_watch", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    fn from_toml(text: &str, default: Self) -> Self {
        match toml::from_str::<FlowWatchToml>(text) {
            Ok(t) => t.overlay(default),
            Err(e) => {
                tracing::warn!(target = "flow_watch", error = %e, "Failed to parse TOML; using defaults");
                default
            }
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct FlowWatchToml {
    pub topic: Option<String>,
    pub report_interval_ms: Option<u64>,
    pub session_id: Option<String>,
    pub categories: Option<Vec<String>>,
    pub connection: Option<ConnectionToml>,
    pub ingest: Option<IngestToml>,
    pub buffer: Option<BufferToml>,
    pub projection: Option<ProjectionToml>,
    pub layout: Option<LayoutToml>,
}

impl FlowWatchToml {
    fn overlay(self, mut base: FlowWatchConfig) -> FlowWatchConfig {
        if let Some(t) = self.topic {
            base.topic = t;
        }
        if let Some(ms) = self.report_interval_ms {
            base.report_interval = Duration::from_millis(ms.max(100));
        }
        if self.session_id.is_some() || self.categories.is_some() {
            let filters = base.server_filters.get_or_insert_with(Default::default);
            if let Some(session) = self.session_id {
                filters.session_id = Some(session);
            }
            if let Some(categories) = self.categories {
                filters.categories = categories;
            }
        }
        if let Some(c) = self.connection {
            c.apply(&mut base.core.connection);
        }
        if let Some(i) = self.ingest {
            i.apply(&mut base.core.ingest);
        }
        if let Some(b) = self.buffer {
            b.apply(&mut base.core.buffer);
        }
        if let Some(p) = self.projection {
            p.apply(&mut base.core.projection);
        }
        if let Some(l) = self.layout {
            l.apply(&mut base.core.layout);
        }
        base
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ConnectionToml {
    pub base_url: Option<String>,
    pub verify_delay_ms: Option<u64>,
    pub ping_interval_ms: Option<u64>,
    pub reconnect_base_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
}
impl ConnectionToml {
    fn apply(self, c: &mut ConnectionConfig) {
        if let Some(v) = self.base_url {
            c.base_url = v;
        }
        if let Some(v) = self.verify_delay_ms {
            c.verify_delay = millis(v);
        }
        if let Some(v) = self.ping_interval_ms {
            c.ping_interval = millis(v);
        }
        if let Some(v) = self.reconnect_base_ms {
            c.reconnect_base = millis(v);
        }
        if let Some(v) = self.reconnect_max_ms {
            c.reconnect_max = millis(v);
        }
        if let Some(v) = self.max_reconnect_attempts {
            c.max_reconnect_attempts = Some(v);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct IngestToml {
    pub batch_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
}
impl IngestToml {
    fn apply(self, i: &mut IngestConfig) {
        if let Some(v) = self.batch_size {
            i.batch_size = v;
        }
        if let Some(v) = self.flush_interval_ms {
            i.flush_interval = millis(v);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct BufferToml {
    pub capacity: Option<usize>,
    pub eviction_multiplier: Option<usize>,
    pub archive_retention: Option<usize>,
    pub archive_path: Option<PathBuf>,
}
impl BufferToml {
    fn apply(self, b: &mut BufferConfig) {
        if let Some(v) = self.capacity {
            b.capacity = v;
        }
        if let Some(v) = self.eviction_multiplier {
            b.eviction_multiplier = v;
        }
        if let Some(v) = self.archive_retention {
            b.archive_retention = v;
        }
        if let Some(v) = self.archive_path {
            b.archive_path = Some(v);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ProjectionToml {
    pub debounce_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub recent_per_edge: Option<usize>,
    pub grouping: Option<GroupingMode>,
    pub layout: Option<LayoutMode>,
}
impl ProjectionToml {
    fn apply(self, p: &mut ProjectionConfig) {
        if let Some(v) = self.debounce_ms {
            p.debounce = millis(v);
        }
        if let Some(v) = self.max_wait_ms {
            p.max_wait = millis(v);
        }
        if let Some(v) = self.recent_per_edge {
            p.recent_per_edge = v;
        }
        if let Some(v) = self.grouping {
            p.grouping = v;
        }
        if let Some(v) = self.layout {
            p.layout = v;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct LayoutToml {
    pub settle_frames: Option<u32>,
    pub converging_iterations: Option<usize>,
    pub frame_interval_ms: Option<u64>,
    pub repulsion: Option<f32>,
    pub spring_strength: Option<f32>,
    pub rest_length: Option<f32>,
    pub damping: Option<f32>,
}
impl LayoutToml {
    fn apply(self, l: &mut LayoutConfig) {
        if let Some(v) = self.settle_frames {
            l.settle_frames = v;
        }
        if let Some(v) = self.converging_iterations {
            l.converging_iterations = v;
        }
        if let Some(v) = self.frame_interval_ms {
            l.frame_interval = millis(v);
        }
        if let Some(v) = self.repulsion {
            l.repulsion = v;
        }
        if let Some(v) = self.spring_strength {
            l.spring_strength = v;
        }
        if let Some(v) = self.rest_length {
            l.rest_length = v;
        }
        if let Some(v) = self.damping {
            l.damping = v.clamp(0.0, 1.0);
        }
    }
}
