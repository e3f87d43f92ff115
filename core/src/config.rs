// Runtime configuration
//
// Every section defaults from `FLOWSCOPE_*` environment variables, falling back
// to built-in constants. Binaries may overlay a file on top.

use crate::topology::{GroupingMode, LayoutMode};
use crate::{FlowscopeError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

/// Full pipeline configuration
#[derive(Clone, Debug, Default)]
pub struct FlowscopeConfig {
    pub connection: ConnectionConfig,
    pub ingest: IngestConfig,
    pub buffer: BufferConfig,
    pub projection: ProjectionConfig,
    pub layout: LayoutConfig,
}

impl FlowscopeConfig {
    pub fn validate(&self) -> Result<()> {
        fn nonzero(name: &str, value: usize) -> Result<()> {
            if value == 0 {
                return Err(FlowscopeError::Config(format!("{} must be greater than zero", name)));
            }
            Ok(())
        }
        fn positive(name: &str, value: Duration) -> Result<()> {
            if value.is_zero() {
                return Err(FlowscopeError::Config(format!("{} must be non-zero", name)));
            }
            Ok(())
        }

        positive("connection.ping_interval", self.connection.ping_interval)?;
        positive("connection.reconnect_base", self.connection.reconnect_base)?;
        if self.connection.reconnect_max < self.connection.reconnect_base {
            return Err(FlowscopeError::Config(
                "connection.reconnect_max must be >= reconnect_base".into(),
            ));
        }
        nonzero("connection.message_capacity", self.connection.message_capacity)?;
        nonzero("ingest.batch_size", self.ingest.batch_size)?;
        positive("ingest.flush_interval", self.ingest.flush_interval)?;
        nonzero("buffer.capacity", self.buffer.capacity)?;
        if self.buffer.eviction_multiplier < 2 {
            return Err(FlowscopeError::Config(
                "buffer.eviction_multiplier must be at least 2".into(),
            ));
        }
        nonzero("buffer.archive_retention", self.buffer.archive_retention)?;
        if self.projection.max_wait < self.projection.debounce {
            return Err(FlowscopeError::Config(
                "projection.max_wait must be >= projection.debounce".into(),
            ));
        }
        nonzero("projection.recent_per_edge", self.projection.recent_per_edge)?;
        nonzero("layout.converging_iterations", self.layout.converging_iterations)?;
        positive("layout.frame_interval", self.layout.frame_interval)?;
        Ok(())
    }
}

/// Stream connection settings
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Gateway base URL; the topic is appended as the last path segment
    pub base_url: String,
    /// Delay before re-checking that a fresh connection is still open
    pub verify_delay: Duration,
    pub ping_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Stop retrying after this many consecutive failures; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// Per-subscriber message queue
    pub message_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("FLOWSCOPE_GATEWAY_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "ws://127.0.0.1:4000/ws".to_string()),
            verify_delay: env_ms("FLOWSCOPE_VERIFY_DELAY_MS", 500),
            ping_interval: env_ms("FLOWSCOPE_PING_INTERVAL_MS", 25_000),
            reconnect_base: env_ms("FLOWSCOPE_RECONNECT_BASE_MS", 1_000),
            reconnect_max: env_ms("FLOWSCOPE_RECONNECT_MAX_MS", 30_000),
            max_reconnect_attempts: std::env::var("FLOWSCOPE_MAX_RECONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok()),
            message_capacity: env_or("FLOWSCOPE_MESSAGE_CAPACITY", 4096),
        }
    }
}

impl ConnectionConfig {
    /// URL of the stream serving `topic`
    pub fn endpoint_for(&self, topic: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), topic)
    }
}

/// Batching settings
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: env_or("FLOWSCOPE_BATCH_SIZE", 50),
            flush_interval: env_ms("FLOWSCOPE_FLUSH_INTERVAL_MS", 100),
        }
    }
}

/// Working set and archive settings
#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Nominal working-set size
    pub capacity: usize,
    /// Archive once the buffer holds `capacity * eviction_multiplier` events
    pub eviction_multiplier: usize,
    /// Number of archive records kept on disk
    pub archive_retention: usize,
    /// RocksDB directory; no archive when unset
    pub archive_path: Option<PathBuf>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: env_or("FLOWSCOPE_BUFFER_CAPACITY", 1_000),
            eviction_multiplier: env_or("FLOWSCOPE_EVICTION_MULTIPLIER", 2),
            archive_retention: env_or("FLOWSCOPE_ARCHIVE_RETENTION", 20),
            archive_path: std::env::var("FLOWSCOPE_ARCHIVE_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Topology rebuild settings
#[derive(Clone, Debug)]
pub struct ProjectionConfig {
    pub debounce: Duration,
    /// Upper bound on how long a sustained stream may postpone a rebuild
    pub max_wait: Duration,
    pub recent_per_edge: usize,
    pub grouping: GroupingMode,
    pub layout: LayoutMode,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            debounce: env_ms("FLOWSCOPE_DEBOUNCE_MS", 250),
            max_wait: env_ms("FLOWSCOPE_MAX_WAIT_MS", 2_000),
            recent_per_edge: env_or("FLOWSCOPE_RECENT_PER_EDGE", 10),
            grouping: env_or("FLOWSCOPE_GROUPING", GroupingMode::Endpoint),
            layout: env_or("FLOWSCOPE_LAYOUT", LayoutMode::Flat),
        }
    }
}

/// Force simulation settings
#[derive(Clone, Debug)]
pub struct LayoutConfig {
    /// Frames spent converging before dropping to one iteration per frame
    pub settle_frames: u32,
    pub converging_iterations: usize,
    pub frame_interval: Duration,
    pub center_strength: f32,
    pub repulsion: f32,
    pub spring_strength: f32,
    pub rest_length: f32,
    pub damping: f32,
    /// Distance floor applied before any division
    pub min_distance: f32,
    /// Speeds below this snap to zero
    pub rest_velocity: f32,
    pub max_speed: f32,
    pub hub_radius: f32,
    pub node_radius: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            settle_frames: env_or("FLOWSCOPE_SETTLE_FRAMES", 120),
            converging_iterations: env_or("FLOWSCOPE_CONVERGING_ITERATIONS", 5),
            frame_interval: env_ms("FLOWSCOPE_FRAME_INTERVAL_MS", 16),
            center_strength: 0.002,
            repulsion: 2_000.0,
            spring_strength: 0.05,
            rest_length: 120.0,
            damping: 0.85,
            min_distance: 1.0,
            rest_velocity: 0.01,
            max_speed: 30.0,
            hub_radius: 18.0,
            node_radius: 6.0,
        }
    }
}
