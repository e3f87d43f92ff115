// Flowscope Core Library
// Live traffic telemetry: stream ingestion, bounded archival, topology projection and layout

pub mod buffer;
pub mod config;
pub mod connection;
pub mod event;
pub mod ingest;
pub mod layout;
pub mod protocol;
pub mod runtime;
pub mod stats;
pub mod telemetry;
pub mod topology;

// Export core types
pub use buffer::{ArchiveStore, EventBuffer, InMemoryArchiveStore, RocksArchiveStore};
pub use config::FlowscopeConfig;
pub use connection::{ConnectionManager, ConnectionRegistry, ConnectionState, Subscription};
pub use event::{Event, EventKind, SharedEvent};
pub use ingest::{Batch, Batcher};
pub use layout::{EnginePhase, LayoutEngine};
pub use protocol::{InboundMessage, OutboundMessage};
pub use runtime::{Flowscope, FlowscopeHandle};
pub use topology::{project, FilterState, TopologySnapshot};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowscopeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, FlowscopeError>;
