//! Graph projection of buffered traffic.
//!
//! - `filter`: user predicates over events
//! - `projection`: single-pass grouping into hub/category/endpoint nodes
//! - `rebuild`: debounce scheduling for projections

pub mod filter;
pub mod projection;
pub mod rebuild;

pub use filter::{FilterState, TimeRange};
pub use projection::{
    project, router_prefix, EdgeStatus, GroupingMode, LatencySummary, LayoutMode, NodeKind,
    ProjectionOptions, TopologyEdge, TopologyNode, TopologySnapshot, HUB_ID,
};
pub use rebuild::RebuildScheduler;
