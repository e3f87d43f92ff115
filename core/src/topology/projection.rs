// Topology projection
//
// Derives nodes and edges from a buffer snapshot and the active filters in a
// single pass. Output is fully determined by the inputs: groups are kept in
// ordered maps so repeated projections compare equal.

use super::filter::FilterState;
use crate::config::ProjectionConfig;
use crate::event::{Event, SharedEvent};
use crate::FlowscopeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;

/// Id of the synthetic central node
pub const HUB_ID: &str = "@hub";
const CATEGORY_PREFIX: &str = "@category/";

/// How events are grouped into leaf nodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    /// One node per endpoint path
    #[default]
    Endpoint,
    /// One node per first path segment
    Router,
}

impl FromStr for GroupingMode {
    type Err = FlowscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "endpoint" => Ok(GroupingMode::Endpoint),
            "router" => Ok(GroupingMode::Router),
            other => Err(FlowscopeError::Config(format!("unknown grouping mode: {}", other))),
        }
    }
}

/// Node/edge shape of the projected graph
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    /// hub -> leaf
    #[default]
    Flat,
    /// hub -> category -> leaf
    Hierarchical,
}

impl FromStr for LayoutMode {
    type Err = FlowscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(LayoutMode::Flat),
            "hierarchical" => Ok(LayoutMode::Hierarchical),
            other => Err(FlowscopeError::Config(format!("unknown layout mode: {}", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProjectionOptions {
    pub grouping: GroupingMode,
    pub layout: LayoutMode,
    /// Recent events retained per edge for hover detail
    pub recent_per_edge: usize,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            grouping: GroupingMode::Endpoint,
            layout: LayoutMode::Flat,
            recent_per_edge: 10,
        }
    }
}

impl From<&ProjectionConfig> for ProjectionOptions {
    fn from(config: &ProjectionConfig) -> Self {
        Self {
            grouping: config.grouping,
            layout: config.layout,
            recent_per_edge: config.recent_per_edge,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Hub,
    Category,
    Endpoint,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    /// `None` when no event in the group reported a duration
    pub latency: Option<LatencySummary>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Healthy,
    Degraded,
    Failing,
}

impl EdgeStatus {
    pub fn from_error_rate(rate: f64) -> Self {
        if rate >= 0.25 {
            EdgeStatus::Failing
        } else if rate > 0.0 {
            EdgeStatus::Degraded
        } else {
            EdgeStatus::Healthy
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            EdgeStatus::Healthy => "#22c55e",
            EdgeStatus::Degraded => "#f59e0b",
            EdgeStatus::Failing => "#ef4444",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub source: String,
    pub target: String,
    pub request_count: u64,
    pub error_count: u64,
    pub status: EdgeStatus,
    pub color: String,
    /// Most recent events on this edge, oldest first
    pub recent: Vec<SharedEvent>,
}

/// Derived graph for one (events, filters, options) input
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
    /// Events that passed the filters
    pub event_count: usize,
}

impl TopologySnapshot {
    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&TopologyEdge> {
        self.edges
            .iter()
            .find(|edge| edge.source == source && edge.target == target)
    }

    /// Same node ids and edge endpoints, in the same order
    pub fn same_shape(&self, other: &TopologySnapshot) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.edges.len() == other.edges.len()
            && self.nodes.iter().zip(&other.nodes).all(|(a, b)| a.id == b.id)
            && self
                .edges
                .iter()
                .zip(&other.edges)
                .all(|(a, b)| a.source == b.source && a.target == b.target)
    }
}

#[derive(Default)]
struct Group {
    count: u64,
    errors: u64,
    latencies: Vec<f64>,
    recent: VecDeque<SharedEvent>,
}

impl Group {
    fn observe(&mut self, event: &SharedEvent, keep: usize) {
        self.count += 1;
        if event.is_error() {
            self.errors += 1;
        }
        if let Some(duration) = event.duration_ms.filter(|d| d.is_finite()) {
            self.latencies.push(duration);
        }
        if keep > 0 {
            if self.recent.len() == keep {
                self.recent.pop_front();
            }
            self.recent.push_back(SharedEvent::clone(event));
        }
    }

    fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.errors as f64 / self.count as f64
        }
    }

    fn node(&mut self, id: String, label: String, kind: NodeKind) -> TopologyNode {
        TopologyNode {
            id,
            label,
            kind,
            request_count: self.count,
            error_count: self.errors,
            error_rate: self.error_rate(),
            latency: summarize(&mut self.latencies),
        }
    }

    fn edge(&mut self, source: &str, target: &str) -> TopologyEdge {
        let status = EdgeStatus::from_error_rate(self.error_rate());
        TopologyEdge {
            source: source.to_string(),
            target: target.to_string(),
            request_count: self.count,
            error_count: self.errors,
            status,
            color: status.color().to_string(),
            recent: std::mem::take(&mut self.recent).into(),
        }
    }
}

fn summarize(latencies: &mut [f64]) -> Option<LatencySummary> {
    if latencies.is_empty() {
        return None;
    }
    latencies.sort_by(f64::total_cmp);
    let sum: f64 = latencies.iter().sum();
    Some(LatencySummary {
        avg_ms: sum / latencies.len() as f64,
        p50_ms: percentile(latencies, 50.0),
        p95_ms: percentile(latencies, 95.0),
        p99_ms: percentile(latencies, 99.0),
    })
}

/// Nearest-rank percentile over sorted, non-empty input
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// First path segment: `/api/v1/users` -> `/api`, `pty/3` -> `pty`
pub fn router_prefix(path: &str) -> &str {
    let start = usize::from(path.starts_with('/'));
    match path[start..].find('/') {
        Some(index) => &path[..start + index],
        None => path,
    }
}

fn group_key(event: &Event, grouping: GroupingMode) -> &str {
    match grouping {
        GroupingMode::Endpoint => event.path(),
        GroupingMode::Router => router_prefix(event.path()),
    }
}

pub fn category_id(category: &str) -> String {
    format!("{}{}", CATEGORY_PREFIX, category)
}

/// Project a buffer snapshot into a topology.
///
/// Filtering, grouping, counters, latency lists and recent-event rings are
/// all produced by one traversal of `events`.
pub fn project(
    events: &[SharedEvent],
    filters: &FilterState,
    options: &ProjectionOptions,
) -> TopologySnapshot {
    let keep = options.recent_per_edge;
    let matches = filters.matcher();
    let hierarchical = options.layout == LayoutMode::Hierarchical;

    let mut hub = Group::default();
    let mut categories: BTreeMap<&str, Group> = BTreeMap::new();
    let mut leaves: BTreeMap<(&str, &str), Group> = BTreeMap::new();

    for event in events {
        if !matches(&**event) {
            continue;
        }
        hub.observe(event, 0);
        let key = group_key(event, options.grouping);
        if hierarchical {
            let category = event.category();
            categories.entry(category).or_default().observe(event, keep);
            leaves.entry((category, key)).or_default().observe(event, keep);
        } else {
            leaves.entry(("", key)).or_default().observe(event, keep);
        }
    }

    let mut nodes = Vec::with_capacity(1 + categories.len() + leaves.len());
    let mut edges = Vec::with_capacity(categories.len() + leaves.len());

    nodes.push(hub.node(HUB_ID.to_string(), "gateway".to_string(), NodeKind::Hub));

    for (category, group) in categories.iter_mut() {
        let id = category_id(category);
        edges.push(group.edge(HUB_ID, &id));
        nodes.push(group.node(id, category.to_string(), NodeKind::Category));
    }

    for ((category, key), group) in leaves.iter_mut() {
        let (id, parent) = if hierarchical {
            (format!("{}:{}", category, key), category_id(category))
        } else {
            (key.to_string(), HUB_ID.to_string())
        };
        edges.push(group.edge(&parent, &id));
        nodes.push(group.node(id, key.to_string(), NodeKind::Endpoint));
    }

    TopologySnapshot {
        nodes,
        edges,
        event_count: hub.count as usize,
    }
}
