// Aggregate statistics sink
//
// `stats_update` messages bypass batching and land here immediately.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Aggregate statistics computed by the gateway
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    #[serde(default)]
    pub requests_per_second: f64,
    #[serde(default)]
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub total_count: u64,
}

/// Receiver of aggregate statistics
pub trait StatsSink: Send + Sync {
    fn publish(&self, stats: AggregateStats);
}

/// Keeps the most recent statistics and notifies watchers
pub struct LatestStats {
    sender: watch::Sender<Option<AggregateStats>>,
}

impl LatestStats {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Most recent statistics, if any arrived yet
    pub fn latest(&self) -> Option<AggregateStats> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<AggregateStats>> {
        self.sender.subscribe()
    }
}

impl Default for LatestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSink for LatestStats {
    fn publish(&self, stats: AggregateStats) {
        self.sender.send_replace(Some(stats));
    }
}
