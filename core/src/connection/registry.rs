use super::manager::{ConnectionManager, Subscription};
use super::transport::Transport;
use crate::config::ConnectionConfig;
use crate::telemetry::PipelineMetrics;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Process-wide map of topic to its one shared connection.
///
/// Constructed explicitly and passed to whoever needs a stream; there is no
/// hidden global.
pub struct ConnectionRegistry {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<PipelineMetrics>,
    managers: DashMap<String, Arc<ConnectionManager>>,
}

impl ConnectionRegistry {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_metrics(config, transport, PipelineMetrics::shared())
    }

    pub fn with_metrics(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            config,
            transport,
            metrics,
            managers: DashMap::new(),
        }
    }

    /// Subscribe to `topic`, creating its connection on first use
    pub fn acquire(&self, topic: &str) -> Subscription {
        // Subscribe while holding the entry so a concurrent release cannot
        // evict the manager in between.
        let entry = self.managers.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic, "Creating connection manager");
            ConnectionManager::new(
                topic,
                self.config.clone(),
                Arc::clone(&self.transport),
                Arc::clone(&self.metrics),
            )
        });
        entry.value().subscribe()
    }

    /// Release a subscription; drops the manager once nobody uses it
    pub fn release(&self, subscription: Subscription) {
        let topic = subscription.topic().to_string();
        subscription.unsubscribe();
        if self
            .managers
            .remove_if(&topic, |_, manager| manager.subscriber_count() == 0)
            .is_some()
        {
            debug!(topic = %topic, "Connection manager removed");
        }
    }

    /// Live manager for `topic`. A manager whose last subscription was
    /// dropped without `release` is pruned here.
    pub fn get(&self, topic: &str) -> Option<Arc<ConnectionManager>> {
        if self
            .managers
            .remove_if(topic, |_, manager| manager.subscriber_count() == 0)
            .is_some()
        {
            debug!(topic, "Pruned idle connection manager");
        }
        self.managers.get(topic).map(|entry| Arc::clone(entry.value()))
    }

    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .managers
            .iter()
            .filter(|entry| entry.value().subscriber_count() > 0)
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }
}
