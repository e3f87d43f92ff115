mod config;
use config::FlowWatchConfig;
use flowscope_core::connection::{ConnectionRegistry, WebSocketTransport};
use flowscope_core::stats::LatestStats;
use flowscope_core::telemetry::init_tracing;
use flowscope_core::{Flowscope, RocksArchiveStore};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing (RUST_LOG overrides)
    init_tracing();

    let cfg = FlowWatchConfig::load();
    cfg.core.validate()?;
    info!(
        target = "flow_watch",
        topic = %cfg.topic,
        gateway = %cfg.core.connection.base_url,
        "Starting flow watcher"
    );

    // One shared connection per topic
    let registry = ConnectionRegistry::new(cfg.core.connection.clone(), Arc::new(WebSocketTransport));
    let subscription = registry.acquire(&cfg.topic);
    if let Some(filters) = cfg.server_filters.clone() {
        subscription.manager().set_server_filters(filters)?;
    }

    let stats = Arc::new(LatestStats::new());
    let mut pipeline = Flowscope::new(cfg.core.clone())
        .with_stats(stats.clone())
        .with_metrics(Arc::clone(registry.metrics()));
    if let Some(path) = &cfg.core.buffer.archive_path {
        let store = RocksArchiveStore::open(path)?;
        info!(target = "flow_watch", path = %path.display(), "Archiving evicted events");
        pipeline = pipeline.with_archive(store);
    }
    let handle = pipeline.start(subscription);

    let mut report = tokio::time::interval(cfg.report_interval);
    let mut connection = handle.watch_connection();
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(target = "flow_watch", error = %e, "Ctrl+C handler failed");
                }
                info!(target = "flow_watch", "Shutting down...");
                break;
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = connection.borrow_and_update().clone();
                info!(target = "flow_watch", ?state, "Connection state");
            }
            _ = report.tick() => {
                let topology = handle.topology();
                let layout = handle.layout();
                let metrics = handle.metrics();
                info!(
                    target = "flow_watch",
                    buffered = handle.events().len(),
                    nodes = topology.nodes.len(),
                    edges = topology.edges.len(),
                    phase = ?layout.phase,
                    speed = layout.total_speed,
                    ingested = metrics.events_ingested,
                    archived = metrics.events_archived,
                    reconnects = metrics.reconnects,
                    "Status"
                );
                if let Some(latest) = stats.latest() {
                    info!(
                        target = "flow_watch",
                        rps = latest.requests_per_second,
                        avg_latency_ms = latest.avg_latency_ms,
                        error_rate = latest.error_rate,
                        "Gateway stats"
                    );
                }
                for edge in topology.edges.iter().filter(|e| e.error_count > 0) {
                    warn!(
                        target = "flow_watch",
                        target_node = %edge.target,
                        errors = edge.error_count,
                        status = ?edge.status,
                        "Edge reporting errors"
                    );
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}
