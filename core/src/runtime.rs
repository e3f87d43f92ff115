// Pipeline runtime
//
// One task owns the batcher, buffer, rebuild scheduler and layout engine, and
// interleaves stream messages, flush and rebuild deadlines, animation ticks
// and control commands on a single `select!` loop. Readers observe immutable
// snapshots through watch channels.

use crate::buffer::{ArchiveStore, EventBuffer};
use crate::config::FlowscopeConfig;
use crate::connection::{ConnectionManager, ConnectionState, Subscription};
use crate::event::SharedEvent;
use crate::ingest::{Batch, Batcher};
use crate::layout::{IntervalTicks, LayoutEngine, LayoutFrame, TickSource};
use crate::stats::{LatestStats, StatsSink};
use crate::telemetry::{MetricsSnapshot, PipelineMetrics};
use crate::topology::{
    project, FilterState, GroupingMode, LayoutMode, ProjectionOptions, RebuildScheduler,
    TopologySnapshot,
};
use crate::{FlowscopeError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

enum Command {
    SetFilters(FilterState),
    SetLayoutMode(LayoutMode),
    SetGrouping(GroupingMode),
    Rebuild,
    Clear,
    History(oneshot::Sender<Result<Vec<SharedEvent>>>),
    Shutdown(oneshot::Sender<()>),
}

/// Builder for a running pipeline
pub struct Flowscope {
    config: FlowscopeConfig,
    archive: Option<Arc<dyn ArchiveStore>>,
    ticks: Option<Box<dyn TickSource>>,
    stats: Arc<dyn StatsSink>,
    metrics: Arc<PipelineMetrics>,
}

impl Flowscope {
    pub fn new(config: FlowscopeConfig) -> Self {
        Self {
            config,
            archive: None,
            ticks: None,
            stats: Arc::new(LatestStats::new()),
            metrics: PipelineMetrics::shared(),
        }
    }

    /// Archive evicted events to `store` instead of discarding them
    pub fn with_archive(mut self, store: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(store);
        self
    }

    /// Drive layout frames from `ticks`; defaults to the configured frame interval
    pub fn with_ticks(mut self, ticks: impl TickSource + 'static) -> Self {
        self.ticks = Some(Box::new(ticks));
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawn the pipeline task consuming `subscription`. Must be called
    /// inside a tokio runtime.
    #[tracing::instrument(skip(self, subscription), fields(topic = %subscription.topic()))]
    pub fn start(self, subscription: Subscription) -> FlowscopeHandle {
        let Flowscope {
            config,
            archive,
            ticks,
            stats,
            metrics,
        } = self;

        let buffer = match archive {
            Some(store) => EventBuffer::with_archive(&config.buffer, store, Arc::clone(&metrics)),
            None => EventBuffer::new(&config.buffer, Arc::clone(&metrics)),
        };
        let ticks = ticks.unwrap_or_else(|| Box::new(IntervalTicks::new(config.layout.frame_interval)));

        let (topology_tx, topology_rx) = watch::channel(Arc::new(TopologySnapshot::default()));
        let (layout_tx, layout_rx) = watch::channel(Arc::new(LayoutFrame::default()));
        let (events_tx, events_rx) = watch::channel(buffer.get_all());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let manager = Arc::clone(subscription.manager());
        let connection = manager.watch_state();

        let pipeline = Pipeline {
            batcher: Batcher::new(&config.ingest, stats),
            buffer,
            filters: FilterState::default(),
            options: ProjectionOptions::from(&config.projection),
            rebuild: RebuildScheduler::new(config.projection.debounce, config.projection.max_wait),
            engine: LayoutEngine::new(&config.layout),
            topology_tx,
            layout_tx,
            events_tx,
            metrics: Arc::clone(&metrics),
        };
        let task = tokio::spawn(pipeline.run(subscription, ticks, commands_rx));
        info!("Pipeline started");

        FlowscopeHandle {
            commands: commands_tx,
            topology: topology_rx,
            layout: layout_rx,
            events: events_rx,
            connection,
            manager,
            metrics,
            task,
        }
    }
}

struct Pipeline {
    batcher: Batcher,
    buffer: EventBuffer,
    filters: FilterState,
    options: ProjectionOptions,
    rebuild: RebuildScheduler,
    engine: LayoutEngine,
    topology_tx: watch::Sender<Arc<TopologySnapshot>>,
    layout_tx: watch::Sender<Arc<LayoutFrame>>,
    events_tx: watch::Sender<Arc<Vec<SharedEvent>>>,
    metrics: Arc<PipelineMetrics>,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Pipeline {
    async fn run(
        mut self,
        mut subscription: Subscription,
        mut ticks: Box<dyn TickSource>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut ticking = true;
        loop {
            let flush_at = self.batcher.deadline();
            let rebuild_at = self.rebuild.deadline();

            // Deadlines and frames are polled before the stream
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.drain().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.apply(command).await,
                    None => {
                        self.drain().await;
                        break;
                    }
                },
                _ = sleep_until(flush_at) => {
                    if let Some(batch) = self.batcher.flush_due(Instant::now()) {
                        self.commit(batch);
                    }
                }
                _ = sleep_until(rebuild_at) => {
                    if self.rebuild.poll(Instant::now()) {
                        self.rebuild_topology();
                    }
                }
                frame = ticks.next_tick(), if ticking => match frame {
                    Some(_) => self.animate(),
                    None => {
                        debug!("Tick source exhausted; layout paused");
                        ticking = false;
                    }
                },
                message = subscription.next_message() => match message {
                    Some(message) => {
                        if let Some(batch) = self.batcher.on_message(&message, Instant::now()) {
                            self.commit(batch);
                        }
                    }
                    None => {
                        warn!(topic = %subscription.topic(), "Message stream closed");
                        self.drain().await;
                        break;
                    }
                },
            }
        }
        info!(topic = %subscription.topic(), "Pipeline stopped");
    }

    async fn apply(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::SetFilters(filters) => {
                debug!(?filters, "Filters changed");
                self.filters = filters;
                self.rebuild.request_now(now);
            }
            Command::SetLayoutMode(layout) => {
                if self.options.layout != layout {
                    info!(?layout, "Layout mode changed");
                    self.options.layout = layout;
                    self.engine.reset();
                }
                self.rebuild.request_now(now);
            }
            Command::SetGrouping(grouping) => {
                if self.options.grouping != grouping {
                    info!(?grouping, "Grouping mode changed");
                    self.options.grouping = grouping;
                    self.engine.reset();
                }
                self.rebuild.request_now(now);
            }
            Command::Rebuild => self.rebuild.request_now(now),
            Command::Clear => {
                let _ = self.batcher.flush();
                self.buffer.clear();
                self.events_tx.send_replace(self.buffer.get_all());
                self.rebuild.request_now(now);
            }
            Command::History(reply) => {
                self.buffer.flush_archive().await;
                let _ = reply.send(self.buffer.history().await);
            }
            Command::Shutdown(_) => {}
        }
    }

    fn commit(&mut self, batch: Batch) {
        let count = batch.len();
        self.metrics.record_batch(count);
        let evicted = self.buffer.append(batch);
        self.events_tx.send_replace(self.buffer.get_all());
        self.rebuild.note_activity(Instant::now());
        debug!(count, evicted, buffered = self.buffer.len(), "Batch committed");
    }

    fn rebuild_topology(&mut self) {
        let events = self.buffer.get_all();
        let snapshot = project(&events, &self.filters, &self.options);
        self.metrics.record_rebuild();
        let reloaded = self.engine.load(&snapshot);
        debug!(
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            events = snapshot.event_count,
            reloaded,
            "Topology rebuilt"
        );
        if reloaded {
            self.layout_tx.send_replace(Arc::new(self.engine.snapshot()));
        }
        self.topology_tx.send_if_modified(|current| {
            if **current == snapshot {
                false
            } else {
                *current = Arc::new(snapshot);
                true
            }
        });
    }

    fn animate(&mut self) {
        if self.engine.tick() > 0 {
            self.layout_tx.send_replace(Arc::new(self.engine.snapshot()));
        }
    }

    /// Commit anything pending and wait for outstanding archive writes
    async fn drain(&mut self) {
        if let Some(batch) = self.batcher.flush() {
            self.commit(batch);
        }
        self.buffer.flush_archive().await;
    }
}

/// Control and observation surface of a running pipeline
pub struct FlowscopeHandle {
    commands: mpsc::UnboundedSender<Command>,
    topology: watch::Receiver<Arc<TopologySnapshot>>,
    layout: watch::Receiver<Arc<LayoutFrame>>,
    events: watch::Receiver<Arc<Vec<SharedEvent>>>,
    connection: watch::Receiver<ConnectionState>,
    manager: Arc<ConnectionManager>,
    metrics: Arc<PipelineMetrics>,
    task: JoinHandle<()>,
}

impl FlowscopeHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| FlowscopeError::ChannelClosed("pipeline stopped".to_string()))
    }

    /// Latest topology snapshot
    pub fn topology(&self) -> Arc<TopologySnapshot> {
        Arc::clone(&self.topology.borrow())
    }

    pub fn watch_topology(&self) -> watch::Receiver<Arc<TopologySnapshot>> {
        self.topology.clone()
    }

    /// Latest node positions
    pub fn layout(&self) -> Arc<LayoutFrame> {
        Arc::clone(&self.layout.borrow())
    }

    pub fn watch_layout(&self) -> watch::Receiver<Arc<LayoutFrame>> {
        self.layout.clone()
    }

    /// Live buffer contents in arrival order
    pub fn events(&self) -> Arc<Vec<SharedEvent>> {
        Arc::clone(&self.events.borrow())
    }

    pub fn watch_events(&self) -> watch::Receiver<Arc<Vec<SharedEvent>>> {
        self.events.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Manual reconnect, e.g. after the manager gave up
    pub fn reconnect(&self) {
        self.manager.reconnect();
    }

    pub fn set_filters(&self, filters: FilterState) -> Result<()> {
        self.send(Command::SetFilters(filters))
    }

    pub fn set_layout_mode(&self, layout: LayoutMode) -> Result<()> {
        self.send(Command::SetLayoutMode(layout))
    }

    pub fn set_grouping(&self, grouping: GroupingMode) -> Result<()> {
        self.send(Command::SetGrouping(grouping))
    }

    /// Rebuild the topology now instead of waiting for the debounce
    pub fn rebuild(&self) -> Result<()> {
        self.send(Command::Rebuild)
    }

    /// Empty the buffer and wipe the archive
    pub fn clear(&self) -> Result<()> {
        self.send(Command::Clear)
    }

    /// Archived records oldest-first followed by the live buffer
    pub async fn history(&self) -> Result<Vec<SharedEvent>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::History(reply))?;
        response
            .await
            .map_err(|_| FlowscopeError::ChannelClosed("pipeline stopped".to_string()))?
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Flush pending events and archive writes, then stop the pipeline.
    /// Releases the stream subscription.
    pub async fn shutdown(self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.send(Command::Shutdown(done))?;
        let _ = wait.await;
        self.task
            .await
            .map_err(|e| FlowscopeError::ChannelClosed(format!("pipeline task failed: {}", e)))
    }
}
