use super::backoff::ReconnectPolicy;
use super::transport::{Link, Transport};
use crate::config::ConnectionConfig;
use crate::protocol::{parse_inbound, InboundMessage, OutboundMessage, SubscriptionFilters};
use crate::telemetry::PipelineMetrics;
use crate::{FlowscopeError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const STATE_CAPACITY: usize = 64;

/// Lifecycle of a topic connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Dialing or awaiting verification; never broadcast
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Retry budget exhausted; waits for a manual reconnect
    Failed,
}

enum Command {
    Send(String),
    Reconnect,
}

enum LinkExit {
    Closed,
    Restart,
    Shutdown,
}

enum WaitExit {
    Elapsed,
    Restart,
    Shutdown,
}

struct Shared {
    topic: String,
    url: String,
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    current: watch::Sender<ConnectionState>,
    notify: broadcast::Sender<ConnectionState>,
    messages: broadcast::Sender<Arc<InboundMessage>>,
    filters: Mutex<Option<SubscriptionFilters>>,
    metrics: Arc<PipelineMetrics>,
}

impl Shared {
    /// Record a state without telling subscribers
    fn set_state(&self, next: ConnectionState) {
        self.current.send_replace(next);
    }

    /// Record a state and broadcast it once if it changed
    fn transition(&self, next: ConnectionState) {
        let previous = self.current.send_replace(next.clone());
        if previous != next {
            debug!(topic = %self.topic, state = ?next, "Connection state changed");
            let _ = self.notify.send(next);
        }
    }

    fn state(&self) -> ConnectionState {
        self.current.borrow().clone()
    }

    fn filters(&self) -> Option<SubscriptionFilters> {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn send_message(&self, link: &Link, message: &OutboundMessage) -> Result<()> {
        link.send(message.encode()?).await
    }

    async fn handle_frame(&self, link: &Link, text: &str) -> Result<()> {
        self.metrics.record_message();
        let message = match parse_inbound(text) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_parse_failure();
                warn!(topic = %self.topic, error = %e, "Dropping malformed frame");
                return Ok(());
            }
        };

        match &message {
            InboundMessage::Ping => self.send_message(link, &OutboundMessage::Pong).await?,
            InboundMessage::Connected => info!(topic = %self.topic, "Gateway acknowledged connection"),
            InboundMessage::Unknown => debug!(topic = %self.topic, "Ignoring unrecognized message type"),
            _ => {}
        }

        // Broadcast fans out to every receiver within this call
        let _ = self.messages.send(Arc::new(message));
        Ok(())
    }
}

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Owns the single stream connection for one topic.
///
/// Reference counted by its subscribers: the first `subscribe` dials, the last
/// release tears the connection down and cancels any pending retry.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
    subscribers: AtomicUsize,
}

impl ConnectionManager {
    pub fn new(
        topic: impl Into<String>,
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<PipelineMetrics>,
    ) -> Arc<Self> {
        let topic = topic.into();
        let (current, _) = watch::channel(ConnectionState::Disconnected);
        let (notify, _) = broadcast::channel(STATE_CAPACITY);
        let (messages, _) = broadcast::channel(config.message_capacity.max(1));

        Arc::new(Self {
            shared: Arc::new(Shared {
                url: config.endpoint_for(&topic),
                topic,
                config,
                transport,
                current,
                notify,
                messages,
                filters: Mutex::new(None),
                metrics,
            }),
            running: Mutex::new(None),
            subscribers: AtomicUsize::new(0),
        })
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Current state plus every later change, coalesced
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.current.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Whether a supervisor task currently owns (or is re-establishing) the link
    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Register a subscriber; the first one opens the connection
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let states = self.shared.notify.subscribe();
        let messages = self.shared.messages.subscribe();
        let previous = self.subscribers.fetch_add(1, Ordering::SeqCst);
        info!(topic = %self.shared.topic, subscribers = previous + 1, "Subscriber added");
        if previous == 0 {
            self.connect();
        }
        Subscription {
            manager: Arc::clone(self),
            states,
            messages,
            active: true,
        }
    }

    fn release(&self) {
        let previous = self
            .subscribers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        info!(topic = %self.shared.topic, subscribers = previous.saturating_sub(1), "Subscriber released");
        if previous == 1 {
            self.disconnect();
        }
    }

    /// Start the supervisor if it is not already running
    pub fn connect(&self) {
        let mut running = self.lock_running();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return;
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(supervise(Arc::clone(&self.shared), rx));
        *running = Some(Running { commands, task });
        info!(topic = %self.shared.topic, url = %self.shared.url, "Connection supervisor started");
    }

    /// Close the connection and cancel any pending reconnect
    pub fn disconnect(&self) {
        if let Some(running) = self.lock_running().take() {
            running.task.abort();
            info!(topic = %self.shared.topic, "Connection torn down");
        }
        self.shared.transition(ConnectionState::Disconnected);
    }

    /// Manual reconnect: drop the current link (or pending wait) and dial now
    /// with a fresh retry budget.
    pub fn reconnect(&self) {
        let alive = {
            let running = self.lock_running();
            match running.as_ref() {
                Some(r) if !r.task.is_finished() => r.commands.send(Command::Reconnect).is_ok(),
                _ => false,
            }
        };
        if !alive {
            self.connect();
        }
    }

    /// Send a message over the verified connection
    pub fn send(&self, message: &OutboundMessage) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(FlowscopeError::Transport(format!(
                "topic {} is not connected",
                self.shared.topic
            )));
        }
        let text = message.encode()?;
        let running = self.lock_running();
        let running = running
            .as_ref()
            .ok_or_else(|| FlowscopeError::Transport("connection not running".into()))?;
        running
            .commands
            .send(Command::Send(text))
            .map_err(|_| FlowscopeError::ChannelClosed("connection supervisor".into()))
    }

    /// Scope server-side delivery. Re-sent automatically after every reconnect.
    pub fn set_server_filters(&self, filters: SubscriptionFilters) -> Result<()> {
        *self
            .shared
            .filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(filters.clone());
        if self.state() == ConnectionState::Connected {
            self.send(&OutboundMessage::Subscribe { filters })?;
        }
        Ok(())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(running) = self.lock_running().take() {
            running.task.abort();
        }
    }
}

async fn supervise(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let config = &shared.config;
    let mut policy = ReconnectPolicy::new(
        config.reconnect_base,
        config.reconnect_max,
        config.max_reconnect_attempts,
    );

    loop {
        shared.set_state(ConnectionState::Connecting);
        match shared.transport.connect(&shared.url).await {
            Ok(link) => {
                debug!(topic = %shared.topic, "Link opened; awaiting verification");
                match run_link(&shared, link, &mut commands, &mut policy).await {
                    LinkExit::Shutdown => return,
                    LinkExit::Restart => {
                        // A verified link going away is a close, even when we dropped it
                        if shared.state() == ConnectionState::Connected {
                            shared.transition(ConnectionState::Disconnected);
                        }
                        policy.reset();
                        continue;
                    }
                    LinkExit::Closed => {}
                }
            }
            Err(e) => {
                warn!(topic = %shared.topic, error = %e, "Connection attempt failed");
            }
        }

        match policy.next_delay() {
            Some(delay) => {
                shared.metrics.record_reconnect();
                shared.transition(ConnectionState::Reconnecting {
                    attempt: policy.attempt(),
                    delay,
                });
                info!(topic = %shared.topic, attempt = policy.attempt(), delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                match wait_for_retry(delay, &mut commands).await {
                    WaitExit::Elapsed => {}
                    WaitExit::Restart => policy.reset(),
                    WaitExit::Shutdown => return,
                }
            }
            None => {
                shared.transition(ConnectionState::Failed);
                error!(topic = %shared.topic, attempts = policy.attempt(), "Reconnect attempts exhausted; waiting for manual reconnect");
                loop {
                    match commands.recv().await {
                        Some(Command::Reconnect) => {
                            policy.reset();
                            break;
                        }
                        Some(Command::Send(_)) => {
                            warn!(topic = %shared.topic, "Dropping outbound message while failed")
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

async fn run_link(
    shared: &Shared,
    mut link: Link,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    policy: &mut ReconnectPolicy,
) -> LinkExit {
    if let Some(filters) = shared.filters() {
        if let Err(e) = shared
            .send_message(&link, &OutboundMessage::Subscribe { filters })
            .await
        {
            warn!(topic = %shared.topic, error = %e, "Failed to send subscribe filters");
            return LinkExit::Closed;
        }
    }

    let verify = tokio::time::sleep(shared.config.verify_delay);
    tokio::pin!(verify);
    let mut verified = false;

    let ping_interval = shared.config.ping_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut verify, if !verified => {
                if link.is_open() {
                    verified = true;
                    policy.reset();
                    shared.transition(ConnectionState::Connected);
                    info!(topic = %shared.topic, "Connection verified");
                } else {
                    warn!(topic = %shared.topic, "Connection failed verification");
                    return LinkExit::Closed;
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = shared.send_message(&link, &OutboundMessage::Ping).await {
                    warn!(topic = %shared.topic, error = %e, "Keepalive ping failed");
                    return LinkExit::Closed;
                }
            }
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = link.send(text).await {
                        warn!(topic = %shared.topic, error = %e, "Outbound send failed");
                        return LinkExit::Closed;
                    }
                }
                Some(Command::Reconnect) => {
                    info!(topic = %shared.topic, "Manual reconnect requested");
                    return LinkExit::Restart;
                }
                None => return LinkExit::Shutdown,
            },
            frame = link.recv() => match frame {
                Some(text) => {
                    if let Err(e) = shared.handle_frame(&link, &text).await {
                        warn!(topic = %shared.topic, error = %e, "Reply failed");
                        return LinkExit::Closed;
                    }
                }
                None => {
                    info!(topic = %shared.topic, "Connection closed");
                    return LinkExit::Closed;
                }
            },
        }
    }
}

async fn wait_for_retry(delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> WaitExit {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return WaitExit::Elapsed,
            command = commands.recv() => match command {
                Some(Command::Reconnect) => return WaitExit::Restart,
                Some(Command::Send(_)) => warn!("Dropping outbound message while reconnecting"),
                None => return WaitExit::Shutdown,
            },
        }
    }
}

/// A live handle on a topic connection.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) releases the
/// reference; the last release closes the connection.
pub struct Subscription {
    manager: Arc<ConnectionManager>,
    states: broadcast::Receiver<ConnectionState>,
    messages: broadcast::Receiver<Arc<InboundMessage>>,
    active: bool,
}

impl Subscription {
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn topic(&self) -> &str {
        self.manager.topic()
    }

    /// Next parsed message. Skips over anything lost to lag.
    pub async fn next_message(&mut self) -> Option<Arc<InboundMessage>> {
        loop {
            match self.messages.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.manager.topic(), skipped, "Subscriber lagging; messages dropped")
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next broadcast state transition
    pub async fn next_state(&mut self) -> Option<ConnectionState> {
        loop {
            match self.states.recv().await {
                Ok(state) => return Some(state),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// A pending state transition, without waiting
    pub fn try_next_state(&mut self) -> Option<ConnectionState> {
        loop {
            match self.states.try_recv() {
                Ok(state) => return Some(state),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.manager.release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
