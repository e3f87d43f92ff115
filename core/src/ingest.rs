// Event ingestion and batching
//
// Coalesces high-frequency event messages into bounded batches. A batch is
// released when it reaches `batch_size` or when the flush deadline passes,
// whichever comes first. The deadline is armed when the first event lands in
// an empty queue and cleared on flush; enqueueing never pushes it back.

use crate::config::IngestConfig;
use crate::event::{Event, SharedEvent};
use crate::protocol::InboundMessage;
use crate::stats::StatsSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// An ordered group of events committed together
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    events: Vec<SharedEvent>,
}

impl Batch {
    pub fn new(events: Vec<SharedEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[SharedEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<SharedEvent> {
        self.events
    }
}

impl FromIterator<Event> for Batch {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Arc::new).collect())
    }
}

/// Pending-event queue with size and time bounds
pub struct Batcher {
    pending: Vec<SharedEvent>,
    batch_size: usize,
    flush_interval: Duration,
    deadline: Option<Instant>,
    stats: Arc<dyn StatsSink>,
}

impl Batcher {
    pub fn new(config: &IngestConfig, stats: Arc<dyn StatsSink>) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size,
            flush_interval: config.flush_interval,
            deadline: None,
            stats,
        }
    }

    /// Classify one message.
    ///
    /// Events are queued and a full batch is returned once the size threshold
    /// is reached. Statistics go straight to the sink. Everything else is
    /// dropped.
    pub fn on_message(&mut self, message: &InboundMessage, now: Instant) -> Option<Batch> {
        match message {
            InboundMessage::TrafficEvent { event } | InboundMessage::PtyEvent { event } => {
                self.enqueue(Arc::new(event.clone()), now)
            }
            InboundMessage::StatsUpdate { stats } => {
                self.stats.publish(stats.clone());
                None
            }
            other => {
                trace!(kind = other.kind(), "Message not batched");
                None
            }
        }
    }

    pub fn enqueue(&mut self, event: SharedEvent, now: Instant) -> Option<Batch> {
        if self.pending.is_empty() && self.deadline.is_none() {
            self.deadline = Some(now + self.flush_interval);
        }
        self.pending.push(event);
        if self.pending.len() >= self.batch_size {
            return self.flush();
        }
        None
    }

    /// When the pending queue must be flushed regardless of size
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Flush if the deadline has passed
    pub fn flush_due(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush(),
            _ => None,
        }
    }

    /// Release everything pending as one batch
    pub fn flush(&mut self) -> Option<Batch> {
        self.deadline = None;
        if self.pending.is_empty() {
            return None;
        }
        let events = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        trace!(count = events.len(), "Flushing batch");
        Some(Batch::new(events))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::stats::{AggregateStats, LatestStats};

    fn batcher(size: usize, interval_ms: u64) -> (Batcher, Arc<LatestStats>) {
        let stats = Arc::new(LatestStats::new());
        let config = IngestConfig {
            batch_size: size,
            flush_interval: Duration::from_millis(interval_ms),
        };
        (Batcher::new(&config, stats.clone()), stats)
    }

    fn traffic(id: &str) -> InboundMessage {
        InboundMessage::TrafficEvent {
            event: Event::new(id, EventKind::Request, 0, "/api"),
        }
    }

    #[test]
    fn flushes_on_size_threshold() {
        let (mut batcher, _) = batcher(3, 1_000);
        let now = Instant::now();
        assert!(batcher.on_message(&traffic("a"), now).is_none());
        assert!(batcher.on_message(&traffic("b"), now).is_none());
        let batch = batcher.on_message(&traffic("c"), now).expect("full batch");
        let ids: Vec<_> = batch.events().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(batcher.pending_len(), 0);
        assert!(batcher.deadline().is_none());
    }

    #[test]
    fn deadline_is_not_pushed_back_by_enqueue() {
        let (mut batcher, _) = batcher(100, 50);
        let start = Instant::now();
        batcher.on_message(&traffic("a"), start);
        let deadline = batcher.deadline().expect("armed");
        assert_eq!(deadline, start + Duration::from_millis(50));

        batcher.on_message(&traffic("b"), start + Duration::from_millis(40));
        assert_eq!(batcher.deadline(), Some(deadline));

        assert!(batcher.flush_due(start + Duration::from_millis(49)).is_none());
        let batch = batcher.flush_due(start + Duration::from_millis(50)).expect("due");
        assert_eq!(batch.len(), 2);
        assert!(batcher.deadline().is_none());
    }

    #[test]
    fn stats_bypass_batching() {
        let (mut batcher, sink) = batcher(10, 100);
        let message = InboundMessage::StatsUpdate {
            stats: AggregateStats {
                requests_per_second: 12.0,
                ..Default::default()
            },
        };
        assert!(batcher.on_message(&message, Instant::now()).is_none());
        assert_eq!(batcher.pending_len(), 0);
        assert_eq!(sink.latest().map(|s| s.requests_per_second), Some(12.0));
    }

    #[test]
    fn other_messages_are_dropped() {
        let (mut batcher, _) = batcher(1, 100);
        for message in [
            InboundMessage::Ping,
            InboundMessage::Pong,
            InboundMessage::Connected,
            InboundMessage::Unknown,
        ] {
            assert!(batcher.on_message(&message, Instant::now()).is_none());
        }
        assert_eq!(batcher.pending_len(), 0);
        assert!(batcher.deadline().is_none());
    }
}
