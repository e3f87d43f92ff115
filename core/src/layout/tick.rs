// Animation tick sources
//
// The engine has no notion of wall time; something outside it decides when a
// frame happens. `IntervalTicks` drives a live view, `ManualTicks` lets tests
// step frames explicitly.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Interval, MissedTickBehavior};

#[async_trait]
pub trait TickSource: Send {
    /// Wait for the next frame; `None` once the source is exhausted
    async fn next_tick(&mut self) -> Option<u64>;
}

/// Fixed-rate frames. Missed frames are skipped rather than bunched.
pub struct IntervalTicks {
    interval: Interval,
    frame: u64,
}

impl IntervalTicks {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, frame: 0 }
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn next_tick(&mut self) -> Option<u64> {
        self.interval.tick().await;
        self.frame += 1;
        Some(self.frame)
    }
}

/// Frames issued on demand through a [`ManualTickHandle`]
pub struct ManualTicks {
    rx: mpsc::UnboundedReceiver<()>,
    frame: u64,
}

#[derive(Clone)]
pub struct ManualTickHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicks {
    pub fn new() -> (Self, ManualTickHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx, frame: 0 }, ManualTickHandle { tx })
    }
}

impl ManualTickHandle {
    /// Returns false once the tick source has been dropped
    pub fn tick(&self) -> bool {
        self.tx.send(()).is_ok()
    }

    pub fn tick_n(&self, frames: usize) -> bool {
        (0..frames).all(|_| self.tick())
    }
}

#[async_trait]
impl TickSource for ManualTicks {
    async fn next_tick(&mut self) -> Option<u64> {
        self.rx.recv().await?;
        self.frame += 1;
        Some(self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_ticks_count_frames() {
        let (mut ticks, handle) = ManualTicks::new();
        assert!(handle.tick_n(3));
        assert_eq!(ticks.next_tick().await, Some(1));
        assert_eq!(ticks.next_tick().await, Some(2));
        assert_eq!(ticks.next_tick().await, Some(3));
        drop(handle);
        assert_eq!(ticks.next_tick().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticks_advance_with_time() {
        let mut ticks = IntervalTicks::new(Duration::from_millis(16));
        assert_eq!(ticks.next_tick().await, Some(1));
        assert_eq!(ticks.next_tick().await, Some(2));
    }
}
