// Debounced rebuild scheduling
//
// Bursts of batches collapse into one projection. A stream that never goes
// quiet is still rebuilt once `max_wait` has passed since the first pending
// request.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RebuildState {
    Idle,
    Pending { deadline: Instant, first_requested: Instant },
}

#[derive(Debug)]
pub struct RebuildScheduler {
    debounce: Duration,
    max_wait: Duration,
    state: RebuildState,
}

impl RebuildScheduler {
    pub fn new(debounce: Duration, max_wait: Duration) -> Self {
        Self {
            debounce,
            max_wait: max_wait.max(debounce),
            state: RebuildState::Idle,
        }
    }

    /// Buffer or filters changed; push the deadline out by one debounce window
    pub fn note_activity(&mut self, now: Instant) {
        let first_requested = match self.state {
            RebuildState::Idle => now,
            RebuildState::Pending { first_requested, .. } => first_requested,
        };
        let deadline = (now + self.debounce).min(first_requested + self.max_wait);
        self.state = RebuildState::Pending {
            deadline,
            first_requested,
        };
    }

    /// Request a rebuild on the next poll
    pub fn request_now(&mut self, now: Instant) {
        let first_requested = match self.state {
            RebuildState::Idle => now,
            RebuildState::Pending { first_requested, .. } => first_requested,
        };
        self.state = RebuildState::Pending {
            deadline: now,
            first_requested,
        };
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            RebuildState::Idle => None,
            RebuildState::Pending { deadline, .. } => Some(deadline),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, RebuildState::Pending { .. })
    }

    /// True when a pending rebuild is due. Clears the pending state.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            RebuildState::Pending { deadline, .. } if now >= deadline => {
                self.state = RebuildState::Idle;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_collapses_into_one_rebuild() {
        let start = Instant::now();
        let mut scheduler = RebuildScheduler::new(ms(250), ms(2_000));

        let mut rebuilds = 0;
        for i in 0..50 {
            let now = start + ms(i * 10);
            scheduler.note_activity(now);
            if scheduler.poll(now) {
                rebuilds += 1;
            }
        }
        assert_eq!(rebuilds, 0);
        assert_eq!(scheduler.deadline(), Some(start + ms(490 + 250)));

        assert!(!scheduler.poll(start + ms(739)));
        assert!(scheduler.poll(start + ms(740)));
        assert!(!scheduler.is_pending());
        assert!(!scheduler.poll(start + ms(10_000)));
    }

    #[test]
    fn sustained_stream_is_capped_by_max_wait() {
        let start = Instant::now();
        let mut scheduler = RebuildScheduler::new(ms(250), ms(1_000));
        for i in 0..100 {
            scheduler.note_activity(start + ms(i * 100));
            if scheduler.poll(start + ms(i * 100)) {
                assert_eq!(i, 10);
                return;
            }
        }
        panic!("max_wait never forced a rebuild");
    }

    #[test]
    fn request_now_is_immediately_due() {
        let now = Instant::now();
        let mut scheduler = RebuildScheduler::new(ms(250), ms(1_000));
        scheduler.request_now(now);
        assert!(scheduler.poll(now));
    }
}
