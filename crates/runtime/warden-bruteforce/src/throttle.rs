//! Progress throttle
//!
//! Non-blocking: a report that arrives too early is dropped, never delayed.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True if a report may go out now. Records the report time when it does.
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Count a report sent outside the throttle
    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_within_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(1));
        let start = Instant::now();
        assert!(throttle.ready_at(start));
        assert!(!throttle.ready_at(start + Duration::from_millis(10)));
        assert!(!throttle.ready_at(start + Duration::from_millis(999)));
        assert!(throttle.ready_at(start + Duration::from_millis(1000)));
        assert!(!throttle.ready_at(start + Duration::from_millis(1500)));
    }

    #[test]
    fn test_mark_resets_window() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(60));
        throttle.mark();
        assert!(!throttle.ready());
    }
}
