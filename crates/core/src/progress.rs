use std::time::{Duration, Instant};

/// Default spacing between progress snapshots: at most four per second.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Rate limiter for progress emission.
///
/// The first call to [`ProgressThrottle::ready`] only arms the timer, so a
/// traversal does not report after its very first directory. After that a
/// snapshot is allowed once `interval` has passed since the previous one.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    next_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_emit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reset(&mut self) {
        self.next_emit = None;
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        match self.next_emit {
            None => {
                self.next_emit = Some(now + self.interval);
                false
            }
            Some(next) if now >= next => {
                self.next_emit = Some(now + self.interval);
                true
            }
            Some(_) => false,
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}
