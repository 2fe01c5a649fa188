use std::time::Duration;

use crate::progress::PROGRESS_INTERVAL;
use crate::tasks::Priority;

/// Copy of a job's counters at one point in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountSnapshot {
    pub total_size: u64,
    pub file_count: u64,
    pub directory_count: u64,
    pub unreadable_directory_count: u64,
}

impl CountSnapshot {
    /// True when some directory could not be listed, so the totals only
    /// cover what was readable.
    pub fn is_lower_bound(&self) -> bool {
        self.unreadable_directory_count > 0
    }
}

#[derive(Debug, Clone)]
pub struct CountOptions {
    pub follow_symlinks: bool,
    pub progress_interval: Duration,
    pub priority: Priority,
}

impl Default for CountOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            progress_interval: PROGRESS_INTERVAL,
            priority: Priority::Idle,
        }
    }
}

impl CountOptions {
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Minimum spacing between two throttled progress snapshots.
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}
