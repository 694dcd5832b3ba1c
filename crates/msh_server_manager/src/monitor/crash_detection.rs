use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_CRASH_THRESHOLD: usize = 3;
const DEFAULT_CRASH_WINDOW: Duration = Duration::from_secs(300); // 5 minutes

/// Counts unexpected exits of the backing server inside a sliding window.
#[derive(Debug)]
pub struct CrashDetector {
    crash_threshold: usize,
    crash_window: Duration,
    crashes: VecDeque<Instant>,
}

impl Default for CrashDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CRASH_THRESHOLD, DEFAULT_CRASH_WINDOW)
    }
}

impl CrashDetector {
    pub fn new(crash_threshold: usize, crash_window: Duration) -> Self {
        Self {
            crash_threshold,
            crash_window,
            crashes: VecDeque::with_capacity(crash_threshold),
        }
    }

    /// Records a crash at `at` and reports whether the server is now in a crash loop.
    pub fn record_crash(&mut self, at: Instant) -> bool {
        self.crashes.push_back(at);
        while let Some(first) = self.crashes.front() {
            if at.saturating_duration_since(*first) > self.crash_window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
        self.is_in_crash_loop()
    }

    pub fn is_in_crash_loop(&self) -> bool {
        self.crashes.len() >= self.crash_threshold
    }

    pub fn reset(&mut self) {
        self.crashes.clear();
    }
}
