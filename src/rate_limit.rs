use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;

pub type Sleeper = Box<dyn FnMut(Duration) + Send>;

pub fn thread_sleeper() -> Sleeper {
    Box::new(thread::sleep)
}

/// Sliding-window limiter: at most `max_calls` calls within any `period`.
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    calls: VecDeque<Instant>,
    sleep: Sleeper,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self::with_sleeper(settings, thread_sleeper())
    }

    pub fn with_sleeper(settings: &RateLimitSettings, sleep: Sleeper) -> Self {
        Self {
            max_calls: settings.max_calls.max(1),
            period: settings.period,
            calls: VecDeque::new(),
            sleep,
        }
    }

    /// Blocks until another call fits in the window, records it, and returns the time spent waiting.
    pub fn acquire(&mut self) -> Duration {
        let now = Instant::now();
        let wait = self.wait_needed(now);
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, pausing");
            (self.sleep)(wait);
        }
        self.record(now + wait);
        wait
    }

    pub fn wait_needed(&self, now: Instant) -> Duration {
        if self.calls.len() < self.max_calls {
            return Duration::ZERO;
        }
        let Some(oldest) = self.calls.front() else {
            return Duration::ZERO;
        };
        (*oldest + self.period).saturating_duration_since(now)
    }

    fn record(&mut self, at: Instant) {
        while let Some(oldest) = self.calls.front() {
            if at.saturating_duration_since(*oldest) >= self.period {
                self.calls.pop_front();
            } else {
                break;
            }
        }
        self.calls.push_back(at);
        while self.calls.len() > self.max_calls {
            self.calls.pop_front();
        }
    }
}
