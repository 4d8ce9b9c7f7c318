//! Cyclic invocation counter for rule handlers

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counts handler invocations, wrapping and expiring on demand
///
/// A handler that wants its invocation index (dim a light one step per
/// button press, say) captures a `Counter` and calls [`Counter::next`]
/// each run. With `max_count` the index wraps back to zero; with
/// `max_wait` it resets to zero when invocations are further apart than
/// the window.
#[derive(Debug)]
pub struct Counter {
    max_count: Option<u32>,
    max_wait: Option<Duration>,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    count: u32,
    last: Instant,
}

impl Counter {
    /// Unbounded counter
    pub fn new() -> Self {
        Self {
            max_count: None,
            max_wait: None,
            inner: Mutex::new(Inner {
                count: 0,
                last: Instant::now(),
            }),
        }
    }

    /// Wrap back to zero after `max_count` invocations
    pub fn with_max_count(mut self, max_count: u32) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// Reset to zero when invocations are further apart than `max_wait`
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Current index for this invocation, then advance
    pub fn next(&self) -> u32 {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        if let Some(max_wait) = self.max_wait {
            if now.duration_since(inner.last) >= max_wait {
                inner.count = 0;
            }
        }
        if let Some(max_count) = self.max_count {
            if inner.count >= max_count {
                inner.count = 0;
            }
        }
        let current = inner.count;
        inner.count += 1;
        inner.last = now;
        current
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}
