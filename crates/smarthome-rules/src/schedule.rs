//! Absolute-time wake points for scheduled rules

use std::ops;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

/// An absolute wake time
///
/// `wait()` recomputes the remaining delta from the current wall clock on
/// every iteration, so scheduling jitter does not accumulate into drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    at: DateTime<Utc>,
}

impl Schedule {
    /// Schedule at an explicit instant
    pub fn at(at: DateTime<Utc>) -> Self {
        Self { at }
    }

    /// Schedule at the current instant
    pub fn now() -> Self {
        Self { at: Utc::now() }
    }

    /// Schedule the given number of seconds from now
    pub fn in_seconds(secs: i64) -> Self {
        Self::now() + Duration::seconds(secs)
    }

    /// Schedule the given number of minutes from now
    pub fn in_minutes(mins: i64) -> Self {
        Self::now() + Duration::minutes(mins)
    }

    /// The absolute wake instant
    pub fn when(&self) -> DateTime<Utc> {
        self.at
    }

    /// Whether the wake time has already passed
    pub fn elapsed(&self) -> bool {
        self.at <= Utc::now()
    }

    /// Sleep until the wake instant; returns immediately if it has passed
    pub async fn wait(&self) {
        loop {
            let now = Utc::now();
            if self.at <= now {
                return;
            }
            let remaining = (self.at - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::time::sleep(remaining).await;
        }
    }
}

impl ops::Add<Duration> for Schedule {
    type Output = Schedule;

    fn add(self, rhs: Duration) -> Schedule {
        Schedule { at: self.at + rhs }
    }
}

impl ops::Sub<Duration> for Schedule {
    type Output = Schedule;

    fn sub(self, rhs: Duration) -> Schedule {
        Schedule { at: self.at - rhs }
    }
}
