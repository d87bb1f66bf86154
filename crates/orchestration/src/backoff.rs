//! Retry back-off schedule for transient failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay schedule indexed by attempt number.
///
/// Attempt numbers are 1-based: the first execution of a job is attempt 1.
/// Attempt `n` that fails transiently is retried after `delays[n - 1]`; once
/// every delay has been used, the next transient failure is a hard failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

/// What to do after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run the job after the delay.
    RetryAfter(Duration),
    /// The retry budget is spent.
    Exhausted,
}

impl Default for BackoffSchedule {
    /// 30 s, 120 s, 480 s: four attempts in total.
    fn default() -> Self {
        Self::from_secs(&[30, 120, 480])
    }
}

impl BackoffSchedule {
    /// Creates a schedule from explicit delays.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Creates a schedule from delays in whole seconds.
    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// Total attempts a job gets, the first run included.
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.delays.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// The longest delay in the schedule, zero if it never retries.
    pub fn longest(&self) -> Duration {
        self.delays.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    /// Decides what happens after attempt `attempt` failed transiently.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        let index = attempt.saturating_sub(1) as usize;
        match self.delays.get(index) {
            Some(delay) if attempt >= 1 => RetryDecision::RetryAfter(*delay),
            _ => RetryDecision::Exhausted,
        }
    }
}
