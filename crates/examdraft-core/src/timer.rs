//! Attempt time limit tracking.

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;

/// What the timer reports on a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// The attempt has no time limit.
    Untimed,
    /// Time is left.
    Running { remaining: Duration },
    /// The limit was just crossed. Reported exactly once.
    Expired,
    /// The limit was crossed on an earlier poll.
    AlreadyExpired,
}

/// Derives elapsed and remaining time from the attempt's persisted start.
///
/// `started_at` comes from the draft and is never reset on resume, so elapsed
/// time continues across reloads.
#[derive(Debug, Clone)]
pub struct TimerController {
    started_at: DateTime<Utc>,
    time_limit_minutes: u32,
    expiry_signalled: bool,
}

impl TimerController {
    pub fn new(started_at: DateTime<Utc>, time_limit_minutes: u32) -> Self {
        Self {
            started_at,
            time_limit_minutes,
            expiry_signalled: false,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_timed(&self) -> bool {
        self.time_limit_minutes > 0
    }

    pub fn limit(&self) -> Option<Duration> {
        self.is_timed()
            .then(|| Duration::minutes(i64::from(self.time_limit_minutes)))
    }

    /// Time since the attempt started; never negative.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).max(Duration::zero())
    }

    /// Time left, or `None` when untimed. May be negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.limit().map(|limit| limit - self.elapsed(now))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now)
            .is_some_and(|remaining| remaining <= Duration::zero())
    }

    /// Check the limit, signalling expiry on the first poll past it.
    pub fn poll(&mut self, now: DateTime<Utc>) -> TimerStatus {
        match self.remaining(now) {
            None => TimerStatus::Untimed,
            Some(_) if self.expiry_signalled => TimerStatus::AlreadyExpired,
            Some(remaining) if remaining <= Duration::zero() => {
                self.expiry_signalled = true;
                TimerStatus::Expired
            }
            Some(remaining) => TimerStatus::Running { remaining },
        }
    }
}

/// Owns the periodic ticker task of a live attempt.
///
/// Dropping the guard aborts the task, so a ticker can never outlive the
/// attempt state that acquired it.
#[derive(Debug)]
pub struct TimerGuard {
    handle: Option<JoinHandle<()>>,
}

impl TimerGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Let the task run to completion instead of aborting it.
    ///
    /// Used when the ticker itself drives the transition out of `InProgress`
    /// and must not be cancelled mid-way; it exits its loop on its own.
    pub fn release(mut self) {
        self.handle.take();
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
