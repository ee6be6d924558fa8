// Time source for the token lifecycle and the authorization poller

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-utils"))]
use std::sync::Mutex;
use std::time::Duration;

/// Wall clock plus sleeping, injected so polling can be driven without real waits
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Real time backed by `chrono` and `tokio::time`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(any(test, feature = "test-utils"))]
/// Clock that only moves when slept on. Every sleep returns immediately,
/// advances `now` by the requested duration and is recorded.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualClockState>,
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
struct ManualClockState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(ManualClockState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        let mut state = self.lock();
        state.now += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualClockState> {
        // A poisoned clock only means a test already panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.sleeps.push(duration);
        state.now += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    }
}
