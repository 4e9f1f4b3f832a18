//! Time source for the scheduler
//!
//! All scheduling decisions read time through [`Clock`], so tests can drive
//! cooldowns with a [`ManualClock`] instead of sleeping for real.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wall clock plus the ability to wait
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Real time backed by tokio timers
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

/// Manually advanced clock
///
/// `sleep` returns immediately after moving the clock forward by the
/// requested duration, and records the request.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
}

struct ManualInner {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualInner {
                now: start,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        let mut inner = self.lock();
        inner.now = advance_by(inner.now, duration);
    }

    /// Set the clock to an absolute instant
    pub fn set(&self, now: DateTime<Utc>) {
        self.lock().now = now;
    }

    /// Durations passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Total time spent in `sleep`
    pub fn slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ManualClock")
            .field("now", &inner.now)
            .field("sleeps", &inner.sleeps.len())
            .finish()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        let mut inner = self.lock();
        inner.sleeps.push(duration);
        inner.now = advance_by(inner.now, duration);
    }
}

fn advance_by(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(30)).await;
        clock.advance(Duration::from_secs(5));

        assert_eq!(clock.now() - start, TimeDelta::seconds(35));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
        assert_eq!(clock.slept(), Duration::from_secs(30));
    }

    #[test]
    fn test_manual_sleep_ready_on_first_poll() {
        let clock = ManualClock::default();
        let mut sleep = tokio_test::task::spawn(clock.sleep(Duration::from_secs(900)));
        tokio_test::assert_ready!(sleep.poll());
        assert_eq!(clock.slept(), Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_system_clock_sleeps() {
        let clock = SystemClock;
        let before = std::time::Instant::now();
        clock.sleep(Duration::from_millis(20)).await;
        assert!(before.elapsed() >= Duration::from_millis(20));
    }
}
