use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Wall-clock source for rate limiting and backoff.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = deadline.signed_duration_since(self.now());
        if let Ok(remaining) = remaining.to_std() {
            if !remaining.is_zero() {
                self.sleep(remaining).await;
            }
        }
    }
}

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

/// A clock that only moves when someone sleeps on it.
///
/// Sleeping advances the shared time instantly, so tests can exercise
/// throttling and backoff without waiting.
pub struct SimulatedClock {
    now: Mutex<DateTime<Utc>>,
    slept: Mutex<Vec<Duration>>,
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn total_slept(&self) -> Duration {
        self.slept.lock().unwrap_or_else(|p| p.into_inner()).iter().sum()
    }
}

#[async_trait]
impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap_or_else(|p| p.into_inner()).push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}
