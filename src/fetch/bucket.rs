use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Burst size. Zero disables client-side pacing (throttling still applies).
    pub capacity: u32,
    pub refill_per_sec: f64,
    /// Throttle window used when the server signals a rate limit without a reset hint.
    #[serde(with = "secs")]
    pub default_cooldown: Duration,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 1.0,
            default_cooldown: Duration::from_secs(60),
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Open,
    Throttled { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    WaitUntil(DateTime<Utc>),
}

/// Token bucket for one upstream API identity.
///
/// Refill happens lazily from elapsed wall-clock time whenever a caller asks
/// for a token, so a suspended process resumes with a correctly refilled bucket.
#[derive(Debug)]
pub struct TokenBucket {
    config: BucketConfig,
    state: BucketState,
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    pub fn new(config: BucketConfig, now: DateTime<Utc>) -> Self {
        let tokens = config.capacity as f64;
        Self {
            config,
            state: BucketState::Open,
            tokens,
            last_refill: now,
        }
    }

    pub fn state(&self) -> BucketState {
        self.state
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn pacing_enabled(&self) -> bool {
        self.config.capacity > 0 && self.config.refill_per_sec > 0.0
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = now.signed_duration_since(self.last_refill);
        if let Ok(elapsed) = elapsed.to_std() {
            let added = elapsed.as_secs_f64() * self.config.refill_per_sec;
            self.tokens = (self.tokens + added).min(self.config.capacity as f64);
        }
        // A clock that stepped backwards restarts the refill window.
        self.last_refill = now;
    }

    /// Take one token, or report when the caller should come back.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> Admission {
        if let BucketState::Throttled { until } = self.state {
            if now < until {
                return Admission::WaitUntil(until);
            }
            // Upstream window has reset.
            self.state = BucketState::Open;
            self.tokens = self.config.capacity as f64;
            self.last_refill = now;
        }

        if !self.pacing_enabled() {
            return Admission::Proceed;
        }

        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Admission::Proceed;
        }

        let deficit = 1.0 - self.tokens;
        let until = Duration::try_from_secs_f64(deficit / self.config.refill_per_sec)
            .ok()
            .and_then(|wait| chrono::Duration::from_std(wait).ok())
            .and_then(|wait| now.checked_add_signed(wait))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Admission::WaitUntil(until)
    }

    /// Enter the throttled state until `until`, or the default cool-down when
    /// the server gave no usable hint. An earlier deadline never shortens an
    /// active throttle.
    pub fn throttle(&mut self, now: DateTime<Utc>, reset_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let cooldown = chrono::Duration::from_std(self.config.default_cooldown)
            .unwrap_or(chrono::Duration::MAX);
        let mut until = match reset_at {
            Some(reset) if reset > now => reset,
            _ => now.checked_add_signed(cooldown).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        if let BucketState::Throttled { until: current } = self.state {
            until = until.max(current);
        }
        self.state = BucketState::Throttled { until };
        self.tokens = 0.0;
        until
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap()
    }

    fn config(capacity: u32, rate: f64) -> BucketConfig {
        BucketConfig {
            capacity,
            refill_per_sec: rate,
            default_cooldown: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_burst_then_wait() {
        let mut bucket = TokenBucket::new(config(2, 1.0), t0());
        assert_eq!(bucket.try_acquire(t0()), Admission::Proceed);
        assert_eq!(bucket.try_acquire(t0()), Admission::Proceed);
        assert_eq!(
            bucket.try_acquire(t0()),
            Admission::WaitUntil(t0() + chrono::Duration::seconds(1))
        );
    }

    #[test]
    fn test_refill_from_elapsed_time() {
        let mut bucket = TokenBucket::new(config(2, 0.5), t0());
        bucket.try_acquire(t0());
        bucket.try_acquire(t0());
        // 10 seconds at 0.5/s refills beyond capacity; clamped to 2.
        let later = t0() + chrono::Duration::seconds(10);
        assert_eq!(bucket.try_acquire(later), Admission::Proceed);
        assert!((bucket.tokens() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_throttle_blocks_until_reset() {
        let mut bucket = TokenBucket::new(config(5, 1.0), t0());
        let reset = t0() + chrono::Duration::seconds(30);
        assert_eq!(bucket.throttle(t0(), Some(reset)), reset);
        assert_eq!(bucket.state(), BucketState::Throttled { until: reset });

        let mid = t0() + chrono::Duration::seconds(29);
        assert_eq!(bucket.try_acquire(mid), Admission::WaitUntil(reset));

        assert_eq!(bucket.try_acquire(reset), Admission::Proceed);
        assert_eq!(bucket.state(), BucketState::Open);
    }

    #[test]
    fn test_throttle_without_hint_uses_cooldown() {
        let mut bucket = TokenBucket::new(config(5, 1.0), t0());
        let until = bucket.throttle(t0(), None);
        assert_eq!(until, t0() + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_stale_hint_uses_cooldown() {
        let mut bucket = TokenBucket::new(config(5, 1.0), t0());
        let until = bucket.throttle(t0(), Some(t0() - chrono::Duration::seconds(5)));
        assert_eq!(until, t0() + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_throttle_never_shortened() {
        let mut bucket = TokenBucket::new(config(5, 1.0), t0());
        let far = t0() + chrono::Duration::seconds(100);
        bucket.throttle(t0(), Some(far));
        let until = bucket.throttle(t0(), Some(t0() + chrono::Duration::seconds(10)));
        assert_eq!(until, far);
    }

    #[test]
    fn test_zero_capacity_disables_pacing() {
        let mut bucket = TokenBucket::new(config(0, 0.0), t0());
        for _ in 0..100 {
            assert_eq!(bucket.try_acquire(t0()), Admission::Proceed);
        }
    }

    #[test]
    fn test_tiny_refill_rate_waits_without_overflow() {
        let mut bucket = TokenBucket::new(config(1, 1e-300), t0());
        assert_eq!(bucket.try_acquire(t0()), Admission::Proceed);
        match bucket.try_acquire(t0()) {
            Admission::WaitUntil(until) => assert!(until > t0()),
            other => panic!("expected a wait, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let mut bucket = TokenBucket::new(
            BucketConfig {
                capacity: 1,
                refill_per_sec: 1.0,
                default_cooldown: Duration::from_secs(u64::MAX / 4),
            },
            t0(),
        );
        let until = bucket.throttle(t0(), None);
        assert!(until > t0() + chrono::Duration::days(365));
    }

    #[test]
    fn test_backwards_clock_does_not_panic() {
        let mut bucket = TokenBucket::new(config(1, 1.0), t0());
        bucket.try_acquire(t0());
        let earlier = t0() - chrono::Duration::seconds(100);
        assert!(matches!(bucket.try_acquire(earlier), Admission::WaitUntil(_)));
    }
}
