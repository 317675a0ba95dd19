//! Per-token rate limiting.
//!
//! Accounting is a decaying usage counter per caller: each admitted
//! request adds one unit of draw, and draw melts away at the
//! configured refill rate. A request is refused while the caller's
//! outstanding draw would exceed the burst capacity. With a refill
//! rate of zero the draw never melts, so the burst is a hard lifetime
//! allowance.

use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct RateLimiter {
    callers: Mutex<HashMap<[u8; 32], Usage>>,
    refill_per_sec: f64,
    burst: f64,
}

#[derive(Debug)]
struct Usage {
    drawn: f64,
    as_of: Instant,
}

impl Usage {
    fn decayed(&self, now: Instant, refill_per_sec: f64) -> f64 {
        let recovered = now.duration_since(self.as_of).as_secs_f64() * refill_per_sec;
        (self.drawn - recovered).max(0.0)
    }
}

impl RateLimiter {
    pub fn new(refill_per_sec: f64, burst: u32) -> Self {
        Self {
            callers: Mutex::new(HashMap::new()),
            refill_per_sec,
            burst: burst as f64,
        }
    }

    /// Charge one unit against the caller's outstanding draw. Keyed by
    /// token digest so raw tokens never sit in the map.
    pub async fn check(&self, key: [u8; 32]) -> bool {
        let now = Instant::now();
        let mut callers = self.callers.lock().await;
        let usage = callers.entry(key).or_insert(Usage { drawn: 0.0, as_of: now });
        let outstanding = usage.decayed(now, self.refill_per_sec);
        usage.as_of = now;
        if outstanding + 1.0 > self.burst {
            usage.drawn = outstanding;
            false
        } else {
            usage.drawn = outstanding + 1.0;
            true
        }
    }

    /// Drop callers whose draw has fully melted; they are
    /// indistinguishable from callers never seen. Run periodically.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut callers = self.callers.lock().await;
        callers.retain(|_, usage| usage.decayed(now, self.refill_per_sec) > 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_then_refusal() {
        let limiter = RateLimiter::new(0.0, 3);
        let key = [7u8; 32];
        for _ in 0..3 {
            assert!(limiter.check(key).await);
        }
        assert!(!limiter.check(key).await);
    }

    #[tokio::test]
    async fn draws_are_per_caller() {
        let limiter = RateLimiter::new(0.0, 1);
        assert!(limiter.check([1u8; 32]).await);
        assert!(!limiter.check([1u8; 32]).await);
        assert!(limiter.check([2u8; 32]).await);
    }

    #[tokio::test]
    async fn draw_melts_back_to_capacity() {
        let limiter = RateLimiter::new(200.0, 2);
        let key = [9u8; 32];
        assert!(limiter.check(key).await);
        assert!(limiter.check(key).await);
        assert!(!limiter.check(key).await);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(limiter.check(key).await);
    }

    #[tokio::test]
    async fn sweep_keeps_callers_with_outstanding_draw() {
        let limiter = RateLimiter::new(0.0, 1);
        assert!(limiter.check([3u8; 32]).await);
        limiter.sweep().await;
        // The draw never melted, so the refusal must survive the sweep.
        assert!(!limiter.check([3u8; 32]).await);
    }

    #[tokio::test]
    async fn sweep_forgets_recovered_callers() {
        let limiter = RateLimiter::new(1000.0, 1);
        assert!(limiter.check([4u8; 32]).await);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        limiter.sweep().await;
        assert!(limiter.callers.lock().await.is_empty());
    }
}
