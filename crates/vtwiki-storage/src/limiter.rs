//! Process-wide call pacing, constructed once and injected into clients.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Resolves once the caller may issue one upstream call.
    async fn acquire(&self);
}

/// Allows at most one call per `interval`, across every task sharing it.
///
/// The lock only guards slot reservation; callers sleep after releasing it,
/// so no lock is held across the network call that follows.
#[derive(Debug)]
pub struct IntervalLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl IntervalLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn reserve(&self) -> Instant {
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        let slot = match *next_slot {
            Some(at) if at > now => at,
            _ => now,
        };
        *next_slot = Some(slot + self.interval);
        slot
    }
}

#[async_trait]
impl RateLimiter for IntervalLimiter {
    async fn acquire(&self) {
        let slot = self.reserve().await;
        tokio::time::sleep_until(slot).await;
    }
}

/// Limiter that never waits. Used by tests and local fixtures.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn acquire(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn interval_limiter_spaces_calls_globally() {
        let limiter = Arc::new(IntervalLimiter::new(Duration::from_secs(1)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap() - start);
        }
        times.sort();

        assert_eq!(times[0], Duration::ZERO);
        assert_eq!(times[1], Duration::from_secs(1));
        assert_eq!(times[2], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_limiter_does_not_delay_the_next_call() {
        let limiter = IntervalLimiter::new(Duration::from_millis(500));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now() - before, Duration::ZERO);
    }
}
