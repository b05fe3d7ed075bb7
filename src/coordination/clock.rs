//! Chain-time source for timelock decisions

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Unix-seconds clock the coordinator and simulated chains agree on
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;

    /// Return once `now() >= deadline`
    async fn sleep_until(&self, deadline: u64);
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(Utc::now().timestamp()).unwrap_or_default()
    }

    async fn sleep_until(&self, deadline: u64) {
        let now = self.now();
        if deadline > now {
            tokio::time::sleep(Duration::from_secs(deadline - now)).await;
        }
    }
}

/// Manually driven clock for tests and dry runs.
///
/// `sleep_until` jumps straight to the deadline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep_until(&self, deadline: u64) {
        self.now.fetch_max(deadline, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_jumps_forward_only() {
        let clock = ManualClock::new(100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);

        clock.sleep_until(150).await;
        assert_eq!(clock.now(), 150);

        clock.sleep_until(120).await;
        assert_eq!(clock.now(), 150);
    }

    #[test]
    fn test_system_clock_is_recent() {
        assert!(SystemClock.now() > 1_700_000_000);
        // Deadlines in the past return at once
        tokio_test::block_on(SystemClock.sleep_until(0));
    }
}
