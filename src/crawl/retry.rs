//! Bounded retry budgets and injectable backoff

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// Delay function used between retries
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Returns immediately and remembers every requested delay
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().push(delay);
    }
}

/// Fixed-backoff retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one
    pub max_attempts: u32,
    /// Delay before every attempt after the first
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Whether another attempt follows attempt number `attempt` (1-based)
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_counts_total_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));

        let zero = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(zero.max_attempts, 1);
        assert!(!zero.allows_retry(1));
    }

    #[tokio::test]
    async fn test_recording_sleeper_does_not_wait() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(3600)).await;
        sleeper.sleep(Duration::from_secs(30)).await;
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(3600), Duration::from_secs(30)]
        );
    }
}
