//! Fixed-delay retry policy for PDF requests

use backoff::backoff::Backoff;
use std::time::Duration;

/// Allows `max_attempts` tries in total with the same delay between each.
#[derive(Debug, Clone)]
pub struct FixedRetry {
    delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl FixedRetry {
    /// At least one attempt is always made
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
            attempts: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Backoff for FixedRetry {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts < self.max_attempts {
            Some(self.delay)
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_attempts_yield_two_delays() {
        let mut policy = FixedRetry::new(Duration::from_secs(5), 3);
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_backoff(), None);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let mut policy = FixedRetry::new(Duration::ZERO, 0);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.next_backoff(), None);
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut policy = FixedRetry::new(Duration::from_millis(1), 2);
        assert!(policy.next_backoff().is_some());
        assert!(policy.next_backoff().is_none());
        policy.reset();
        assert!(policy.next_backoff().is_some());
    }

    #[tokio::test]
    async fn test_future_retry_stops_after_budget() {
        let mut calls = 0u32;
        let result: Result<(), &str> = backoff::future::retry(
            FixedRetry::new(Duration::ZERO, 3),
            || {
                calls += 1;
                async { Err(backoff::Error::transient("boom")) }
            },
        )
        .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(calls, 3);
    }
}
