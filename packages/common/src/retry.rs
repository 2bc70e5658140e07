use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single failed delivery or write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u8,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl RetryAttempt {
    pub fn new(attempt: u8, error: impl Into<String>) -> Self {
        Self {
            attempt,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of recording a failure in the RetryTracker.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry {
        attempt: u8,
        history: Vec<RetryAttempt>,
    },
    Exhausted { history: Vec<RetryAttempt> },
}

/// Tracks failed attempts per message id.
#[derive(Debug, Default)]
pub struct RetryTracker {
    history: HashMap<String, Vec<RetryAttempt>>,
    max_retries: u8,
}

impl RetryTracker {
    pub fn new(max_retries: u8) -> Self {
        Self {
            history: HashMap::new(),
            max_retries,
        }
    }

    /// Record a failure for the given message ID.
    ///
    /// Returns `Exhausted` (and forgets the id) once more than `max_retries`
    /// failures have been recorded.
    pub fn record_failure(&mut self, id: &str, error: &str) -> RetryDecision {
        let history = self.history.entry(id.to_string()).or_default();
        let attempt = history.len().saturating_add(1).min(u8::MAX as usize) as u8;
        history.push(RetryAttempt::new(attempt, error));

        if attempt <= self.max_retries {
            RetryDecision::Retry {
                attempt,
                history: history.clone(),
            }
        } else {
            let history = self.history.remove(id).unwrap_or_default();
            RetryDecision::Exhausted { history }
        }
    }

    pub fn clear(&mut self, id: &str) {
        self.history.remove(id);
    }

    pub fn attempts(&self, id: &str) -> u8 {
        self.history.get(id).map(|h| h.len() as u8).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)` (0-25% jitter)
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow((attempt - 1) as u32);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    let total_delay = delay_ms.saturating_add(jitter).min(max_ms);
    Duration::from_millis(total_delay)
}

/// Backoff policy for short infrastructure operations.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u8,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Run `op` until it succeeds, it fails with an error `retryable` rejects,
/// or `policy.max_retries` retries are spent. Returns the last error.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: BackoffPolicy,
    mut op: F,
    retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u8 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && retryable(&e) => {
                attempt += 1;
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_calculate_backoff_basic() {
        let d1 = calculate_backoff(1, 1000, 60000);
        assert!(d1.as_millis() >= 1000 && d1.as_millis() <= 1250);

        let d3 = calculate_backoff(3, 1000, 60000);
        assert!(d3.as_millis() >= 4000 && d3.as_millis() <= 5000);
    }

    #[test]
    fn test_calculate_backoff_respects_max() {
        let d = calculate_backoff(10, 10000, 60000);
        assert!(d.as_millis() <= 60000);
    }

    #[test]
    fn test_calculate_backoff_zero_attempt() {
        assert_eq!(calculate_backoff(0, 1000, 60000), Duration::ZERO);
    }

    #[test]
    fn test_retry_tracker_exhaustion() {
        let mut tracker = RetryTracker::new(2);

        assert!(matches!(
            tracker.record_failure("job-1", "worker crashed"),
            RetryDecision::Retry { attempt: 1, .. }
        ));
        assert!(matches!(
            tracker.record_failure("job-1", "worker crashed"),
            RetryDecision::Retry { attempt: 2, .. }
        ));

        match tracker.record_failure("job-1", "worker crashed again") {
            RetryDecision::Exhausted { history } => {
                assert_eq!(history.len(), 3);
                assert_eq!(history[2].attempt, 3);
                assert_eq!(history[2].error, "worker crashed again");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }

        assert_eq!(tracker.attempts("job-1"), 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_retry_tracker_independent_messages() {
        let mut tracker = RetryTracker::new(3);
        tracker.record_failure("a", "e");
        tracker.record_failure("a", "e");
        tracker.record_failure("b", "e");

        assert_eq!(tracker.attempts("a"), 2);
        assert_eq!(tracker.attempts("b"), 1);
        assert_eq!(tracker.len(), 2);

        tracker.clear("a");
        assert_eq!(tracker.attempts("a"), 0);
    }

    #[tokio::test]
    async fn retry_with_backoff_stops_on_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = BackoffPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };

        let result: Result<u32, String> = retry_with_backoff(
            policy,
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("unavailable".to_string()) } else { Ok(n) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_with_backoff_skips_non_retryable() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };

        let result: Result<(), String> = retry_with_backoff(
            policy,
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("conflict".to_string())
            },
            |e| e != "conflict",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_with_backoff_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = BackoffPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };

        let result: Result<(), String> = retry_with_backoff(
            policy,
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
