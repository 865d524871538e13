//! Backoff schedule shared by chat requests and catalog fetches

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::warn;

use crate::constants;

/// How many times to retry and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for any single wait
    pub max_delay: Duration,
    /// Stretch each wait by a random factor below `1 + JITTER`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: constants::retry::MAX_RETRIES,
            initial_delay: constants::retry::INITIAL_DELAY,
            max_delay: constants::retry::MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Two quick retries
    ///
    /// Used for model catalog fetches, where a stale default list is an
    /// acceptable outcome.
    pub fn gentle() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            jitter: true,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    ///
    /// `min(max_delay, initial_delay * 2^(retry-1) * (1 + jitter))` with
    /// jitter in `[0, 0.1)`. A server-provided Retry-After raises the delay
    /// but never past `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = if self.jitter {
            1.0 + rand::thread_rng().gen_range(0.0..constants::retry::JITTER)
        } else {
            1.0
        };
        let base_ms = self.initial_delay.as_millis() as f64 * 2f64.powi(exponent as i32) * factor;
        let max_ms = self.max_delay.as_millis() as f64;
        let computed = Duration::from_millis(base_ms.min(max_ms) as u64);

        match retry_after {
            Some(wait) if wait > computed => wait.min(self.max_delay),
            _ => computed,
        }
    }
}

/// Errors that know whether another attempt could succeed
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;

    /// Server-requested wait, from a `Retry-After` header
    fn retry_after(&self) -> Option<Duration>;
}

/// Run `operation` until it succeeds, fails fatally, or the budget is spent
///
/// Uses the same backoff schedule as the chat engine, without emitting
/// stream notifications.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && retry < config.max_retries => {
                retry += 1;
                let delay = config.delay_for(retry, e.retry_after());

                warn!(
                    attempt = retry,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off: {}",
                    e
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wait requested by a `Retry-After` value
///
/// Accepts delta-seconds (`"120"`) or an HTTP date. Dates in the past yield `None`.
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();
    match value.parse::<u64>() {
        Ok(seconds) => Some(Duration::from_secs(seconds)),
        Err(_) => httpdate::parse_http_date(value)
            .ok()
            .and_then(|at| at.duration_since(std::time::SystemTime::now()).ok()),
    }
}

/// Read Retry-After from response headers
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky (retryable={})", self.0)
        }
    }

    impl IsRetryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }

        fn retry_after(&self) -> Option<Duration> {
            None
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        }
    }

    #[test]
    fn test_retry_after_delta_seconds() {
        assert_eq!(parse_retry_after(" 90 "), Some(Duration::from_secs(90)));
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_defaults_match_constants() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(2000));
        assert_eq!(config.max_delay, Duration::from_millis(30_000));
        assert!(config.jitter);
    }

    #[test]
    fn test_delay_doubles_until_capped() {
        let config = RetryConfig {
            jitter: false,
            max_retries: 6,
            ..RetryConfig::default()
        };
        let delays: Vec<u64> = (1..=6)
            .map(|n| config.delay_for(n, None).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let delay = config.delay_for(1, None).as_millis() as u64;
            assert!((2000..2200).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_retry_after_raises_delay_but_respects_cap() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(
            config.delay_for(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.delay_for(1, Some(Duration::from_secs(600))),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.delay_for(2, Some(Duration::from_millis(10))),
            Duration::from_millis(4000)
        );
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = with_retry(&fast(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Flaky(true))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.ok(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_fatal() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = with_retry(&fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(false))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = with_retry(&fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(true))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
