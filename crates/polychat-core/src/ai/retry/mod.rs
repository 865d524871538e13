//! Retry policy and backoff helpers

mod backoff;

pub use backoff::{parse_retry_after, retry_after_from_headers, with_retry, IsRetryable, RetryConfig};
