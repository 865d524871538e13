//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// HTTP client configuration
pub mod http {
    use super::*;

    /// Connection timeout for each HTTP attempt
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Read timeout for each HTTP attempt
    ///
    /// Applies between body reads, so a slow but live SSE stream is not cut off.
    pub const READ_TIMEOUT: Duration = Duration::from_secs(120);

    /// User agent sent to every backend
    pub const USER_AGENT: &str = concat!("Polychat/", env!("CARGO_PKG_VERSION"));
}

/// Retry/backoff defaults for chat requests
pub mod retry {
    use super::*;

    /// Retries after the initial attempt
    pub const MAX_RETRIES: u32 = 3;

    /// Delay before the first retry
    pub const INITIAL_DELAY: Duration = Duration::from_millis(2000);

    /// Upper bound for any single backoff delay
    pub const MAX_DELAY: Duration = Duration::from_millis(30_000);

    /// Upper bound (exclusive) of the multiplicative jitter factor
    pub const JITTER: f64 = 0.1;
}

/// Model catalog configuration
pub mod models {
    use super::*;

    /// Upper bound for a single provider's catalog fetch during registry refresh
    pub const FETCH_TIMEOUT: Duration = Duration::from_secs(45);
}

/// Streaming configuration
pub mod stream {
    /// Capacity of the per-call event channel
    pub const EVENT_BUFFER: usize = 64;

    /// Longest SSE line accepted before the stream is abandoned
    pub const MAX_LINE_BYTES: usize = 1024 * 1024;
}

/// Filesystem layout
pub mod fs {
    /// Config directory name (under the user's home)
    pub const CONFIG_DIR_NAME: &str = ".polychat";

    /// Registry persistence file name
    pub const MODELS_FILE_NAME: &str = "models.json";

    /// User settings file name
    pub const SETTINGS_FILE_NAME: &str = "settings.toml";

    /// Log file name
    pub const LOG_FILE_NAME: &str = "polychat.log";
}
