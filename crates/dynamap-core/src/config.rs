//! Mapper configuration.
//!
//! Defaults match the store's documented limits; every knob can be
//! overridden through environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default page size for queries.
pub const DEFAULT_QUERY_LIMIT: i32 = 1000;

/// Maximum number of keys the store accepts in one `BatchGetItem` call.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// Default separator for joined attributes.
pub const DEFAULT_SEPARATOR: &str = "~";

/// Runtime configuration for table operations.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapperConfig {
    /// Page size used when a query does not specify a limit.
    pub default_query_limit: i32,
    /// Keys per `BatchGetItem` request.
    pub batch_get_chunk_size: usize,
    /// Resubmissions allowed for throttled or unprocessed requests.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Separator used by joined attributes that do not set their own.
    pub default_separator: String,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            default_query_limit: DEFAULT_QUERY_LIMIT,
            batch_get_chunk_size: MAX_BATCH_GET_KEYS,
            max_retries: 5,
            retry_base_delay_ms: 50,
            default_separator: DEFAULT_SEPARATOR.to_owned(),
        }
    }
}

impl MapperConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_query_limit: env_parse("DYNAMAP_QUERY_LIMIT", defaults.default_query_limit),
            batch_get_chunk_size: env_parse(
                "DYNAMAP_BATCH_GET_CHUNK_SIZE",
                defaults.batch_get_chunk_size,
            )
            .clamp(1, MAX_BATCH_GET_KEYS),
            max_retries: env_parse("DYNAMAP_MAX_RETRIES", defaults.max_retries),
            retry_base_delay_ms: env_parse(
                "DYNAMAP_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            ),
            default_separator: env::var("DYNAMAP_JOIN_SEPARATOR")
                .unwrap_or(defaults.default_separator),
        }
    }

    /// Backoff before retry number `attempt` (1-based), doubling each time.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
