//! Retry policy for weather fetches with jittered exponential backoff.
//!
//! Every error is retried the same way: the provider client already maps
//! failures to typed errors, and the cache manager decides what a final
//! failure means for the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Default retry configuration
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 300;
pub const DEFAULT_JITTER_MS: u64 = 200;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    /// Upper bound of the random delay added to each wait
    pub jitter: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64, jitter_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            jitter: Duration::from_millis(jitter_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    pub fn from_cache_config(config: &dispatchwx_core::CacheConfig) -> Self {
        Self::new(
            config.retry_attempts,
            config.retry_initial_delay_ms,
            config.retry_jitter_ms,
            config.retry_max_delay_ms,
        )
    }

    /// Delay before retry number `attempt + 1`, given a jitter sample.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> Duration {
        // initial_delay * 2^attempt + jitter, capped
        let factor = 2u64.saturating_pow(attempt);
        let delay_ms = (self.initial_delay.as_millis() as u64)
            .saturating_mul(factor)
            .saturating_add(jitter_ms);
        let capped = delay_ms.min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }

    /// Delay for a given attempt with a fresh random jitter sample.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_jitter = self.jitter.as_millis() as u64;
        let jitter_ms = if max_jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_jitter)
        };
        self.delay_with_jitter(attempt, jitter_ms)
    }
}

/// Run `operation` until it succeeds or `max_retries + 1` attempts have failed.
///
/// Returns the last error once all attempts are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("Fetch succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "Attempt {} of {} failed: {}; retrying in {:?}",
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    "All {} attempts exhausted: {}",
                    config.max_retries + 1,
                    e
                );
                return Err(e);
            }
        }
    }
}
