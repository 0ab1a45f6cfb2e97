//! Aviation weather for dispatchwx
//!
//! Fetches observations, forecasts, station metadata and hazard advisories
//! from the provider and caches them with stale-while-revalidate freshness.

pub mod cache;
pub mod clock;
pub mod error;
pub mod limiter;
pub mod provider;
pub mod record;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;

pub use cache::{CacheManagerConfig, FetchOptions, WeatherCacheManager};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, ProviderError, StoreError, StoreErrorKind, WeatherServiceError};
pub use limiter::ConcurrencyLimiter;
pub use provider::{parse_codes, ProviderClient, WeatherSource};
pub use record::{CacheRecord, Fetched, Freshness, FreshnessPolicy};
pub use retry::{with_retry, RetryConfig};
pub use service::{AirfieldWeatherSnapshot, CachedDataset, PrimeReport, WeatherService};
pub use store::{CacheStore, SqliteCacheStore, StoredRecord};
pub use types::*;
