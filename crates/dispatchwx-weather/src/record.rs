//! Cache records and the per-dataset freshness policy.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::types::{CacheKey, CacheMode, Dataset};

/// Observations are cached for 15 minutes and go stale after 20.
pub const OBSERVATION_TTL_MINUTES: i64 = 15;
pub const OBSERVATION_STALE_MINUTES: i64 = 20;
/// Forecast TTL floor and stale-window rules.
pub const FORECAST_MIN_TTL_MINUTES: i64 = 30;
pub const FORECAST_STALE_EXTRA_MINUTES: i64 = 30;
pub const FORECAST_MIN_STALE_MINUTES: i64 = 90;
pub const HAZARD_TTL_MINUTES: i64 = 10;
pub const HAZARD_STALE_MINUTES: i64 = 15;
pub const STATION_TTL_MINUTES: i64 = 24 * 60;
pub const STATION_STALE_MINUTES: i64 = 48 * 60;

/// Where a payload came from and the time span it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub observed_at: Option<DateTime<Utc>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub retrieved_at: DateTime<Utc>,
    pub source_name: String,
    pub mode: CacheMode,
}

/// A cached artifact with its freshness deadlines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    pub key: CacheKey,
    pub payload: T,
    pub metadata: RecordMetadata,
    pub expires_at: DateTime<Utc>,
    pub stale_at: DateTime<Utc>,
    #[serde(default)]
    pub needs_refresh_at: Option<DateTime<Utc>>,
}

impl<T> CacheRecord<T> {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now >= self.stale_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Servable without a refresh.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_stale(now)
    }

    /// Minutes since the data was observed (or retrieved, when the
    /// payload carries no observation time).
    pub fn data_staleness_minutes(&self, now: DateTime<Utc>) -> i64 {
        let reference = self
            .metadata
            .observed_at
            .unwrap_or(self.metadata.retrieved_at);
        (now - reference).num_minutes().max(0)
    }

    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        Freshness {
            retrieved_at: self.metadata.retrieved_at,
            observed_at: self.metadata.observed_at,
            expires_at: self.expires_at,
            stale_at: self.stale_at,
            is_stale: self.is_stale(now),
            data_staleness_minutes: self.data_staleness_minutes(now),
        }
    }
}

impl CacheRecord<serde_json::Value> {
    /// Decode the stored JSON payload into a typed record copy.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<CacheRecord<T>, CacheError> {
        let payload = serde_json::from_value(self.payload.clone())
            .map_err(|e| CacheError::Decode(format!("{}: {}", self.key, e)))?;
        Ok(CacheRecord {
            key: self.key.clone(),
            payload,
            metadata: self.metadata.clone(),
            expires_at: self.expires_at,
            stale_at: self.stale_at,
            needs_refresh_at: self.needs_refresh_at,
        })
    }
}

/// Staleness metadata handed to callers alongside decoded weather.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
    pub retrieved_at: DateTime<Utc>,
    pub observed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub stale_at: DateTime<Utc>,
    pub is_stale: bool,
    pub data_staleness_minutes: i64,
}

/// A freshly fetched payload, before it becomes a cache record.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub payload: T,
    pub observed_at: Option<DateTime<Utc>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub source_name: String,
}

impl<T> Fetched<T> {
    pub fn new(payload: T, source_name: impl Into<String>) -> Self {
        Self {
            payload,
            observed_at: None,
            valid_from: None,
            valid_to: None,
            source_name: source_name.into(),
        }
    }

    pub fn observed(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.observed_at = at;
        self
    }

    pub fn valid(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.valid_from = from;
        self.valid_to = to;
        self
    }
}

impl<T: Serialize> Fetched<T> {
    /// Build a record stamped at `now` using the dataset's freshness policy.
    pub fn into_record(
        self,
        key: CacheKey,
        now: DateTime<Utc>,
    ) -> Result<CacheRecord<serde_json::Value>, CacheError> {
        let payload = serde_json::to_value(&self.payload)
            .map_err(|e| CacheError::Decode(format!("{}: {}", key, e)))?;
        let policy = FreshnessPolicy::for_dataset(key.dataset, self.valid_to, now);
        let expires_at = now + Duration::minutes(policy.ttl_minutes);
        Ok(CacheRecord {
            metadata: RecordMetadata {
                observed_at: self.observed_at,
                valid_from: self.valid_from,
                valid_to: self.valid_to,
                retrieved_at: now,
                source_name: self.source_name,
                mode: key.mode,
            },
            key,
            payload,
            expires_at,
            stale_at: now + Duration::minutes(policy.stale_minutes),
            needs_refresh_at: Some(expires_at),
        })
    }
}

/// TTL and stale window, in minutes, for one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub ttl_minutes: i64,
    pub stale_minutes: i64,
}

impl FreshnessPolicy {
    pub fn for_dataset(dataset: Dataset, valid_to: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match dataset {
            Dataset::Metar | Dataset::MetarRecent => Self {
                ttl_minutes: OBSERVATION_TTL_MINUTES,
                stale_minutes: OBSERVATION_STALE_MINUTES,
            },
            Dataset::Taf => {
                let ttl_minutes = valid_to
                    .map(|to| ((to - now).num_milliseconds() as f64 / 60_000.0).round() as i64)
                    .unwrap_or(FORECAST_MIN_TTL_MINUTES)
                    .max(FORECAST_MIN_TTL_MINUTES);
                Self {
                    ttl_minutes,
                    stale_minutes: (ttl_minutes + FORECAST_STALE_EXTRA_MINUTES)
                        .max(FORECAST_MIN_STALE_MINUTES),
                }
            }
            Dataset::Sigmet | Dataset::Airmet => Self {
                ttl_minutes: HAZARD_TTL_MINUTES,
                stale_minutes: HAZARD_STALE_MINUTES,
            },
            Dataset::Station => Self {
                ttl_minutes: STATION_TTL_MINUTES,
                stale_minutes: STATION_STALE_MINUTES,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AirportCode;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn key(dataset: Dataset) -> CacheKey {
        CacheKey::new(AirportCode::parse("KDEN").unwrap(), dataset, CacheMode::Full)
    }

    #[test]
    fn test_observation_policy_is_fixed() {
        let policy = FreshnessPolicy::for_dataset(Dataset::Metar, None, now());
        assert_eq!(policy.ttl_minutes, 15);
        assert_eq!(policy.stale_minutes, 20);
    }

    #[test]
    fn test_forecast_ttl_follows_validity_window() {
        let valid_to = now() + Duration::hours(6);
        let policy = FreshnessPolicy::for_dataset(Dataset::Taf, Some(valid_to), now());
        assert_eq!(policy.ttl_minutes, 360);
        assert_eq!(policy.stale_minutes, 390);
    }

    #[test]
    fn test_forecast_ttl_rounds_to_nearest_minute() {
        let valid_to = now() + Duration::seconds(45 * 60 + 31);
        let policy = FreshnessPolicy::for_dataset(Dataset::Taf, Some(valid_to), now());
        assert_eq!(policy.ttl_minutes, 46);
        assert_eq!(policy.stale_minutes, 90);
    }

    #[test]
    fn test_forecast_ttl_floor() {
        let nearly_expired = now() + Duration::minutes(5);
        let policy = FreshnessPolicy::for_dataset(Dataset::Taf, Some(nearly_expired), now());
        assert_eq!(policy.ttl_minutes, 30);
        assert_eq!(policy.stale_minutes, 90);

        let already_expired = now() - Duration::hours(2);
        let policy = FreshnessPolicy::for_dataset(Dataset::Taf, Some(already_expired), now());
        assert_eq!(policy.ttl_minutes, 30);

        let unknown = FreshnessPolicy::for_dataset(Dataset::Taf, None, now());
        assert_eq!(unknown.ttl_minutes, 30);
    }

    #[test]
    fn test_into_record_stamps_deadlines() {
        let fetched = Fetched::new(serde_json::json!({"raw": "KDEN"}), "checkwx")
            .observed(Some(now() - Duration::minutes(7)));
        let record = fetched.into_record(key(Dataset::Metar), now()).unwrap();

        assert_eq!(record.expires_at, now() + Duration::minutes(15));
        assert_eq!(record.stale_at, now() + Duration::minutes(20));
        assert_eq!(record.needs_refresh_at, Some(record.expires_at));
        assert_eq!(record.metadata.retrieved_at, now());
        assert_eq!(record.data_staleness_minutes(now()), 7);
        assert!(record.is_fresh(now()));
    }

    #[test]
    fn test_staleness_boundaries() {
        let record = Fetched::new(1u32, "checkwx")
            .into_record(key(Dataset::Metar), now())
            .unwrap();

        assert!(record.is_fresh(now() + Duration::minutes(14)));
        assert!(record.is_expired(now() + Duration::minutes(15)));
        assert!(!record.is_stale(now() + Duration::minutes(19)));
        assert!(record.is_stale(now() + Duration::minutes(20)));
    }

    #[test]
    fn test_decode_into_typed_copy() {
        let record = Fetched::new(vec![1u32, 2, 3], "checkwx")
            .into_record(key(Dataset::MetarRecent), now())
            .unwrap();
        let typed: CacheRecord<Vec<u32>> = record.decode().unwrap();
        assert_eq!(typed.payload, vec![1, 2, 3]);

        let wrong: Result<CacheRecord<String>, _> = record.decode();
        assert!(matches!(wrong, Err(CacheError::Decode(_))));
    }
}
