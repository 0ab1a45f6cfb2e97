//! Persistent key/value store for weather cache records.
//!
//! Rows are addressed by the composite `AIRPORTCODE::DATASET::MODE` key.
//! Older databases only carry the `(icao, dataset_type)` columns; reads and
//! writes try the composite schema first and fall back to the legacy
//! columns only when SQLite reports a schema mismatch or constraint conflict.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::{StoreError, StoreErrorKind};
use crate::record::CacheRecord;
use crate::types::CacheKey;

/// A cache record with its payload kept as opaque JSON.
pub type StoredRecord = CacheRecord<serde_json::Value>;

/// Storage backend for the weather cache manager.
///
/// Implementations must be safe to share across tasks; the SQLite store
/// serializes access through a mutex.
pub trait CacheStore: Send + Sync {
    /// Read the record for `key`, if one was ever written.
    fn read(&self, key: &CacheKey) -> Result<Option<StoredRecord>, StoreError>;

    /// Insert or overwrite the record for its key.
    fn write(&self, record: &StoredRecord) -> Result<(), StoreError>;

    /// Force the record's stale deadline to `at`. Missing records are ignored.
    fn mark_stale(&self, key: &CacheKey, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// SQLite-backed cache store.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Open or create the cache database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, creating the table if it is missing.
    ///
    /// An existing legacy table is left as is.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS weather_cache (
                cache_key TEXT NOT NULL UNIQUE,
                icao TEXT NOT NULL,
                dataset_type TEXT NOT NULL,
                mode TEXT NOT NULL,
                record_json TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                stale_at INTEGER NOT NULL,
                needs_refresh_at INTEGER,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_weather_cache_airport ON weather_cache(icao, dataset_type);
            CREATE INDEX IF NOT EXISTS idx_weather_cache_refresh ON weather_cache(needs_refresh_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_with(conn: &Connection, key: &CacheKey) -> Result<Option<StoredRecord>, StoreError> {
        match Self::read_composite(conn, key) {
            Err(e) if e.kind == StoreErrorKind::SchemaMismatch => {
                tracing::warn!(
                    "Composite cache lookup for {} failed ({}); using legacy columns",
                    key,
                    e.message
                );
                Self::read_legacy(conn, key)
            }
            other => other,
        }
    }

    fn read_composite(conn: &Connection, key: &CacheKey) -> Result<Option<StoredRecord>, StoreError> {
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM weather_cache WHERE cache_key = ?1",
                params![key.composite()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| decode_record(&j)).transpose()
    }

    fn read_legacy(conn: &Connection, key: &CacheKey) -> Result<Option<StoredRecord>, StoreError> {
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM weather_cache WHERE icao = ?1 AND dataset_type = ?2",
                params![key.airport.as_str(), key.dataset.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        // The legacy row has no mode column; only accept the row if it was
        // written for the same mode.
        Ok(json
            .map(|j| decode_record(&j))
            .transpose()?
            .filter(|record| record.key == *key))
    }

    fn write_with(conn: &Connection, record: &StoredRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        match Self::upsert_composite(conn, record, &json) {
            Err(e)
                if matches!(
                    e.kind,
                    StoreErrorKind::ConstraintConflict | StoreErrorKind::SchemaMismatch
                ) =>
            {
                tracing::warn!(
                    "Composite cache upsert for {} failed ({}); using legacy columns",
                    record.key,
                    e.message
                );
                Self::upsert_legacy(conn, record, &json)
            }
            other => other,
        }
    }

    fn upsert_composite(conn: &Connection, record: &StoredRecord, json: &str) -> Result<(), StoreError> {
        conn.execute(
            r#"
            INSERT INTO weather_cache
            (cache_key, icao, dataset_type, mode, record_json, expires_at, stale_at, needs_refresh_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(cache_key) DO UPDATE SET
                record_json = excluded.record_json,
                expires_at = excluded.expires_at,
                stale_at = excluded.stale_at,
                needs_refresh_at = excluded.needs_refresh_at,
                updated_at = excluded.updated_at
            "#,
            params![
                record.key.composite(),
                record.key.airport.as_str(),
                record.key.dataset.as_str(),
                record.key.mode.as_str(),
                json,
                record.expires_at.timestamp_millis(),
                record.stale_at.timestamp_millis(),
                record.needs_refresh_at.map(|t| t.timestamp_millis()),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn upsert_legacy(conn: &Connection, record: &StoredRecord, json: &str) -> Result<(), StoreError> {
        conn.execute(
            r#"
            INSERT INTO weather_cache
            (icao, dataset_type, record_json, expires_at, stale_at, needs_refresh_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(icao, dataset_type) DO UPDATE SET
                record_json = excluded.record_json,
                expires_at = excluded.expires_at,
                stale_at = excluded.stale_at,
                needs_refresh_at = excluded.needs_refresh_at,
                updated_at = excluded.updated_at
            "#,
            params![
                record.key.airport.as_str(),
                record.key.dataset.as_str(),
                json,
                record.expires_at.timestamp_millis(),
                record.stale_at.timestamp_millis(),
                record.needs_refresh_at.map(|t| t.timestamp_millis()),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

impl CacheStore for SqliteCacheStore {
    fn read(&self, key: &CacheKey) -> Result<Option<StoredRecord>, StoreError> {
        let conn = self.conn.lock();
        Self::read_with(&conn, key)
    }

    fn write(&self, record: &StoredRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::write_with(&conn, record)
    }

    fn mark_stale(&self, key: &CacheKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        match Self::read_with(&conn, key)? {
            Some(mut record) => {
                record.stale_at = at;
                Self::write_with(&conn, &record)
            }
            None => Ok(()),
        }
    }
}

fn decode_record(json: &str) -> Result<StoredRecord, StoreError> {
    serde_json::from_str(json).map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Fetched;
    use crate::types::{AirportCode, CacheMode, Dataset};
    use chrono::{Duration, TimeZone};

    const LEGACY_SCHEMA: &str = r#"
        CREATE TABLE weather_cache (
            icao TEXT NOT NULL,
            dataset_type TEXT NOT NULL,
            record_json TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            stale_at INTEGER NOT NULL,
            needs_refresh_at INTEGER,
            updated_at INTEGER NOT NULL,
            UNIQUE (icao, dataset_type)
        );
    "#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn key(icao: &str, dataset: Dataset, mode: CacheMode) -> CacheKey {
        CacheKey::new(AirportCode::parse(icao).unwrap(), dataset, mode)
    }

    fn record(key: CacheKey, value: serde_json::Value) -> StoredRecord {
        Fetched::new(value, "test").into_record(key, now()).unwrap()
    }

    fn legacy_store() -> SqliteCacheStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_SCHEMA).unwrap();
        SqliteCacheStore::from_connection(conn).unwrap()
    }

    #[test]
    fn test_read_missing_returns_none() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let result = store.read(&key("KJFK", Dataset::Metar, CacheMode::Full)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let k = key("KJFK", Dataset::Metar, CacheMode::Full);
        let rec = record(k.clone(), serde_json::json!({"raw_text": "KJFK 141251Z"}));

        store.write(&rec).unwrap();
        assert_eq!(store.read(&k).unwrap(), Some(rec));
    }

    #[test]
    fn test_write_overwrites_same_key() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let k = key("KJFK", Dataset::Taf, CacheMode::Full);

        store.write(&record(k.clone(), serde_json::json!(1))).unwrap();
        store.write(&record(k.clone(), serde_json::json!(2))).unwrap();

        assert_eq!(store.read(&k).unwrap().map(|r| r.payload), Some(serde_json::json!(2)));
    }

    #[test]
    fn test_modes_are_separate_rows() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let full = key("KJFK", Dataset::Metar, CacheMode::Full);
        let lite = key("KJFK", Dataset::Metar, CacheMode::Lite);

        store.write(&record(full.clone(), serde_json::json!("full"))).unwrap();
        store.write(&record(lite.clone(), serde_json::json!("lite"))).unwrap();

        assert_eq!(store.read(&full).unwrap().map(|r| r.payload), Some(serde_json::json!("full")));
        assert_eq!(store.read(&lite).unwrap().map(|r| r.payload), Some(serde_json::json!("lite")));
    }

    #[test]
    fn test_mark_stale_sets_deadline() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let k = key("KORD", Dataset::Metar, CacheMode::Full);
        store.write(&record(k.clone(), serde_json::json!({}))).unwrap();

        let at = now() + Duration::minutes(1);
        store.mark_stale(&k, at).unwrap();

        let rec = store.read(&k).unwrap().unwrap();
        assert_eq!(rec.stale_at, at);
        assert!(rec.is_stale(at));
    }

    #[test]
    fn test_mark_stale_missing_is_noop() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store
            .mark_stale(&key("KORD", Dataset::Metar, CacheMode::Full), now())
            .unwrap();
    }

    #[test]
    fn test_legacy_schema_write_and_read_fall_back() {
        let store = legacy_store();
        let k = key("EGLL", Dataset::Taf, CacheMode::Full);
        let rec = record(k.clone(), serde_json::json!({"raw_text": "TAF EGLL"}));

        store.write(&rec).unwrap();
        assert_eq!(store.read(&k).unwrap(), Some(rec));
    }

    #[test]
    fn test_legacy_row_for_other_mode_is_ignored() {
        let store = legacy_store();
        store
            .write(&record(key("EGLL", Dataset::Metar, CacheMode::Lite), serde_json::json!(1)))
            .unwrap();

        let full = store.read(&key("EGLL", Dataset::Metar, CacheMode::Full)).unwrap();
        assert!(full.is_none());
    }

    #[test]
    fn test_legacy_mark_stale() {
        let store = legacy_store();
        let k = key("EGLL", Dataset::Metar, CacheMode::Full);
        store.write(&record(k.clone(), serde_json::json!(1))).unwrap();

        store.mark_stale(&k, now()).unwrap();
        assert!(store.read(&k).unwrap().unwrap().is_stale(now()));
    }

    #[test]
    fn test_genuine_errors_are_not_masked() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.conn.lock().execute_batch("DROP TABLE weather_cache;").unwrap();

        let err = store
            .read(&key("KJFK", Dataset::Metar, CacheMode::Full))
            .unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Other);
    }
}
