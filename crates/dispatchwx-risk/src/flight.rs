//! Flight records and their SQLite storage.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use dispatchwx_weather::AirportCode;

use crate::combine::{AlertLevel, CombinedFlightRisk};
use crate::error::{FlightStoreError, FlightStoreResult};

/// Result of the last risk request for a flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightWeatherSnapshot {
    pub computed_at: DateTime<Utc>,
    pub alert_level: AlertLevel,
    pub headline: String,
    pub risk: CombinedFlightRisk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    pub account_id: String,
    pub flight_id: String,
    pub origin: AirportCode,
    pub destination: AirportCode,
    pub scheduled_departure: Option<DateTime<Utc>>,
    pub scheduled_arrival: Option<DateTime<Utc>>,
    #[serde(default)]
    pub weather_snapshot: Option<FlightWeatherSnapshot>,
}

impl FlightRecord {
    pub fn new(
        account_id: impl Into<String>,
        flight_id: impl Into<String>,
        origin: AirportCode,
        destination: AirportCode,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            flight_id: flight_id.into(),
            origin,
            destination,
            scheduled_departure: None,
            scheduled_arrival: None,
            weather_snapshot: None,
        }
    }

    pub fn with_schedule(
        mut self,
        departure: Option<DateTime<Utc>>,
        arrival: Option<DateTime<Utc>>,
    ) -> Self {
        self.scheduled_departure = departure;
        self.scheduled_arrival = arrival;
        self
    }
}

/// Reject blank account or flight identifiers.
pub fn validate_identifiers(account_id: &str, flight_id: &str) -> FlightStoreResult<()> {
    if account_id.trim().is_empty() {
        return Err(FlightStoreError::Validation("account id is required".into()));
    }
    if flight_id.trim().is_empty() {
        return Err(FlightStoreError::Validation("flight id is required".into()));
    }
    Ok(())
}

/// Storage for flights the risk service evaluates.
pub trait FlightStore: Send + Sync {
    /// Insert or replace a flight, including its snapshot field.
    fn upsert_flight(&self, flight: &FlightRecord) -> FlightStoreResult<()>;

    fn load_flight(&self, account_id: &str, flight_id: &str)
        -> FlightStoreResult<Option<FlightRecord>>;

    /// Attach a snapshot to an existing flight.
    ///
    /// Returns `NotFound` if the flight does not exist.
    fn save_weather_snapshot(
        &self,
        account_id: &str,
        flight_id: &str,
        snapshot: &FlightWeatherSnapshot,
    ) -> FlightStoreResult<()>;
}

/// SQLite-based flight storage.
pub struct SqliteFlightStore {
    conn: Mutex<Connection>,
}

impl SqliteFlightStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> FlightStoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> FlightStoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> FlightStoreResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS flights (
                account_id TEXT NOT NULL,
                flight_id TEXT NOT NULL,
                origin TEXT NOT NULL,
                destination TEXT NOT NULL,
                scheduled_departure TEXT,
                scheduled_arrival TEXT,
                weather_snapshot TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (account_id, flight_id)
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

type FlightRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn parse_time(value: Option<String>) -> FlightStoreResult<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| FlightStoreError::storage(format!("bad timestamp {:?}: {}", s, e)))
        })
        .transpose()
}

fn parse_code(value: &str) -> FlightStoreResult<AirportCode> {
    AirportCode::parse(value).map_err(|e| FlightStoreError::storage(e.to_string()))
}

fn row_to_flight(row: FlightRow) -> FlightStoreResult<FlightRecord> {
    let (account_id, flight_id, origin, destination, departure, arrival, snapshot) = row;
    let weather_snapshot = snapshot
        .map(|json| serde_json::from_str::<FlightWeatherSnapshot>(&json))
        .transpose()?;

    Ok(FlightRecord {
        account_id,
        flight_id,
        origin: parse_code(&origin)?,
        destination: parse_code(&destination)?,
        scheduled_departure: parse_time(departure)?,
        scheduled_arrival: parse_time(arrival)?,
        weather_snapshot,
    })
}

impl FlightStore for SqliteFlightStore {
    fn upsert_flight(&self, flight: &FlightRecord) -> FlightStoreResult<()> {
        validate_identifiers(&flight.account_id, &flight.flight_id)?;
        let snapshot = flight
            .weather_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.lock().execute(
            r#"
            INSERT INTO flights (
                account_id, flight_id, origin, destination,
                scheduled_departure, scheduled_arrival, weather_snapshot, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(account_id, flight_id) DO UPDATE SET
                origin = excluded.origin,
                destination = excluded.destination,
                scheduled_departure = excluded.scheduled_departure,
                scheduled_arrival = excluded.scheduled_arrival,
                weather_snapshot = excluded.weather_snapshot,
                updated_at = excluded.updated_at
            "#,
            params![
                flight.account_id.trim(),
                flight.flight_id.trim(),
                flight.origin.as_str(),
                flight.destination.as_str(),
                flight.scheduled_departure.map(|t| t.to_rfc3339()),
                flight.scheduled_arrival.map(|t| t.to_rfc3339()),
                snapshot,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_flight(
        &self,
        account_id: &str,
        flight_id: &str,
    ) -> FlightStoreResult<Option<FlightRecord>> {
        validate_identifiers(account_id, flight_id)?;
        let row: Option<FlightRow> = self
            .conn
            .lock()
            .query_row(
                r#"
                SELECT account_id, flight_id, origin, destination,
                       scheduled_departure, scheduled_arrival, weather_snapshot
                FROM flights
                WHERE account_id = ?1 AND flight_id = ?2
                "#,
                params![account_id.trim(), flight_id.trim()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(row_to_flight).transpose()
    }

    fn save_weather_snapshot(
        &self,
        account_id: &str,
        flight_id: &str,
        snapshot: &FlightWeatherSnapshot,
    ) -> FlightStoreResult<()> {
        validate_identifiers(account_id, flight_id)?;
        let json = serde_json::to_string(snapshot)?;
        let updated = self.conn.lock().execute(
            "UPDATE flights SET weather_snapshot = ?1, updated_at = ?2
             WHERE account_id = ?3 AND flight_id = ?4",
            params![json, Utc::now().to_rfc3339(), account_id.trim(), flight_id.trim()],
        )?;
        if updated == 0 {
            return Err(FlightStoreError::not_found(account_id, flight_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, RiskTier};
    use crate::combine::combine;
    use crate::phase::FlightPhase;
    use chrono::TimeZone;

    fn code(s: &str) -> AirportCode {
        AirportCode::parse(s).unwrap()
    }

    fn departure() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 15, 0, 0).unwrap()
    }

    fn flight() -> FlightRecord {
        FlightRecord::new("acme", "AC100", code("KBOS"), code("KORD"))
            .with_schedule(Some(departure()), Some(departure() + chrono::Duration::hours(3)))
    }

    fn snapshot() -> FlightWeatherSnapshot {
        let origin = aggregate("KBOS", FlightPhase::Planning, Vec::new(), 2, 0.0, 0.0, false);
        let destination = aggregate("KORD", FlightPhase::Planning, Vec::new(), 2, 0.0, 0.0, false);
        let risk = combine(FlightPhase::Planning, origin, destination);
        FlightWeatherSnapshot {
            computed_at: departure(),
            alert_level: risk.alert_level,
            headline: "On track".to_string(),
            risk,
        }
    }

    #[test]
    fn test_upsert_and_load() {
        let store = SqliteFlightStore::open_in_memory().unwrap();
        store.upsert_flight(&flight()).unwrap();

        let loaded = store.load_flight("acme", "AC100").unwrap().unwrap();
        assert_eq!(loaded, flight());
        assert!(store.load_flight("acme", "AC999").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_schedule() {
        let store = SqliteFlightStore::open_in_memory().unwrap();
        store.upsert_flight(&flight()).unwrap();

        let moved = flight().with_schedule(None, None);
        store.upsert_flight(&moved).unwrap();

        let loaded = store.load_flight("acme", "AC100").unwrap().unwrap();
        assert!(loaded.scheduled_departure.is_none());
    }

    #[test]
    fn test_blank_identifiers_rejected() {
        let store = SqliteFlightStore::open_in_memory().unwrap();
        let err = store.load_flight(" ", "AC100").unwrap_err();
        assert!(matches!(err, FlightStoreError::Validation(_)));

        let err = store
            .upsert_flight(&FlightRecord::new("acme", "", code("KBOS"), code("KORD")))
            .unwrap_err();
        assert!(matches!(err, FlightStoreError::Validation(_)));
    }

    #[test]
    fn test_save_snapshot_round_trips() {
        let store = SqliteFlightStore::open_in_memory().unwrap();
        store.upsert_flight(&flight()).unwrap();
        store
            .save_weather_snapshot("acme", "AC100", &snapshot())
            .unwrap();

        let loaded = store.load_flight("acme", "AC100").unwrap().unwrap();
        let saved = loaded.weather_snapshot.unwrap();
        assert_eq!(saved, snapshot());
        assert_eq!(saved.risk.combined_tier, RiskTier::OnTrack);
    }

    #[test]
    fn test_save_snapshot_for_unknown_flight() {
        let store = SqliteFlightStore::open_in_memory().unwrap();
        let err = store
            .save_weather_snapshot("acme", "AC100", &snapshot())
            .unwrap_err();
        assert!(matches!(err, FlightStoreError::NotFound { .. }));
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flights.db");
        SqliteFlightStore::open(&path)
            .unwrap()
            .upsert_flight(&flight())
            .unwrap();

        let reopened = SqliteFlightStore::open(&path).unwrap();
        assert!(reopened.load_flight("acme", "AC100").unwrap().is_some());
    }
}
