//! Flight risk end to end: provider over wiremock, cache and flights on disk.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use dispatchwx_core::ProviderConfig;
use dispatchwx_risk::{
    AlertLevel, FlightPhase, FlightRecord, FlightRiskError, FlightRiskService, FlightStore,
    PhaseWindows, RiskTier, SqliteFlightStore,
};
use dispatchwx_weather::{
    AirportCode, CacheManagerConfig, ProviderClient, RetryConfig, SqliteCacheStore,
    WeatherCacheManager, WeatherService,
};
use tempfile::TempDir;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(server: &MockServer, dir: &Path) -> FlightRiskService {
    let client = ProviderClient::new(&ProviderConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        ..ProviderConfig::default()
    })
    .unwrap();
    let cache = WeatherCacheManager::new(
        Arc::new(SqliteCacheStore::open(dir.join("cache.db")).unwrap()),
        CacheManagerConfig {
            retry: RetryConfig::new(0, 10, 0, 50),
            ..CacheManagerConfig::default()
        },
    );
    let flights = SqliteFlightStore::open(dir.join("flights.db")).unwrap();
    FlightRiskService::new(
        WeatherService::new(cache, Arc::new(client)),
        Arc::new(flights),
        PhaseWindows::default(),
    )
}

async fn mount_metar(server: &MockServer, icao: &str, metar: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/metar/{}/decoded", icao)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "results": 1, "data": [metar] })),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_taf(server: &MockServer, icao: &str) {
    let now = Utc::now();
    Mock::given(method("GET"))
        .and(path(format!("/taf/{}/decoded", icao)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": 1,
            "data": [{
                "icao": icao,
                "raw_text": format!("TAF {} 141120Z 1412/1518 18008KT P6SM SCT250", icao),
                "timestamp": { "from": now - Duration::hours(1), "to": now + Duration::hours(20) },
                "forecast": [{
                    "timestamp": { "from": now - Duration::hours(1), "to": now + Duration::hours(20) },
                    "wind": { "degrees": 180, "speed_kts": 8 },
                    "visibility": { "miles_float": 6.0 }
                }]
            }]
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn calm(icao: &str) -> serde_json::Value {
    serde_json::json!({
        "icao": icao,
        "observed": Utc::now() - Duration::minutes(15),
        "raw_text": format!("{} 141151Z 18006KT 10SM FEW250 20/10 A3010", icao),
        "wind": { "degrees": 180, "speed_kts": 6 },
        "visibility": { "miles_float": 10.0 },
        "clouds": [ { "code": "FEW", "base_feet_agl": 25000 } ]
    })
}

fn thunderstorm(icao: &str) -> serde_json::Value {
    serde_json::json!({
        "icao": icao,
        "observed": Utc::now() - Duration::minutes(15),
        "raw_text": format!("{} 141151Z 27028G42KT 3/4SM +TSRA BKN005 OVC015CB 22/21 A2968", icao),
        "wind": { "degrees": 270, "speed_kts": 28, "gust_kts": 42 },
        "visibility": { "miles_float": 0.75 },
        "clouds": [
            { "code": "BKN", "base_feet_agl": 500 },
            { "code": "OVC", "base_feet_agl": 1500 }
        ],
        "conditions": [ { "code": "+TSRA" } ]
    })
}

#[tokio::test]
async fn test_flight_risk_scored_and_saved() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_metar(&mock_server, "KBOS", calm("KBOS")).await;
    mount_metar(&mock_server, "KORD", thunderstorm("KORD")).await;
    mount_taf(&mock_server, "KBOS").await;
    mount_taf(&mock_server, "KORD").await;

    let service = service(&mock_server, dir.path());
    let now = Utc::now();
    service
        .flights()
        .upsert_flight(
            &FlightRecord::new(
                "acme",
                "AC100",
                AirportCode::parse("KBOS").unwrap(),
                AirportCode::parse("KORD").unwrap(),
            )
            .with_schedule(Some(now + Duration::minutes(30)), Some(now + Duration::hours(3))),
        )
        .unwrap();

    let report = service.get_flight_risk("acme", "AC100", now).await.unwrap();

    assert_eq!(report.risk.phase, FlightPhase::Departure);
    assert_eq!(report.risk.origin_risk.tier, RiskTier::OnTrack);
    assert_eq!(report.risk.destination_risk.tier, RiskTier::HighDisruption);
    assert_eq!(report.risk.alert_level, AlertLevel::Red);
    assert!(report.headline.contains("KBOS to KORD"));

    // Reopen the flight store from disk to see the saved snapshot.
    let reopened = SqliteFlightStore::open(dir.path().join("flights.db")).unwrap();
    let saved = reopened.load_flight("acme", "AC100").unwrap().unwrap();
    assert_eq!(saved.weather_snapshot.unwrap().alert_level, AlertLevel::Red);

    // Second request is served from the cache; each mock expects one call.
    let again = service.get_flight_risk("acme", "AC100", now).await.unwrap();
    assert_eq!(again.risk.combined_score, report.risk.combined_score);
}

#[tokio::test]
async fn test_unknown_flight_makes_no_requests() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let err = service(&mock_server, dir.path())
        .get_flight_risk("acme", "AC404", Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, FlightRiskError::FlightNotFound { .. }));
    assert_eq!(err.user_message(), "Flight not found.");
}
