use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;

/// Validated 4-letter ICAO airport code, normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AirportCode(String);

impl AirportCode {
    /// Parse an airport code. Anything but exactly four ASCII letters is rejected.
    pub fn parse(input: &str) -> Result<Self, ProviderError> {
        let trimmed = input.trim();
        if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(ProviderError::InvalidAirportCode(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AirportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AirportCode {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AirportCode {
    type Error = ProviderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AirportCode> for String {
    fn from(code: AirportCode) -> Self {
        code.0
    }
}

/// Kind of cached weather artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// Current observation (latest METAR)
    Metar,
    /// Recent observations (METAR history)
    MetarRecent,
    /// Decoded forecast (TAF)
    Taf,
    /// Active SIGMET advisories
    Sigmet,
    /// Active AIRMET advisories
    Airmet,
    /// Station metadata
    Station,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metar => "metar",
            Self::MetarRecent => "metar_recent",
            Self::Taf => "taf",
            Self::Sigmet => "sigmet",
            Self::Airmet => "airmet",
            Self::Station => "station",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "metar" => Some(Self::Metar),
            "metar_recent" => Some(Self::MetarRecent),
            "taf" => Some(Self::Taf),
            "sigmet" => Some(Self::Sigmet),
            "airmet" => Some(Self::Airmet),
            "station" => Some(Self::Station),
            _ => None,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot detail level requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Full,
    Lite,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Lite => "lite",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub airport: AirportCode,
    pub dataset: Dataset,
    pub mode: CacheMode,
}

impl CacheKey {
    pub fn new(airport: AirportCode, dataset: Dataset, mode: CacheMode) -> Self {
        Self {
            airport,
            dataset,
            mode,
        }
    }

    /// Composite storage key, `AIRPORTCODE::DATASET::MODE`.
    pub fn composite(&self) -> String {
        format!("{}::{}::{}", self.airport, self.dataset, self.mode)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composite())
    }
}

/// The two advisory products cached per airport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardKind {
    Sigmet,
    Airmet,
}

impl HazardKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Sigmet => "sigmet",
            Self::Airmet => "airmet",
        }
    }
}

/// VFR/MVFR/IFR/LIFR classification reported with an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightCategory {
    Vfr,
    Mvfr,
    Ifr,
    Lifr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    #[serde(default)]
    pub degrees: Option<u16>,
    #[serde(default)]
    pub speed_kts: f64,
    #[serde(default)]
    pub gust_kts: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visibility {
    /// Prevailing visibility in statute miles
    #[serde(rename = "miles_float")]
    pub miles: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudLayer {
    /// SKC, CLR, FEW, SCT, BKN, OVC or VV
    pub code: String,
    #[serde(default)]
    pub base_feet_agl: Option<f64>,
}

impl CloudLayer {
    /// Broken, overcast and vertical-visibility layers form a ceiling.
    pub fn is_ceiling(&self) -> bool {
        matches!(self.code.as_str(), "BKN" | "OVC" | "VV")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ceiling {
    pub feet: f64,
}

/// Coded weather element such as `+TSRA` or a TAF change group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coded {
    pub code: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub celsius: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barometer {
    pub hg: f64,
}

fn lowest_ceiling(ceiling: Option<&Ceiling>, clouds: &[CloudLayer]) -> Option<f64> {
    let from_layers = clouds
        .iter()
        .filter(|layer| layer.is_ceiling())
        .filter_map(|layer| layer.base_feet_agl)
        .fold(None, |acc: Option<f64>, base| {
            Some(acc.map_or(base, |current| current.min(base)))
        });
    match (ceiling.map(|c| c.feet), from_layers) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Decoded current observation (METAR).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedMetar {
    pub icao: String,
    pub observed: DateTime<Utc>,
    pub raw_text: String,
    #[serde(default)]
    pub flight_category: Option<FlightCategory>,
    #[serde(default)]
    pub wind: Option<Wind>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub clouds: Vec<CloudLayer>,
    #[serde(default)]
    pub ceiling: Option<Ceiling>,
    #[serde(default)]
    pub conditions: Vec<Coded>,
    #[serde(default)]
    pub temperature: Option<Temperature>,
    #[serde(default)]
    pub dewpoint: Option<Temperature>,
    #[serde(default)]
    pub barometer: Option<Barometer>,
}

impl DecodedMetar {
    /// Height of the lowest broken/overcast layer in feet AGL.
    pub fn ceiling_feet(&self) -> Option<f64> {
        lowest_ceiling(self.ceiling.as_ref(), &self.clouds)
    }

    /// Observation age in fractional hours at `now`.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.observed).num_seconds().max(0) as f64) / 3600.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TafValidity {
    #[serde(default)]
    pub issued: Option<DateTime<Utc>>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl PeriodWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TafChange {
    #[serde(default)]
    pub indicator: Option<Coded>,
}

/// One forecast group inside a TAF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TafPeriod {
    pub timestamp: PeriodWindow,
    #[serde(default)]
    pub change: Option<TafChange>,
    #[serde(default)]
    pub wind: Option<Wind>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub clouds: Vec<CloudLayer>,
    #[serde(default)]
    pub ceiling: Option<Ceiling>,
    #[serde(default)]
    pub conditions: Vec<Coded>,
}

impl TafPeriod {
    pub fn ceiling_feet(&self) -> Option<f64> {
        lowest_ceiling(self.ceiling.as_ref(), &self.clouds)
    }

    pub fn change_code(&self) -> Option<&str> {
        self.change
            .as_ref()
            .and_then(|c| c.indicator.as_ref())
            .map(|i| i.code.as_str())
    }
}

/// Decoded terminal aerodrome forecast (TAF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedTaf {
    pub icao: String,
    pub raw_text: String,
    pub timestamp: TafValidity,
    #[serde(default)]
    pub forecast: Vec<TafPeriod>,
}

impl DecodedTaf {
    /// The most specific forecast group in effect at `at`.
    ///
    /// Change groups (BECMG/TEMPO/PROB) follow the base group in the
    /// decoded list, so the last group containing `at` wins.
    pub fn period_at(&self, at: DateTime<Utc>) -> Option<&TafPeriod> {
        self.forecast
            .iter()
            .filter(|p| p.timestamp.contains(at))
            .last()
    }

    /// The period in effect at `now`, or else the first one starting within `window`.
    pub fn nearest_period(&self, now: DateTime<Utc>, window: Duration) -> Option<&TafPeriod> {
        self.period_at(now).or_else(|| {
            self.forecast
                .iter()
                .filter(|p| p.timestamp.from > now && p.timestamp.from <= now + window)
                .min_by_key(|p| p.timestamp.from)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Elevation {
    pub feet: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
}

/// Station metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub icao: String,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub elevation: Option<Elevation>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// An active SIGMET or AIRMET affecting an airport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardAdvisory {
    pub icao: String,
    #[serde(default)]
    pub id: Option<String>,
    pub hazard: String,
    #[serde(default)]
    pub severity: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub raw_text: String,
}

impl HazardAdvisory {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now < self.valid_to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    fn period(from: DateTime<Utc>, to: DateTime<Utc>, change: Option<&str>) -> TafPeriod {
        TafPeriod {
            timestamp: PeriodWindow { from, to },
            change: change.map(|code| TafChange {
                indicator: Some(Coded {
                    code: code.to_string(),
                    text: None,
                }),
            }),
            wind: None,
            visibility: None,
            clouds: vec![],
            ceiling: None,
            conditions: vec![],
        }
    }

    #[test]
    fn test_airport_code_normalizes_case() {
        let code = AirportCode::parse("kjfk").unwrap();
        assert_eq!(code.as_str(), "KJFK");
        assert_eq!(code.to_string(), "KJFK");
    }

    #[test]
    fn test_airport_code_rejects_bad_input() {
        for bad in ["AB1", "KJF", "KJFKX", "", "K JF", "ÄBCD"] {
            let err = AirportCode::parse(bad).unwrap_err();
            assert!(
                matches!(err, ProviderError::InvalidAirportCode(ref s) if s == bad),
                "expected validation error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_airport_code_deserialize_validates() {
        let ok: AirportCode = serde_json::from_str("\"egll\"").unwrap();
        assert_eq!(ok.as_str(), "EGLL");
        assert!(serde_json::from_str::<AirportCode>("\"EG1L\"").is_err());
    }

    #[test]
    fn test_composite_key_format() {
        let key = CacheKey::new(
            AirportCode::parse("ksfo").unwrap(),
            Dataset::Taf,
            CacheMode::Lite,
        );
        assert_eq!(key.composite(), "KSFO::taf::lite");
    }

    #[test]
    fn test_dataset_parse_round_trips_names() {
        for dataset in [
            Dataset::Metar,
            Dataset::MetarRecent,
            Dataset::Taf,
            Dataset::Sigmet,
            Dataset::Airmet,
            Dataset::Station,
        ] {
            assert_eq!(Dataset::parse(dataset.as_str()), Some(dataset));
        }
        assert_eq!(Dataset::parse("pirep"), None);
    }

    #[test]
    fn test_ceiling_uses_lowest_broken_or_overcast() {
        let clouds = vec![
            CloudLayer {
                code: "FEW".into(),
                base_feet_agl: Some(400.0),
            },
            CloudLayer {
                code: "OVC".into(),
                base_feet_agl: Some(2500.0),
            },
            CloudLayer {
                code: "BKN".into(),
                base_feet_agl: Some(1200.0),
            },
        ];
        assert_eq!(lowest_ceiling(None, &clouds), Some(1200.0));
        assert_eq!(lowest_ceiling(Some(&Ceiling { feet: 900.0 }), &clouds), Some(900.0));
        assert_eq!(lowest_ceiling(None, &clouds[..1]), None);
    }

    #[test]
    fn test_period_at_prefers_change_group() {
        let taf = DecodedTaf {
            icao: "KBOS".into(),
            raw_text: String::new(),
            timestamp: TafValidity {
                issued: None,
                from: at(0, 0),
                to: at(23, 59),
            },
            forecast: vec![
                period(at(0, 0), at(12, 0), None),
                period(at(6, 0), at(9, 0), Some("TEMPO")),
                period(at(12, 0), at(23, 59), Some("FM")),
            ],
        };

        assert_eq!(taf.period_at(at(7, 0)).and_then(|p| p.change_code()), Some("TEMPO"));
        assert_eq!(taf.period_at(at(10, 0)).and_then(|p| p.change_code()), None);
        assert!(taf.period_at(at(23, 59)).is_none());
    }

    #[test]
    fn test_nearest_period_looks_ahead_within_window() {
        let taf = DecodedTaf {
            icao: "KBOS".into(),
            raw_text: String::new(),
            timestamp: TafValidity {
                issued: None,
                from: at(12, 0),
                to: at(23, 0),
            },
            forecast: vec![period(at(12, 0), at(23, 0), None)],
        };

        assert!(taf.nearest_period(at(9, 0), Duration::hours(6)).is_some());
        assert!(taf.nearest_period(at(3, 0), Duration::hours(6)).is_none());
    }

    #[test]
    fn test_metar_deserializes_provider_shape() {
        let json = serde_json::json!({
            "icao": "KJFK",
            "observed": "2026-03-14T12:51:00Z",
            "raw_text": "KJFK 141251Z 31015G25KT 10SM BKN035 OVC250 08/M03 A3001",
            "flight_category": "VFR",
            "wind": { "degrees": 310, "speed_kts": 15, "gust_kts": 25 },
            "visibility": { "miles": "10", "miles_float": 10.0 },
            "clouds": [
                { "code": "BKN", "base_feet_agl": 3500 },
                { "code": "OVC", "base_feet_agl": 25000 }
            ],
            "temperature": { "celsius": 8 },
            "dewpoint": { "celsius": -3 }
        });

        let metar: DecodedMetar = serde_json::from_value(json).unwrap();
        assert_eq!(metar.flight_category, Some(FlightCategory::Vfr));
        assert_eq!(metar.wind.as_ref().and_then(|w| w.gust_kts), Some(25.0));
        assert_eq!(metar.ceiling_feet(), Some(3500.0));
        assert!(metar.conditions.is_empty());
    }
}
