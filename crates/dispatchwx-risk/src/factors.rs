//! Risk factor assessors.
//!
//! Each assessor scores one weather dimension from 0 (benign) to 100
//! (severe). The observation is preferred; when it lacks the input the
//! forecast period covering `now` is used at reduced confidence.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use dispatchwx_weather::{Coded, DecodedMetar, DecodedTaf, TafPeriod, Visibility, Wind};

/// Confidence when the observation supplies the input.
pub const OBSERVED_CONFIDENCE: f64 = 0.9;
/// Confidence when falling back to the forecast.
pub const FORECAST_CONFIDENCE: f64 = 0.7;
/// Confidence when neither source has the input.
pub const MISSING_CONFIDENCE: f64 = 0.3;
/// Score reported for an input nobody could supply.
pub const MISSING_SCORE: u8 = 25;
/// Ceiling score when no broken/overcast layer is reported.
pub const NO_CEILING_SCORE: u8 = 5;

/// How far ahead the trend assessor looks for a forecast period.
pub const TREND_WINDOW_HOURS: i64 = 6;

const WIND_TABLE: &[(f64, f64)] = &[
    (0.0, 0.0),
    (10.0, 10.0),
    (15.0, 25.0),
    (20.0, 45.0),
    (25.0, 60.0),
    (35.0, 85.0),
    (45.0, 100.0),
];

const GUST_SPREAD_TABLE: &[(f64, f64)] = &[
    (0.0, 0.0),
    (5.0, 5.0),
    (10.0, 15.0),
    (15.0, 25.0),
    (25.0, 35.0),
];

const VISIBILITY_TABLE: &[(f64, f64)] = &[
    (0.0, 100.0),
    (0.5, 95.0),
    (1.0, 85.0),
    (2.0, 65.0),
    (3.0, 50.0),
    (5.0, 25.0),
    (7.0, 10.0),
    (10.0, 0.0),
];

const CEILING_TABLE: &[(f64, f64)] = &[
    (0.0, 100.0),
    (200.0, 95.0),
    (500.0, 85.0),
    (1000.0, 60.0),
    (2000.0, 40.0),
    (3000.0, 25.0),
    (5000.0, 10.0),
    (12000.0, 0.0),
];

/// Forecast severity minus observed severity.
const TREND_TABLE: &[(f64, f64)] = &[
    (-100.0, 0.0),
    (0.0, 10.0),
    (10.0, 25.0),
    (25.0, 50.0),
    (50.0, 80.0),
    (75.0, 100.0),
];

/// Two-letter METAR weather groups.
const WEATHER_GROUPS: &[&str] = &[
    "MI", "PR", "BC", "DR", "BL", "SH", "TS", "FZ", "DZ", "RA", "SN", "SG", "IC", "PL", "GR",
    "GS", "UP", "BR", "FG", "FU", "VA", "DU", "SA", "HZ", "PY", "PO", "SQ", "FC", "SS", "DS",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactorKind {
    SurfaceWind,
    Visibility,
    Ceiling,
    Precipitation,
    TrendStability,
}

impl RiskFactorKind {
    pub const ALL: [RiskFactorKind; 5] = [
        RiskFactorKind::SurfaceWind,
        RiskFactorKind::Visibility,
        RiskFactorKind::Ceiling,
        RiskFactorKind::Precipitation,
        RiskFactorKind::TrendStability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SurfaceWind => "surface_wind",
            Self::Visibility => "visibility",
            Self::Ceiling => "ceiling",
            Self::Precipitation => "precipitation",
            Self::TrendStability => "trend_stability",
        }
    }
}

impl fmt::Display for RiskFactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactorResult {
    pub factor: RiskFactorKind,
    /// 0-100, higher is worse
    pub score: u8,
    /// Weight applied by the aggregator; the preflight weight until then
    pub weight: f64,
    pub confidence: f64,
    pub rationale: String,
}

impl RiskFactorResult {
    fn new(factor: RiskFactorKind, score: f64, confidence: f64, rationale: String) -> Self {
        Self {
            factor,
            score: to_score(score),
            weight: crate::aggregate::FactorWeights::default().weight(factor),
            confidence,
            rationale,
        }
    }

    fn missing(factor: RiskFactorKind, what: &str) -> Self {
        Self::new(
            factor,
            f64::from(MISSING_SCORE),
            MISSING_CONFIDENCE,
            format!("no {} reported", what),
        )
    }
}

/// Everything an assessor may look at for one airport.
#[derive(Debug, Clone, Copy)]
pub struct FactorInputs<'a> {
    pub icao: &'a str,
    pub metar: Option<&'a DecodedMetar>,
    pub taf: Option<&'a DecodedTaf>,
    pub now: DateTime<Utc>,
}

impl<'a> FactorInputs<'a> {
    fn current_period(&self) -> Option<&'a TafPeriod> {
        self.taf.and_then(|t| t.period_at(self.now))
    }

    /// Observation value if present, else the current forecast value.
    fn pick<T>(
        &self,
        observed: impl Fn(&'a DecodedMetar) -> Option<T>,
        forecast: impl Fn(&'a TafPeriod) -> Option<T>,
    ) -> Option<(T, f64, &'static str)> {
        if let Some(value) = self.metar.and_then(&observed) {
            return Some((value, OBSERVED_CONFIDENCE, "observed"));
        }
        self.current_period()
            .and_then(&forecast)
            .map(|value| (value, FORECAST_CONFIDENCE, "forecast"))
    }
}

/// Piecewise-linear lookup, clamped to the table's ends.
pub fn interpolate(x: f64, table: &[(f64, f64)]) -> f64 {
    let (Some(&(x0, y0)), Some(&(xn, yn))) = (table.first(), table.last()) else {
        return 0.0;
    };
    if x <= x0 {
        return y0;
    }
    if x >= xn {
        return yn;
    }
    for pair in table.windows(2) {
        let ((xa, ya), (xb, yb)) = (pair[0], pair[1]);
        if x <= xb {
            let t = (x - xa) / (xb - xa);
            return ya + t * (yb - ya);
        }
    }
    yn
}

fn to_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

fn wind_severity(wind: &Wind) -> f64 {
    let spread = wind.gust_kts.map_or(0.0, |g| (g - wind.speed_kts).max(0.0));
    (interpolate(wind.speed_kts, WIND_TABLE) + interpolate(spread, GUST_SPREAD_TABLE)).min(100.0)
}

fn visibility_severity(visibility: &Visibility) -> f64 {
    interpolate(visibility.miles, VISIBILITY_TABLE)
}

fn ceiling_severity(ceiling_feet: Option<f64>) -> f64 {
    match ceiling_feet {
        Some(feet) => interpolate(feet, CEILING_TABLE),
        None => f64::from(NO_CEILING_SCORE),
    }
}

pub fn assess_wind(inputs: &FactorInputs<'_>) -> RiskFactorResult {
    let kind = RiskFactorKind::SurfaceWind;
    let Some((wind, confidence, source)) =
        inputs.pick(|m| m.wind.as_ref(), |p| p.wind.as_ref())
    else {
        return RiskFactorResult::missing(kind, "wind");
    };

    let rationale = match wind.gust_kts {
        Some(gust) => format!("{:.0} kt gusting {:.0} kt ({})", wind.speed_kts, gust, source),
        None => format!("{:.0} kt sustained ({})", wind.speed_kts, source),
    };
    RiskFactorResult::new(kind, wind_severity(wind), confidence, rationale)
}

pub fn assess_visibility(inputs: &FactorInputs<'_>) -> RiskFactorResult {
    let kind = RiskFactorKind::Visibility;
    let Some((visibility, confidence, source)) =
        inputs.pick(|m| m.visibility.as_ref(), |p| p.visibility.as_ref())
    else {
        return RiskFactorResult::missing(kind, "visibility");
    };

    RiskFactorResult::new(
        kind,
        visibility_severity(visibility),
        confidence,
        format!("{:.1} SM visibility ({})", visibility.miles, source),
    )
}

/// Lowest broken/overcast/obscured layer. A report without one scores minimal.
pub fn assess_ceiling(inputs: &FactorInputs<'_>) -> RiskFactorResult {
    let kind = RiskFactorKind::Ceiling;
    let (ceiling, confidence, source) = if let Some(metar) = inputs.metar {
        (metar.ceiling_feet(), OBSERVED_CONFIDENCE, "observed")
    } else if let Some(period) = inputs.current_period() {
        (period.ceiling_feet(), FORECAST_CONFIDENCE, "forecast")
    } else {
        return RiskFactorResult::missing(kind, "cloud layers");
    };

    let rationale = match ceiling {
        Some(feet) => format!("ceiling {:.0} ft ({})", feet, source),
        None => format!("no ceiling ({})", source),
    };
    RiskFactorResult::new(kind, ceiling_severity(ceiling), confidence, rationale)
}

/// Severity of one weather token such as `+TSRA` or `-FZDZ`, if it is one.
pub fn weather_token_severity(token: &str) -> Option<f64> {
    let (body, intensity) = if let Some(rest) = token.strip_prefix('+') {
        (rest, 15.0)
    } else if let Some(rest) = token.strip_prefix('-') {
        (rest, -10.0)
    } else {
        (token, 0.0)
    };
    let (body, vicinity) = match body.strip_prefix("VC") {
        Some(rest) => (rest, true),
        None => (body, false),
    };
    if body.is_empty() || body.len() % 2 != 0 || !body.is_ascii() {
        return None;
    }

    let groups: Vec<&str> = (0..body.len()).step_by(2).map(|i| &body[i..i + 2]).collect();
    if !groups.iter().all(|g| WEATHER_GROUPS.contains(g)) {
        return None;
    }
    let has = |code: &str| groups.contains(&code);

    let mut base: f64 = 0.0;
    if has("RA") || has("DZ") || has("UP") {
        base = base.max(35.0);
    }
    if has("SN") || has("SG") || has("PL") || has("IC") {
        base = base.max(55.0);
    }
    if has("FZ") && (has("RA") || has("DZ")) {
        base = base.max(80.0);
    }
    if has("TS") {
        base = base.max(85.0);
    }
    if has("GR") || has("GS") {
        base = base.max(90.0);
    }
    if base == 0.0 {
        return Some(0.0);
    }
    if has("SH") {
        base += 10.0;
    }
    let mut severity = base + intensity;
    if vicinity {
        severity *= 0.5;
    }
    Some(severity.clamp(0.0, 100.0))
}

fn conditions_severity(conditions: &[Coded]) -> Option<f64> {
    conditions
        .iter()
        .filter_map(|c| weather_token_severity(&c.code))
        .reduce(f64::max)
}

/// Worst weather token in raw report text, up to the remarks.
fn raw_text_severity(raw: &str) -> Option<f64> {
    raw.split_whitespace()
        .take_while(|t| *t != "RMK")
        .filter_map(weather_token_severity)
        .reduce(f64::max)
}

fn metar_precipitation(metar: &DecodedMetar) -> f64 {
    conditions_severity(&metar.conditions)
        .or_else(|| raw_text_severity(&metar.raw_text))
        .unwrap_or(0.0)
}

fn period_precipitation(period: &TafPeriod) -> f64 {
    conditions_severity(&period.conditions).unwrap_or(0.0)
}

pub fn assess_precipitation(inputs: &FactorInputs<'_>) -> RiskFactorResult {
    let kind = RiskFactorKind::Precipitation;
    let (score, codes, confidence, source) = if let Some(metar) = inputs.metar {
        (
            metar_precipitation(metar),
            &metar.conditions,
            OBSERVED_CONFIDENCE,
            "observed",
        )
    } else if let Some(period) = inputs.current_period() {
        (
            period_precipitation(period),
            &period.conditions,
            FORECAST_CONFIDENCE,
            "forecast",
        )
    } else {
        return RiskFactorResult::missing(kind, "present weather");
    };

    let rationale = if score == 0.0 {
        format!("no significant precipitation ({})", source)
    } else if codes.is_empty() {
        format!("precipitation in report text ({})", source)
    } else {
        let joined = codes.iter().map(|c| c.code.as_str()).collect::<Vec<_>>().join(" ");
        format!("{} ({})", joined, source)
    };
    RiskFactorResult::new(kind, score, confidence, rationale)
}

fn metar_severity(metar: &DecodedMetar) -> f64 {
    [
        metar.wind.as_ref().map_or(0.0, wind_severity),
        metar.visibility.as_ref().map_or(0.0, visibility_severity),
        ceiling_severity(metar.ceiling_feet()),
        metar_precipitation(metar),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

fn period_severity(period: &TafPeriod) -> f64 {
    [
        period.wind.as_ref().map_or(0.0, wind_severity),
        period.visibility.as_ref().map_or(0.0, visibility_severity),
        ceiling_severity(period.ceiling_feet()),
        period_precipitation(period),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

/// Forecast deterioration between now and the nearest period within 6h.
pub fn assess_trend(inputs: &FactorInputs<'_>) -> RiskFactorResult {
    let kind = RiskFactorKind::TrendStability;
    let Some(metar) = inputs.metar else {
        return RiskFactorResult::missing(kind, "observation to compare");
    };
    let Some(period) = inputs
        .taf
        .and_then(|t| t.nearest_period(inputs.now, Duration::hours(TREND_WINDOW_HOURS)))
    else {
        return RiskFactorResult::missing(kind, "forecast period within 6h");
    };

    let delta = period_severity(period) - metar_severity(metar);
    // Temporary and probabilistic groups are less certain than a base forecast.
    let confidence = match period.change_code() {
        Some(code) if code.starts_with("TEMPO") || code.starts_with("PROB") => 0.6,
        _ => 0.8,
    };
    let rationale = if delta > 0.0 {
        format!("forecast deteriorates by {:.0}", delta)
    } else if delta < 0.0 {
        format!("forecast improves by {:.0}", -delta)
    } else {
        "forecast steady".to_string()
    };
    RiskFactorResult::new(kind, interpolate(delta, TREND_TABLE), confidence, rationale)
}

/// Run every assessor, in `RiskFactorKind::ALL` order.
pub fn assess_all(inputs: &FactorInputs<'_>) -> Vec<RiskFactorResult> {
    let results = vec![
        assess_wind(inputs),
        assess_visibility(inputs),
        assess_ceiling(inputs),
        assess_precipitation(inputs),
        assess_trend(inputs),
    ];
    tracing::debug!(
        "Assessed {}: {}",
        inputs.icao,
        results
            .iter()
            .map(|r| format!("{}={}", r.factor, r.score))
            .collect::<Vec<_>>()
            .join(" ")
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn metar(extra: serde_json::Value) -> DecodedMetar {
        let mut base = serde_json::json!({
            "icao": "KBOS",
            "observed": now() - Duration::minutes(10),
            "raw_text": "KBOS 141150Z 18005KT 10SM CLR 12/03 A3012",
        });
        if let (Some(target), Some(fields)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base).unwrap()
    }

    fn taf(periods: serde_json::Value) -> DecodedTaf {
        serde_json::from_value(serde_json::json!({
            "icao": "KBOS",
            "raw_text": "TAF KBOS",
            "timestamp": { "from": now() - Duration::hours(1), "to": now() + Duration::hours(23) },
            "forecast": periods,
        }))
        .unwrap()
    }

    fn inputs<'a>(metar: Option<&'a DecodedMetar>, taf: Option<&'a DecodedTaf>) -> FactorInputs<'a> {
        FactorInputs {
            icao: "KBOS",
            metar,
            taf,
            now: now(),
        }
    }

    #[test]
    fn test_interpolate() {
        assert_eq!(interpolate(-5.0, WIND_TABLE), 0.0);
        assert_eq!(interpolate(12.5, WIND_TABLE), 17.5);
        assert_eq!(interpolate(60.0, WIND_TABLE), 100.0);
        assert_eq!(interpolate(1.0, &[]), 0.0);
    }

    #[test]
    fn test_wind_scores_speed_and_gust_spread() {
        let calm = metar(serde_json::json!({ "wind": { "speed_kts": 5 } }));
        let gusty = metar(serde_json::json!({ "wind": { "speed_kts": 20, "gust_kts": 35 } }));

        let calm_result = assess_wind(&inputs(Some(&calm), None));
        let gusty_result = assess_wind(&inputs(Some(&gusty), None));

        assert_eq!(calm_result.score, 5);
        assert_eq!(gusty_result.score, 70);
        assert_eq!(gusty_result.confidence, OBSERVED_CONFIDENCE);
        assert!(gusty_result.rationale.contains("gusting 35"));
    }

    #[test]
    fn test_wind_falls_back_to_forecast() {
        let bare = metar(serde_json::json!({}));
        let forecast = taf(serde_json::json!([{
            "timestamp": { "from": now() - Duration::hours(1), "to": now() + Duration::hours(5) },
            "wind": { "speed_kts": 25 }
        }]));

        let result = assess_wind(&inputs(Some(&bare), Some(&forecast)));
        assert_eq!(result.score, 60);
        assert_eq!(result.confidence, FORECAST_CONFIDENCE);
    }

    #[test]
    fn test_missing_input_has_low_confidence() {
        let result = assess_visibility(&inputs(None, None));
        assert_eq!(result.score, MISSING_SCORE);
        assert_eq!(result.confidence, MISSING_CONFIDENCE);
    }

    #[test]
    fn test_visibility_inverse() {
        let low = metar(serde_json::json!({ "visibility": { "miles_float": 0.25 } }));
        let high = metar(serde_json::json!({ "visibility": { "miles_float": 10.0 } }));
        assert!(assess_visibility(&inputs(Some(&low), None)).score >= 95);
        assert_eq!(assess_visibility(&inputs(Some(&high), None)).score, 0);
    }

    #[test]
    fn test_ceiling_uses_lowest_broken_layer() {
        let low = metar(serde_json::json!({ "clouds": [
            { "code": "FEW", "base_feet_agl": 300 },
            { "code": "BKN", "base_feet_agl": 1000 },
            { "code": "OVC", "base_feet_agl": 2500 }
        ]}));
        let clear = metar(serde_json::json!({ "clouds": [ { "code": "FEW", "base_feet_agl": 3000 } ] }));

        let result = assess_ceiling(&inputs(Some(&low), None));
        assert_eq!(result.score, 60);
        assert!(result.rationale.contains("1000 ft"));
        assert_eq!(assess_ceiling(&inputs(Some(&clear), None)).score, NO_CEILING_SCORE);
    }

    #[test]
    fn test_weather_token_severity() {
        assert_eq!(weather_token_severity("RA"), Some(35.0));
        assert_eq!(weather_token_severity("-RA"), Some(25.0));
        assert_eq!(weather_token_severity("+TSRA"), Some(100.0));
        assert_eq!(weather_token_severity("TSRA"), Some(85.0));
        assert_eq!(weather_token_severity("-FZDZ"), Some(70.0));
        assert_eq!(weather_token_severity("SHSN"), Some(65.0));
        assert_eq!(weather_token_severity("VCSH"), Some(0.0));
        assert_eq!(weather_token_severity("BR"), Some(0.0));
        assert_eq!(weather_token_severity("KBOS"), None);
        assert_eq!(weather_token_severity("A3012"), None);
    }

    #[test]
    fn test_precipitation_from_raw_text_when_no_codes() {
        let stormy = metar(serde_json::json!({
            "raw_text": "KBOS 141150Z 22015G25KT 2SM +TSRA BKN008CB 18/16 A2990 RMK GR"
        }));
        let result = assess_precipitation(&inputs(Some(&stormy), None));
        assert_eq!(result.score, 100);
        assert!(result.rationale.contains("report text"));
    }

    #[test]
    fn test_precipitation_prefers_condition_codes() {
        let snowy = metar(serde_json::json!({
            "conditions": [ { "code": "-SN", "text": "Light Snow" }, { "code": "BR" } ]
        }));
        let result = assess_precipitation(&inputs(Some(&snowy), None));
        assert_eq!(result.score, 45);
        assert!(result.rationale.starts_with("-SN BR"));
    }

    #[test]
    fn test_trend_detects_deterioration() {
        let fine = metar(serde_json::json!({
            "wind": { "speed_kts": 5 },
            "visibility": { "miles_float": 10.0 }
        }));
        let worsening = taf(serde_json::json!([
            {
                "timestamp": { "from": now() - Duration::hours(1), "to": now() + Duration::hours(2) },
                "visibility": { "miles_float": 10.0 }
            },
            {
                "timestamp": { "from": now() + Duration::hours(2), "to": now() + Duration::hours(8) },
                "visibility": { "miles_float": 1.0 },
                "clouds": [ { "code": "OVC", "base_feet_agl": 400 } ]
            }
        ]));

        let steady = assess_trend(&inputs(Some(&fine), Some(&worsening)));
        assert_eq!(steady.score, 10);

        let later = FactorInputs {
            now: now() + Duration::hours(3),
            ..inputs(Some(&fine), Some(&worsening))
        };
        let result = assess_trend(&later);
        assert!(result.score >= 80, "score {}", result.score);
        assert!(result.rationale.contains("deteriorates"));
    }

    #[test]
    fn test_trend_without_forecast_is_low_confidence() {
        let fine = metar(serde_json::json!({}));
        let result = assess_trend(&inputs(Some(&fine), None));
        assert_eq!(result.confidence, MISSING_CONFIDENCE);
    }

    #[test]
    fn test_assess_all_order() {
        let results = assess_all(&inputs(None, None));
        let kinds: Vec<RiskFactorKind> = results.iter().map(|r| r.factor).collect();
        assert_eq!(kinds, RiskFactorKind::ALL.to_vec());
    }
}
