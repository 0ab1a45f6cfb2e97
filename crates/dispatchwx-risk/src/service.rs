//! Flight-level weather risk.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use dispatchwx_weather::{
    AirfieldWeatherSnapshot, AirportCode, CacheMode, WeatherService, WeatherServiceError,
};

use crate::aggregate::{aggregate, AggregatedRisk};
use crate::combine::{combine, AlertLevel, CombinedFlightRisk};
use crate::error::{FlightRiskError, FlightStoreError};
use crate::factors::{assess_all, FactorInputs};
use crate::flight::{validate_identifiers, FlightStore, FlightWeatherSnapshot};
use crate::phase::{determine_phase, FlightPhase, PhaseWindows};

/// Confidence penalty per missing core dataset (observation or forecast).
pub const MISSING_INPUT_PENALTY: f64 = 0.25;

/// Risk answer for a flight leg pair, with messaging for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightRiskReport {
    pub account_id: Option<String>,
    pub flight_id: Option<String>,
    pub origin: AirportCode,
    pub destination: AirportCode,
    pub computed_at: DateTime<Utc>,
    pub risk: CombinedFlightRisk,
    pub headline: String,
    pub details: Vec<String>,
    pub origin_weather: Option<AirfieldWeatherSnapshot>,
    pub destination_weather: Option<AirfieldWeatherSnapshot>,
}

impl FlightRiskReport {
    pub fn weather_snapshot(&self) -> FlightWeatherSnapshot {
        FlightWeatherSnapshot {
            computed_at: self.computed_at,
            alert_level: self.risk.alert_level,
            headline: self.headline.clone(),
            risk: self.risk.clone(),
        }
    }
}

#[derive(Clone)]
pub struct FlightRiskService {
    weather: WeatherService,
    flights: Arc<dyn FlightStore>,
    windows: PhaseWindows,
}

impl FlightRiskService {
    pub fn new(weather: WeatherService, flights: Arc<dyn FlightStore>, windows: PhaseWindows) -> Self {
        Self {
            weather,
            flights,
            windows,
        }
    }

    pub fn flights(&self) -> &Arc<dyn FlightStore> {
        &self.flights
    }

    /// Risk for a stored flight; the result is written back to the flight.
    pub async fn get_flight_risk(
        &self,
        account_id: &str,
        flight_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FlightRiskReport, FlightRiskError> {
        validate_identifiers(account_id, flight_id).map_err(|e| match e {
            FlightStoreError::Validation(message) => FlightRiskError::Validation(message),
            other => FlightRiskError::Store(other),
        })?;

        let flight = self
            .flights
            .load_flight(account_id, flight_id)?
            .ok_or_else(|| FlightRiskError::FlightNotFound {
                account_id: account_id.to_string(),
                flight_id: flight_id.to_string(),
            })?;

        let mut report = self
            .assess(
                &flight.origin,
                &flight.destination,
                flight.scheduled_departure,
                flight.scheduled_arrival,
                now,
            )
            .await?;
        report.account_id = Some(flight.account_id.clone());
        report.flight_id = Some(flight.flight_id.clone());

        match self
            .flights
            .save_weather_snapshot(&flight.account_id, &flight.flight_id, &report.weather_snapshot())
        {
            Ok(()) => tracing::info!(
                "Saved weather snapshot for {}/{}: {} ({})",
                flight.account_id,
                flight.flight_id,
                report.risk.combined_score,
                report.risk.alert_level
            ),
            Err(e) => tracing::warn!(
                "Failed to save weather snapshot for {}/{}: {}",
                flight.account_id,
                flight.flight_id,
                e
            ),
        }

        Ok(report)
    }

    /// Risk for an ad-hoc route that is not stored.
    pub async fn assess_route(
        &self,
        origin: &str,
        destination: &str,
        departure: Option<DateTime<Utc>>,
        arrival: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<FlightRiskReport, FlightRiskError> {
        let origin = parse_airport(origin)?;
        let destination = parse_airport(destination)?;
        self.assess(&origin, &destination, departure, arrival, now).await
    }

    async fn assess(
        &self,
        origin: &AirportCode,
        destination: &AirportCode,
        departure: Option<DateTime<Utc>>,
        arrival: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<FlightRiskReport, FlightRiskError> {
        let phase = determine_phase(departure, arrival, now, &self.windows);
        tracing::debug!("Assessing {} to {} in {} phase", origin, destination, phase);

        let (origin_weather, destination_weather) = tokio::join!(
            self.weather
                .get_airfield_weather_snapshot(origin.as_str(), CacheMode::Lite),
            self.weather
                .get_airfield_weather_snapshot(destination.as_str(), CacheMode::Lite),
        );

        // Partial data beats no answer. Only a route whose provider could not
        // be reached for either airport fails; airports with nothing reported
        // are scored as missing data.
        let (origin_weather, destination_weather) = match (origin_weather, destination_weather) {
            (Err(e), Err(other)) if e.is_unreachable() && other.is_unreachable() => {
                return Err(e.into())
            }
            (o, d) => (usable(origin, o)?, usable(destination, d)?),
        };

        let risk = combine(
            phase,
            leg_risk(origin, origin_weather.as_ref(), phase, now),
            leg_risk(destination, destination_weather.as_ref(), phase, now),
        );
        let headline = headline(origin, destination, &risk);
        let details = details(&risk, origin_weather.as_ref(), destination_weather.as_ref());

        Ok(FlightRiskReport {
            account_id: None,
            flight_id: None,
            origin: origin.clone(),
            destination: destination.clone(),
            computed_at: now,
            risk,
            headline,
            details,
            origin_weather,
            destination_weather,
        })
    }
}

fn parse_airport(code: &str) -> Result<AirportCode, FlightRiskError> {
    AirportCode::parse(code)
        .map_err(|e| FlightRiskError::Weather(WeatherServiceError::InvalidAirportCode(e)))
}

/// Keep an unavailable leg as absent; anything else is a real failure.
fn usable(
    code: &AirportCode,
    result: Result<AirfieldWeatherSnapshot, WeatherServiceError>,
) -> Result<Option<AirfieldWeatherSnapshot>, FlightRiskError> {
    match result {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e @ WeatherServiceError::Unavailable { .. }) => {
            tracing::warn!("Scoring {} without weather: {}", code, e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn leg_risk(
    code: &AirportCode,
    weather: Option<&AirfieldWeatherSnapshot>,
    phase: FlightPhase,
    now: DateTime<Utc>,
) -> AggregatedRisk {
    let inputs = FactorInputs {
        icao: code.as_str(),
        metar: weather.and_then(|w| w.observation()),
        taf: weather.and_then(|w| w.forecast()),
        now,
    };
    let datasets_available = weather.map_or(0, |w| w.datasets_available());
    let data_age_hours = inputs.metar.map_or(0.0, |m| m.age_hours(now));
    let missing = 2usize.saturating_sub(datasets_available) as f64;

    aggregate(
        code.as_str(),
        phase,
        assess_all(&inputs),
        datasets_available,
        data_age_hours,
        missing * MISSING_INPUT_PENALTY,
        false,
    )
}

fn headline(origin: &AirportCode, destination: &AirportCode, risk: &CombinedFlightRisk) -> String {
    let route = format!("{} to {}", origin, destination);
    match risk.alert_level {
        AlertLevel::Green => format!("On track: low weather risk for {}", route),
        AlertLevel::Yellow => format!("Monitor: elevated weather risk for {}", route),
        AlertLevel::Red => format!("Alert: high disruption risk for {}", route),
    }
}

fn leg_line(label: &str, leg: &AggregatedRisk, weather: Option<&AirfieldWeatherSnapshot>) -> String {
    let mut line = format!(
        "{} {}: score {} ({}, confidence {:.2})",
        label,
        leg.airport,
        leg.score,
        leg.tier.label(),
        leg.confidence
    );
    match weather {
        None => line.push_str("; no weather available"),
        Some(w) if w.datasets_available() < 2 => {
            let absent = if w.metar.is_none() { "observation" } else { "forecast" };
            line.push_str(&format!("; {} unavailable", absent));
        }
        Some(_) => {}
    }
    if let Some(top) = leg.dominant_factor() {
        line.push_str(&format!("; main driver {} {} ({})", top.factor, top.score, top.rationale));
    }
    line
}

fn details(
    risk: &CombinedFlightRisk,
    origin_weather: Option<&AirfieldWeatherSnapshot>,
    destination_weather: Option<&AirfieldWeatherSnapshot>,
) -> Vec<String> {
    vec![
        format!(
            "Combined score {} ({}) in {} phase, weights {:.2}/{:.2}, confidence {:.2}",
            risk.combined_score,
            risk.combined_tier.label(),
            risk.phase,
            risk.weights.origin,
            risk.weights.destination,
            risk.combined_confidence
        ),
        leg_line("Origin", &risk.origin_risk, origin_weather),
        leg_line("Destination", &risk.destination_risk, destination_weather),
    ]
}
