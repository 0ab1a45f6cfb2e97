//! Flight phase state machine.
//!
//! Phases are never stored: every call derives the phase from the schedule
//! and the current time.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use dispatchwx_core::RiskConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightPhase {
    Preflight,
    Planning,
    Departure,
    Enroute,
    Arrival,
}

impl FlightPhase {
    pub const ALL: [FlightPhase; 5] = [
        FlightPhase::Preflight,
        FlightPhase::Planning,
        FlightPhase::Departure,
        FlightPhase::Enroute,
        FlightPhase::Arrival,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Planning => "planning",
            Self::Departure => "departure",
            Self::Enroute => "enroute",
            Self::Arrival => "arrival",
        }
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time windows around the schedule that define each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseWindows {
    /// Planning starts this long before departure
    pub planning: Duration,
    pub departure_before: Duration,
    pub departure_after: Duration,
    /// Arrival starts this long before scheduled arrival
    pub arrival_before: Duration,
}

impl Default for PhaseWindows {
    fn default() -> Self {
        Self::from(&RiskConfig::default())
    }
}

impl From<&RiskConfig> for PhaseWindows {
    fn from(config: &RiskConfig) -> Self {
        Self {
            planning: Duration::hours(i64::from(config.planning_window_hours)),
            departure_before: Duration::minutes(i64::from(config.departure_window_before_minutes)),
            departure_after: Duration::minutes(i64::from(config.departure_window_after_minutes)),
            arrival_before: Duration::minutes(i64::from(config.arrival_window_before_minutes)),
        }
    }
}

/// Phase of a flight at `now`.
///
/// Without a schedule the flight is in preflight. Once airborne the arrival
/// window takes precedence over the tail of the departure window.
pub fn determine_phase(
    departure: Option<DateTime<Utc>>,
    arrival: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    windows: &PhaseWindows,
) -> FlightPhase {
    let in_arrival = |arr: DateTime<Utc>| now >= arr - windows.arrival_before;

    match (departure, arrival) {
        (None, None) => FlightPhase::Preflight,
        (None, Some(arr)) if in_arrival(arr) => FlightPhase::Arrival,
        (None, Some(_)) => FlightPhase::Preflight,
        (Some(dep), arr) => {
            if now < dep - windows.planning {
                FlightPhase::Preflight
            } else if now < dep - windows.departure_before {
                FlightPhase::Planning
            } else if now <= dep {
                FlightPhase::Departure
            } else if arr.is_some_and(in_arrival) {
                FlightPhase::Arrival
            } else if now <= dep + windows.departure_after {
                FlightPhase::Departure
            } else {
                FlightPhase::Enroute
            }
        }
    }
}
