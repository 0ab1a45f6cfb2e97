//! Flight weather risk for dispatchwx
//!
//! Scores surface wind, visibility, ceiling, precipitation and forecast
//! trend at each airport, aggregates them per flight phase and blends the
//! origin and destination into one flight-level alert.

pub mod aggregate;
pub mod combine;
pub mod error;
pub mod factors;
pub mod flight;
pub mod phase;
pub mod service;

pub use aggregate::{aggregate, age_factor, tier_for_score, AggregatedRisk, FactorWeights, RiskTier};
pub use combine::{combine, AlertLevel, CombinedFlightRisk, PhaseWeights};
pub use error::{FlightRiskError, FlightStoreError, FlightStoreResult};
pub use factors::{assess_all, FactorInputs, RiskFactorKind, RiskFactorResult};
pub use flight::{FlightRecord, FlightStore, FlightWeatherSnapshot, SqliteFlightStore};
pub use phase::{determine_phase, FlightPhase, PhaseWindows};
pub use service::{FlightRiskReport, FlightRiskService};
