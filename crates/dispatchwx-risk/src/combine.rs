//! Blends origin and destination risk into one flight-level risk.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::{round2, tier_for_score, AggregatedRisk, RiskTier};
use crate::phase::FlightPhase;

/// Fixed confidence penalty for combining two independent estimates.
pub const COMBINED_CONFIDENCE_FACTOR: f64 = 0.95;

/// Worst-case alert across both legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Green,
    Yellow,
    Red,
}

impl AlertLevel {
    pub fn for_tier(tier: RiskTier) -> Self {
        match tier {
            RiskTier::OnTrack => Self::Green,
            RiskTier::Monitor => Self::Yellow,
            RiskTier::HighDisruption => Self::Red,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Share of the combined score given to each leg. Sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseWeights {
    pub origin: f64,
    pub destination: f64,
}

impl PhaseWeights {
    pub fn for_phase(phase: FlightPhase) -> Self {
        let (origin, destination) = match phase {
            FlightPhase::Preflight => (0.50, 0.50),
            FlightPhase::Planning => (0.60, 0.40),
            FlightPhase::Departure => (0.75, 0.25),
            FlightPhase::Enroute => (0.30, 0.70),
            FlightPhase::Arrival => (0.25, 0.75),
        };
        Self {
            origin,
            destination,
        }
    }

    /// Weighted score rounded half up, in whole percent to avoid float drift.
    pub fn blend(&self, origin_score: u8, destination_score: u8) -> u8 {
        let origin_pct = (self.origin * 100.0).round() as u32;
        let destination_pct = (self.destination * 100.0).round() as u32;
        let total = u32::from(origin_score) * origin_pct
            + u32::from(destination_score) * destination_pct;
        ((total + 50) / 100).min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedFlightRisk {
    pub combined_score: u8,
    pub combined_tier: RiskTier,
    pub combined_confidence: f64,
    pub alert_level: AlertLevel,
    pub phase: FlightPhase,
    pub weights: PhaseWeights,
    pub origin_risk: AggregatedRisk,
    pub destination_risk: AggregatedRisk,
}

/// Combine two airport risks computed for the same phase.
///
/// The tier follows the blended score while the alert level follows the
/// worse leg, so the two can disagree.
pub fn combine(
    phase: FlightPhase,
    origin_risk: AggregatedRisk,
    destination_risk: AggregatedRisk,
) -> CombinedFlightRisk {
    let weights = PhaseWeights::for_phase(phase);
    let combined_score = weights.blend(origin_risk.score, destination_risk.score);
    let combined_confidence = round2(
        origin_risk.confidence.min(destination_risk.confidence) * COMBINED_CONFIDENCE_FACTOR,
    );
    let alert_level = AlertLevel::for_tier(origin_risk.tier.max(destination_risk.tier));

    CombinedFlightRisk {
        combined_score,
        combined_tier: tier_for_score(combined_score),
        combined_confidence,
        alert_level,
        phase,
        weights,
        origin_risk,
        destination_risk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(airport: &str, score: u8, confidence: f64) -> AggregatedRisk {
        AggregatedRisk {
            airport: airport.to_string(),
            phase: FlightPhase::Enroute,
            score,
            tier: tier_for_score(score),
            confidence,
            factors: Vec::new(),
        }
    }

    #[test]
    fn test_enroute_scenario_diverges_tier_and_alert() {
        let combined = combine(
            FlightPhase::Enroute,
            leg("KBOS", 20, 0.8),
            leg("KORD", 75, 0.6),
        );

        assert_eq!(combined.combined_score, 59);
        assert_eq!(combined.combined_tier, RiskTier::Monitor);
        assert_eq!(combined.alert_level, AlertLevel::Red);
        assert_eq!(combined.combined_confidence, 0.57);
    }

    #[test]
    fn test_weights_sum_to_one() {
        for phase in FlightPhase::ALL {
            let w = PhaseWeights::for_phase(phase);
            assert!((w.origin + w.destination - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_blend_rounds_half_up() {
        // 25 * 0.5 + 0 * 0.5 = 12.5
        assert_eq!(PhaseWeights::for_phase(FlightPhase::Preflight).blend(25, 0), 13);
        assert_eq!(PhaseWeights::for_phase(FlightPhase::Departure).blend(100, 100), 100);
    }

    #[test]
    fn test_red_whenever_either_leg_high() {
        for phase in FlightPhase::ALL {
            let a = combine(phase, leg("KBOS", 90, 0.9), leg("KORD", 0, 0.9));
            let b = combine(phase, leg("KBOS", 0, 0.9), leg("KORD", 90, 0.9));
            assert_eq!(a.alert_level, AlertLevel::Red);
            assert_eq!(b.alert_level, AlertLevel::Red);
        }
    }

    #[test]
    fn test_alert_levels() {
        let green = combine(FlightPhase::Planning, leg("KBOS", 10, 0.9), leg("KORD", 30, 0.9));
        let yellow = combine(FlightPhase::Planning, leg("KBOS", 10, 0.9), leg("KORD", 31, 0.9));
        assert_eq!(green.alert_level, AlertLevel::Green);
        assert_eq!(yellow.alert_level, AlertLevel::Yellow);
    }
}
