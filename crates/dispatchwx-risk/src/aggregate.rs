//! Per-airport risk aggregation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::factors::{RiskFactorKind, RiskFactorResult};
use crate::phase::FlightPhase;

pub const ON_TRACK_MAX_SCORE: u8 = 30;
pub const MONITOR_MAX_SCORE: u8 = 60;

/// Confidence multiplier when fewer than two datasets were available.
pub const SPARSE_DATA_FACTOR: f64 = 0.85;
/// Confidence lost per hour of observation age.
pub const AGE_DECAY_PER_HOUR: f64 = 0.1;
/// Lowest the age factor can go.
pub const AGE_FACTOR_FLOOR: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    OnTrack,
    Monitor,
    HighDisruption,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTrack => "on_track",
            Self::Monitor => "monitor",
            Self::HighDisruption => "high_disruption",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::OnTrack => "on track",
            Self::Monitor => "monitor",
            Self::HighDisruption => "high disruption",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn tier_for_score(score: u8) -> RiskTier {
    if score <= ON_TRACK_MAX_SCORE {
        RiskTier::OnTrack
    } else if score <= MONITOR_MAX_SCORE {
        RiskTier::Monitor
    } else {
        RiskTier::HighDisruption
    }
}

/// Factor weights for one flight phase. They sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub surface_wind: f64,
    pub visibility: f64,
    pub ceiling: f64,
    pub precipitation: f64,
    pub trend_stability: f64,
}

impl FactorWeights {
    /// Wind and ceiling matter most near the runway; trend matters most
    /// while planning.
    pub fn for_phase(phase: FlightPhase) -> Self {
        let (surface_wind, visibility, ceiling, precipitation, trend_stability) = match phase {
            FlightPhase::Preflight => (0.25, 0.20, 0.20, 0.20, 0.15),
            FlightPhase::Planning => (0.20, 0.20, 0.20, 0.15, 0.25),
            FlightPhase::Departure | FlightPhase::Arrival => (0.30, 0.20, 0.25, 0.15, 0.10),
            FlightPhase::Enroute => (0.20, 0.20, 0.20, 0.25, 0.15),
        };
        Self {
            surface_wind,
            visibility,
            ceiling,
            precipitation,
            trend_stability,
        }
    }

    pub fn weight(&self, factor: RiskFactorKind) -> f64 {
        match factor {
            RiskFactorKind::SurfaceWind => self.surface_wind,
            RiskFactorKind::Visibility => self.visibility,
            RiskFactorKind::Ceiling => self.ceiling,
            RiskFactorKind::Precipitation => self.precipitation,
            RiskFactorKind::TrendStability => self.trend_stability,
        }
    }

    pub fn total(&self) -> f64 {
        RiskFactorKind::ALL.iter().map(|k| self.weight(*k)).sum()
    }
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self::for_phase(FlightPhase::Preflight)
    }
}

/// Risk for one airport in one flight phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRisk {
    pub airport: String,
    pub phase: FlightPhase,
    pub score: u8,
    pub tier: RiskTier,
    pub confidence: f64,
    /// Factors in assessment order, carrying the weights applied
    pub factors: Vec<RiskFactorResult>,
}

impl AggregatedRisk {
    /// The factor contributing the most weighted score.
    pub fn dominant_factor(&self) -> Option<&RiskFactorResult> {
        self.factors.iter().max_by(|a, b| {
            (f64::from(a.score) * a.weight).total_cmp(&(f64::from(b.score) * b.weight))
        })
    }
}

/// Monotonically non-increasing in age, floored at `AGE_FACTOR_FLOOR`.
pub fn age_factor(data_age_hours: f64) -> f64 {
    (1.0 - AGE_DECAY_PER_HOUR * data_age_hours.max(0.0)).clamp(AGE_FACTOR_FLOOR, 1.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Combine factor scores into one airport risk.
///
/// `has_conflict` marks contradicting observation and forecast and lifts
/// the tier to at least monitor. Nothing detects conflicts yet, so callers
/// pass `false`.
pub fn aggregate(
    icao: &str,
    phase: FlightPhase,
    factors: Vec<RiskFactorResult>,
    datasets_available: usize,
    data_age_hours: f64,
    missing_inputs_penalty: f64,
    has_conflict: bool,
) -> AggregatedRisk {
    let weights = FactorWeights::for_phase(phase);
    let factors: Vec<RiskFactorResult> = factors
        .into_iter()
        .map(|mut f| {
            f.weight = weights.weight(f.factor);
            f
        })
        .collect();

    let total_weight: f64 = factors.iter().map(|f| f.weight).sum();
    let (score, factor_confidence) = if total_weight > 0.0 {
        let weighted_score: f64 = factors
            .iter()
            .map(|f| f64::from(f.score) * f.weight)
            .sum::<f64>()
            / total_weight;
        let weighted_confidence: f64 =
            factors.iter().map(|f| f.confidence * f.weight).sum::<f64>() / total_weight;
        (weighted_score.round().clamp(0.0, 100.0) as u8, weighted_confidence)
    } else {
        (0, 0.0)
    };

    let mut confidence = factor_confidence
        * (1.0 - missing_inputs_penalty.clamp(0.0, 1.0))
        * age_factor(data_age_hours);
    if datasets_available < 2 {
        confidence *= SPARSE_DATA_FACTOR;
    }

    let mut tier = tier_for_score(score);
    if has_conflict {
        tier = tier.max(RiskTier::Monitor);
    }

    AggregatedRisk {
        airport: icao.to_string(),
        phase,
        score,
        tier,
        confidence: round2(confidence.clamp(0.0, 1.0)),
        factors,
    }
}
