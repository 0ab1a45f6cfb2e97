//! Risk engine error types.

use thiserror::Error;

use dispatchwx_weather::WeatherServiceError;

/// Errors raised by flight storage backends.
#[derive(Debug, Error)]
pub enum FlightStoreError {
    #[error("Flight not found: {account_id}/{flight_id}")]
    NotFound {
        account_id: String,
        flight_id: String,
    },

    /// Validation error (e.g., empty identifier, invalid airport code).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl FlightStoreError {
    pub fn not_found(account_id: impl Into<String>, flight_id: impl Into<String>) -> Self {
        Self::NotFound {
            account_id: account_id.into(),
            flight_id: flight_id.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl From<rusqlite::Error> for FlightStoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for FlightStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("snapshot serialization failed: {}", err))
    }
}

pub type FlightStoreResult<T> = Result<T, FlightStoreError>;

/// Errors returned by the flight risk service.
#[derive(Debug, Error)]
pub enum FlightRiskError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Flight not found: {account_id}/{flight_id}")]
    FlightNotFound {
        account_id: String,
        flight_id: String,
    },

    #[error(transparent)]
    Weather(#[from] WeatherServiceError),

    #[error(transparent)]
    Store(#[from] FlightStoreError),
}

impl FlightRiskError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Flight details are incomplete or invalid.",
            Self::FlightNotFound { .. } => "Flight not found.",
            Self::Weather(e) => e.user_message(),
            Self::Store(_) => "Flight storage is unavailable. Please try again.",
        }
    }
}
