//! Weather-specific error types.

use thiserror::Error;

/// Errors raised by the weather provider client.
///
/// `Clone` so one failed in-flight fetch can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Invalid airport code {0:?}: expected exactly 4 letters")]
    InvalidAirportCode(String),

    #[error("Provider configuration error: {0}")]
    Configuration(String),

    #[error("Provider rejected credentials ({status}): {message}")]
    Unauthorized {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Provider denied access ({status}): {message}")]
    Forbidden {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Provider resource not found ({status}): {message}")]
    NotFound {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Provider rate limit exceeded ({status}): {message}")]
    RateLimited {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Provider server error ({status}): {message}")]
    Server {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Provider request failed ({status}): {message}")]
    Request {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Provider request timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Map a non-2xx HTTP status to its error category.
    pub fn from_status(status: u16, message: String, details: Option<serde_json::Value>) -> Self {
        match status {
            401 => Self::Unauthorized {
                status,
                message,
                details,
            },
            403 => Self::Forbidden {
                status,
                message,
                details,
            },
            404 => Self::NotFound {
                status,
                message,
                details,
            },
            429 => Self::RateLimited {
                status,
                message,
                details,
            },
            500..=599 => Self::Server {
                status,
                message,
                details,
            },
            _ => Self::Request {
                status,
                message,
                details,
            },
        }
    }

    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status, .. }
            | Self::Forbidden { status, .. }
            | Self::NotFound { status, .. }
            | Self::RateLimited { status, .. }
            | Self::Server { status, .. }
            | Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured error payload returned by the provider, if any.
    pub fn details(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Unauthorized { details, .. }
            | Self::Forbidden { details, .. }
            | Self::NotFound { details, .. }
            | Self::RateLimited { details, .. }
            | Self::Server { details, .. }
            | Self::Request { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    /// The provider could not give any answer, even after retries.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout { .. } | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    /// User-friendly error message for the collaborator boundary.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidAirportCode(_) => "Airport codes must be 4-letter ICAO identifiers.",
            Self::Configuration(_) => "Weather provider is not configured. Check settings.",
            Self::Unauthorized { .. } => "Weather API key is invalid. Check settings.",
            Self::Forbidden { .. } => "Weather provider denied access to this data.",
            Self::NotFound { .. } => "No weather data found for this airport.",
            Self::RateLimited { .. } => "Weather provider is busy. Please try again shortly.",
            Self::Server { .. } => "Weather provider is experiencing issues. Try again later.",
            Self::Request { .. } => "Weather request failed. Please try again.",
            Self::Timeout { .. } => "Weather request timed out. Please try again.",
            Self::Network(_) => "Unable to reach the weather provider. Check your connection.",
        }
    }
}

/// Classification used by the cache store's schema-drift fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The addressed column or table does not exist in this schema.
    SchemaMismatch,
    /// The upsert target does not match any unique constraint.
    ConstraintConflict,
    Other,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Cache store error ({kind:?}): {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Other, message)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_ascii_lowercase();
        let kind = if lowered.contains("no such column") || lowered.contains("has no column") {
            StoreErrorKind::SchemaMismatch
        } else if lowered.contains("on conflict clause does not match")
            || lowered.contains("unique constraint")
        {
            StoreErrorKind::ConstraintConflict
        } else {
            StoreErrorKind::Other
        };
        Self { kind, message }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::other(format!("serialization failed: {}", err))
    }
}

/// Errors surfaced by the weather cache manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Cached payload could not be decoded: {0}")]
    Decode(String),

    #[error("Fetch task failed: {0}")]
    Task(String),

    /// The cached record could not be read and the fetch did not replace it.
    #[error(transparent)]
    Store(StoreError),
}

impl CacheError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.user_message(),
            Self::Decode(_) => "Cached weather data is unreadable and will be refreshed.",
            Self::Task(_) => "Weather refresh failed unexpectedly. Please try again.",
            Self::Store(_) => "Weather cache storage is unavailable.",
        }
    }

    /// Nothing could be obtained from the provider or the store.
    ///
    /// `NotFound` and decode failures mean the provider answered without
    /// usable data, so they are not counted.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_unreachable(),
            Self::Decode(_) => false,
            Self::Task(_) | Self::Store(_) => true,
        }
    }
}

/// Errors returned by the airfield snapshot service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeatherServiceError {
    #[error(transparent)]
    InvalidAirportCode(ProviderError),

    /// Neither the observation nor the forecast could be obtained.
    #[error("Weather unavailable for {icao}: observation {observation}; forecast {forecast}")]
    Unavailable {
        icao: String,
        #[source]
        observation: CacheError,
        forecast: CacheError,
    },

    #[error("Priming {dataset} failed: {source}")]
    Prime {
        dataset: crate::types::Dataset,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WeatherServiceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidAirportCode(e) => e.user_message(),
            Self::Unavailable { observation, .. } => observation.user_message(),
            Self::Prime { source, .. } => source.user_message(),
            Self::Store(_) => "Weather cache storage is unavailable.",
        }
    }

    /// An unavailable airfield whose observation and forecast both failed to
    /// reach the provider. A provider that answered with no reports is not
    /// unreachable.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Unavailable {
                observation,
                forecast,
                ..
            } => observation.is_unreachable() && forecast.is_unreachable(),
            _ => false,
        }
    }
}
