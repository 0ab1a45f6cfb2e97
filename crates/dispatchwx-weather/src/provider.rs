//! Aviation weather provider client.
//!
//! Talks to a CheckWX-style REST API: comma-joined airport codes in the
//! path, API key in a header, results wrapped in a `{"results", "data"}`
//! envelope.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use dispatchwx_core::{ProviderConfig, PROVIDER_MAX_BATCH};

use crate::error::ProviderError;
use crate::types::{AirportCode, DecodedMetar, DecodedTaf, HazardAdvisory, HazardKind, Station};

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const SOURCE_NAME: &str = "checkwx";

/// Longest slice of a non-JSON error body kept in the error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Outbound seam for weather data.
///
/// Callers pass already validated codes; every method returns the decoded
/// items for all requested airports that the provider reported.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    fn source_name(&self) -> &str;

    async fn fetch_metars(&self, codes: &[AirportCode]) -> Result<Vec<DecodedMetar>, ProviderError>;

    async fn fetch_recent_metars(
        &self,
        codes: &[AirportCode],
        hours: u32,
    ) -> Result<Vec<DecodedMetar>, ProviderError>;

    async fn fetch_tafs(&self, codes: &[AirportCode]) -> Result<Vec<DecodedTaf>, ProviderError>;

    async fn fetch_stations(&self, codes: &[AirportCode]) -> Result<Vec<Station>, ProviderError>;

    async fn fetch_hazards(
        &self,
        kind: HazardKind,
        codes: &[AirportCode],
    ) -> Result<Vec<HazardAdvisory>, ProviderError>;
}

/// Validate raw airport codes, normalising and de-duplicating them in order.
///
/// Fails on the first invalid code.
pub fn parse_codes<S: AsRef<str>>(codes: &[S]) -> Result<Vec<AirportCode>, ProviderError> {
    let parsed = codes
        .iter()
        .map(|code| AirportCode::parse(code.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(dedup(&parsed))
}

fn dedup(codes: &[AirportCode]) -> Vec<AirportCode> {
    let mut seen = HashSet::new();
    codes
        .iter()
        .filter(|code| seen.insert((*code).clone()))
        .cloned()
        .collect()
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    results: usize,
    data: Vec<T>,
}

/// HTTP client for the weather provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    batch_size: usize,
}

impl ProviderClient {
    /// Build the client from settings. Fails when no API key is configured.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .resolve_api_key()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            batch_size: config.batch_size.clamp(1, PROVIDER_MAX_BATCH),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fetch `segment` for every code, `batch_size` codes per request.
    ///
    /// Batches go out one after another; the first failing batch aborts.
    async fn fetch_batched<T: DeserializeOwned>(
        &self,
        segment: &str,
        suffix: &str,
        codes: &[AirportCode],
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ProviderError> {
        let unique = dedup(codes);
        let mut items = Vec::with_capacity(unique.len());

        for batch in unique.chunks(self.batch_size) {
            let joined = batch
                .iter()
                .map(AirportCode::as_str)
                .collect::<Vec<_>>()
                .join(",");
            let url = format!("{}/{}/{}{}", self.base_url, segment, joined, suffix);
            items.extend(self.get_envelope::<T>(&url, query).await?);
        }

        Ok(items)
    }

    #[instrument(skip(self, query), level = "info")]
    async fn get_envelope<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ProviderError> {
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let error = error_from_body(status.as_u16(), &body);
            tracing::debug!("Provider returned {}: {}", status, error);
            return Err(error);
        }

        parse_envelope(&body)
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl WeatherSource for ProviderClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_metars(&self, codes: &[AirportCode]) -> Result<Vec<DecodedMetar>, ProviderError> {
        self.fetch_batched("metar", "/decoded", codes, &[]).await
    }

    async fn fetch_recent_metars(
        &self,
        codes: &[AirportCode],
        hours: u32,
    ) -> Result<Vec<DecodedMetar>, ProviderError> {
        self.fetch_batched("metar", "/decoded", codes, &[("hours", hours.to_string())])
            .await
    }

    async fn fetch_tafs(&self, codes: &[AirportCode]) -> Result<Vec<DecodedTaf>, ProviderError> {
        self.fetch_batched("taf", "/decoded", codes, &[]).await
    }

    async fn fetch_stations(&self, codes: &[AirportCode]) -> Result<Vec<Station>, ProviderError> {
        self.fetch_batched("station", "", codes, &[]).await
    }

    async fn fetch_hazards(
        &self,
        kind: HazardKind,
        codes: &[AirportCode],
    ) -> Result<Vec<HazardAdvisory>, ProviderError> {
        self.fetch_batched(kind.path_segment(), "/decoded", codes, &[])
            .await
    }
}

/// Validate a success body against the envelope schema.
fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, ProviderError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| invalid_body(format!("response is not JSON: {}", e)))?;
    let envelope: Envelope<T> = serde_json::from_value(value)
        .map_err(|e| invalid_body(format!("unexpected response shape: {}", e)))?;
    Ok(envelope.data)
}

fn invalid_body(message: String) -> ProviderError {
    // A 2xx with a body we cannot use is an upstream failure.
    ProviderError::Server {
        status: 502,
        message,
        details: None,
    }
}

fn error_from_body(status: u16, body: &str) -> ProviderError {
    let details: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = details
        .as_ref()
        .and_then(|d| d.get("message").or_else(|| d.get("error")))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let text: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
            if text.is_empty() {
                format!("HTTP {}", status)
            } else {
                text
            }
        });
    ProviderError::from_status(status, message, details.filter(|d| d.is_object()))
}
