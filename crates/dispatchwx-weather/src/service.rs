//! Airfield weather snapshots served through the cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;

use crate::cache::WeatherCacheManager;
use crate::error::{CacheError, ProviderError, WeatherServiceError};
use crate::provider::{parse_codes, WeatherSource};
use crate::record::{CacheRecord, Fetched, Freshness};
use crate::types::{
    AirportCode, CacheKey, CacheMode, Dataset, DecodedMetar, DecodedTaf, HazardAdvisory,
    HazardKind, Station,
};

/// How far back the full snapshot looks for observation history.
pub const RECENT_OBSERVATION_HOURS: u32 = 3;

type FetchFuture<T> = BoxFuture<'static, Result<Fetched<T>, ProviderError>>;

/// Decoded weather plus the staleness of the record it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedDataset<T> {
    pub data: T,
    pub freshness: Freshness,
}

impl<T> CachedDataset<T> {
    fn from_record(record: CacheRecord<T>, now: DateTime<Utc>) -> Self {
        Self {
            freshness: record.freshness(now),
            data: record.payload,
        }
    }
}

/// Everything known about one airfield's weather at `generated_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirfieldWeatherSnapshot {
    pub airport: AirportCode,
    pub mode: CacheMode,
    pub generated_at: DateTime<Utc>,
    pub metar: Option<CachedDataset<DecodedMetar>>,
    pub taf: Option<CachedDataset<DecodedTaf>>,
    /// Full mode only
    pub station: Option<CachedDataset<Station>>,
    pub recent_metars: Option<CachedDataset<Vec<DecodedMetar>>>,
    pub sigmets: Option<CachedDataset<Vec<HazardAdvisory>>>,
    pub airmets: Option<CachedDataset<Vec<HazardAdvisory>>>,
}

impl AirfieldWeatherSnapshot {
    pub fn observation(&self) -> Option<&DecodedMetar> {
        self.metar.as_ref().map(|m| &m.data)
    }

    pub fn forecast(&self) -> Option<&DecodedTaf> {
        self.taf.as_ref().map(|t| &t.data)
    }

    /// Count of the core datasets (observation, forecast) present.
    pub fn datasets_available(&self) -> usize {
        usize::from(self.metar.is_some()) + usize::from(self.taf.is_some())
    }

    /// Age of the observation in hours, if there is one.
    pub fn data_age_hours(&self) -> Option<f64> {
        self.observation().map(|m| m.age_hours(self.generated_at))
    }

    pub fn active_hazards(&self) -> Vec<&HazardAdvisory> {
        [&self.sigmets, &self.airmets]
            .into_iter()
            .flatten()
            .flat_map(|set| set.data.iter())
            .filter(|h| h.is_active(self.generated_at))
            .collect()
    }
}

/// Outcome of a batch prime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrimeReport {
    pub primed: Vec<String>,
    /// Requested airports the provider reported nothing for
    pub missing: Vec<String>,
}

#[derive(Clone)]
pub struct WeatherService {
    cache: WeatherCacheManager,
    source: Arc<dyn WeatherSource>,
}

impl WeatherService {
    pub fn new(cache: WeatherCacheManager, source: Arc<dyn WeatherSource>) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &WeatherCacheManager {
        &self.cache
    }

    /// Observation and forecast for one airport, plus station, history and
    /// hazards in full mode.
    ///
    /// Fails only when the code is invalid or neither observation nor
    /// forecast can be obtained.
    pub async fn get_airfield_weather_snapshot(
        &self,
        icao: &str,
        mode: CacheMode,
    ) -> Result<AirfieldWeatherSnapshot, WeatherServiceError> {
        let code = AirportCode::parse(icao).map_err(WeatherServiceError::InvalidAirportCode)?;
        let metar_key = CacheKey::new(code.clone(), Dataset::Metar, mode);
        let taf_key = CacheKey::new(code.clone(), Dataset::Taf, mode);

        let (metar, taf) = tokio::join!(
            self.cache
                .get_or_fetch(&metar_key, self.fetcher(&code, fetch_metar)),
            self.cache.get_or_fetch(&taf_key, self.fetcher(&code, fetch_taf)),
        );

        let now = self.cache.now();
        let (metar, taf) = match (metar, taf) {
            (Err(metar_err), Err(taf_err)) => {
                tracing::warn!(
                    "No weather for {}: observation {}; forecast {}",
                    code,
                    metar_err,
                    taf_err
                );
                return Err(WeatherServiceError::Unavailable {
                    icao: code.to_string(),
                    observation: metar_err,
                    forecast: taf_err,
                });
            }
            (metar, taf) => (
                present(&metar_key, metar, now),
                present(&taf_key, taf, now),
            ),
        };

        let mut snapshot = AirfieldWeatherSnapshot {
            airport: code.clone(),
            mode,
            generated_at: now,
            metar,
            taf,
            station: None,
            recent_metars: None,
            sigmets: None,
            airmets: None,
        };

        if mode == CacheMode::Full {
            self.load_extras(&code, &mut snapshot).await;
        }

        Ok(snapshot)
    }

    async fn load_extras(&self, code: &AirportCode, snapshot: &mut AirfieldWeatherSnapshot) {
        let station_key = CacheKey::new(code.clone(), Dataset::Station, CacheMode::Full);
        let recent_key = CacheKey::new(code.clone(), Dataset::MetarRecent, CacheMode::Full);
        let sigmet_key = CacheKey::new(code.clone(), Dataset::Sigmet, CacheMode::Full);
        let airmet_key = CacheKey::new(code.clone(), Dataset::Airmet, CacheMode::Full);

        let (station, recent, sigmets, airmets) = tokio::join!(
            self.cache
                .get_or_fetch(&station_key, self.fetcher(code, fetch_station)),
            self.cache.get_or_fetch(
                &recent_key,
                self.fetcher(code, |source, code| {
                    fetch_recent(source, code, RECENT_OBSERVATION_HOURS)
                }),
            ),
            self.cache.get_or_fetch(
                &sigmet_key,
                self.fetcher(code, |source, code| {
                    fetch_hazards(source, code, HazardKind::Sigmet)
                }),
            ),
            self.cache.get_or_fetch(
                &airmet_key,
                self.fetcher(code, |source, code| {
                    fetch_hazards(source, code, HazardKind::Airmet)
                }),
            ),
        );

        let now = snapshot.generated_at;
        snapshot.station = present(&station_key, station, now);
        snapshot.recent_metars = present(&recent_key, recent, now);
        snapshot.sigmets = present(&sigmet_key, sigmets, now);
        snapshot.airmets = present(&airmet_key, airmets, now);
    }

    /// Batch-fetch one dataset for many airports and store each as fresh.
    pub async fn prime<S: AsRef<str>>(
        &self,
        codes: &[S],
        dataset: Dataset,
    ) -> Result<PrimeReport, WeatherServiceError> {
        let codes = parse_codes(codes).map_err(WeatherServiceError::InvalidAirportCode)?;
        let mut report = PrimeReport::default();
        if codes.is_empty() {
            return Ok(report);
        }

        let source_name = self.source.source_name().to_string();
        let prime_error = |source| WeatherServiceError::Prime { dataset, source };

        tracing::info!("Priming {} for {} airports", dataset, codes.len());
        match dataset {
            Dataset::Metar => {
                let items = self
                    .cache
                    .fetch_direct(|| self.source.fetch_metars(&codes))
                    .await
                    .map_err(prime_error)?;
                let mut grouped = group_by_icao(items, |m| &m.icao);
                for code in &codes {
                    let latest = grouped
                        .remove(code.as_str())
                        .and_then(|group| group.into_iter().max_by_key(|m| m.observed));
                    let fetched = latest.map(|m| {
                        let observed = m.observed;
                        Fetched::new(m, source_name.as_str()).observed(Some(observed))
                    });
                    self.put_all(code, dataset, fetched, &mut report);
                }
            }
            Dataset::Taf => {
                let items = self
                    .cache
                    .fetch_direct(|| self.source.fetch_tafs(&codes))
                    .await
                    .map_err(prime_error)?;
                let mut grouped = group_by_icao(items, |t| &t.icao);
                for code in &codes {
                    let fetched = grouped
                        .remove(code.as_str())
                        .and_then(|group| group.into_iter().last())
                        .map(|t| taf_fetched(t, &source_name));
                    self.put_all(code, dataset, fetched, &mut report);
                }
            }
            Dataset::Station => {
                let items = self
                    .cache
                    .fetch_direct(|| self.source.fetch_stations(&codes))
                    .await
                    .map_err(prime_error)?;
                let mut grouped = group_by_icao(items, |s| &s.icao);
                for code in &codes {
                    let fetched = grouped
                        .remove(code.as_str())
                        .and_then(|group| group.into_iter().next())
                        .map(|s| Fetched::new(s, source_name.as_str()));
                    self.put_all(code, dataset, fetched, &mut report);
                }
            }
            Dataset::MetarRecent => {
                let items = self
                    .cache
                    .fetch_direct(|| {
                        self.source
                            .fetch_recent_metars(&codes, RECENT_OBSERVATION_HOURS)
                    })
                    .await
                    .map_err(prime_error)?;
                let mut grouped = group_by_icao(items, |m| &m.icao);
                for code in &codes {
                    let fetched = grouped
                        .remove(code.as_str())
                        .map(|group| recent_fetched(group, &source_name));
                    self.put_all(code, dataset, fetched, &mut report);
                }
            }
            Dataset::Sigmet | Dataset::Airmet => {
                let kind = if dataset == Dataset::Sigmet {
                    HazardKind::Sigmet
                } else {
                    HazardKind::Airmet
                };
                let items = self
                    .cache
                    .fetch_direct(|| self.source.fetch_hazards(kind, &codes))
                    .await
                    .map_err(prime_error)?;
                let mut grouped = group_by_icao(items, |h| &h.icao);
                for code in &codes {
                    // No advisories is a valid, cacheable answer.
                    let group = grouped.remove(code.as_str()).unwrap_or_default();
                    let fetched = Some(Fetched::new(group, source_name.as_str()));
                    self.put_all(code, dataset, fetched, &mut report);
                }
            }
        }

        tracing::info!(
            "Primed {} for {} airports ({} missing)",
            dataset,
            report.primed.len(),
            report.missing.len()
        );
        Ok(report)
    }

    /// Mark a dataset stale for an airport in every mode it is cached under.
    pub fn invalidate(&self, icao: &str, dataset: Dataset) -> Result<(), WeatherServiceError> {
        let code = AirportCode::parse(icao).map_err(WeatherServiceError::InvalidAirportCode)?;
        for mode in modes_for(dataset) {
            self.cache
                .mark_stale(&CacheKey::new(code.clone(), dataset, *mode))?;
        }
        Ok(())
    }

    fn put_all<T: Serialize + Clone>(
        &self,
        code: &AirportCode,
        dataset: Dataset,
        fetched: Option<Fetched<T>>,
        report: &mut PrimeReport,
    ) {
        let Some(fetched) = fetched else {
            tracing::warn!("Provider reported no {} for {}", dataset, code);
            report.missing.push(code.to_string());
            return;
        };

        for mode in modes_for(dataset) {
            let key = CacheKey::new(code.clone(), dataset, *mode);
            if let Err(e) = self.cache.put(&key, fetched.clone()) {
                tracing::warn!("Could not prime {}: {}", key, e);
            }
        }
        report.primed.push(code.to_string());
    }

    fn fetcher<T, F>(
        &self,
        code: &AirportCode,
        fetch: F,
    ) -> impl Fn() -> FetchFuture<T> + Send + Sync + 'static
    where
        T: Send + 'static,
        F: Fn(Arc<dyn WeatherSource>, AirportCode) -> FetchFuture<T> + Send + Sync + 'static,
    {
        let source = self.source.clone();
        let code = code.clone();
        move || fetch(source.clone(), code.clone())
    }
}

/// Cache modes a dataset is stored under. Extras only exist in full snapshots.
fn modes_for(dataset: Dataset) -> &'static [CacheMode] {
    match dataset {
        Dataset::Metar | Dataset::Taf => &[CacheMode::Full, CacheMode::Lite],
        _ => &[CacheMode::Full],
    }
}

fn present<T>(
    key: &CacheKey,
    result: Result<CacheRecord<T>, CacheError>,
    now: DateTime<Utc>,
) -> Option<CachedDataset<T>> {
    match result {
        Ok(record) => Some(CachedDataset::from_record(record, now)),
        Err(e) => {
            tracing::warn!("{} unavailable: {}", key, e);
            None
        }
    }
}

fn group_by_icao<T>(items: Vec<T>, icao: impl Fn(&T) -> &String) -> HashMap<String, Vec<T>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for item in items {
        let code = icao(&item).to_ascii_uppercase();
        grouped.entry(code).or_default().push(item);
    }
    grouped
}

fn not_reported(kind: &str, code: &AirportCode) -> ProviderError {
    ProviderError::NotFound {
        status: 404,
        message: format!("No {} reported for {}", kind, code),
        details: None,
    }
}

fn taf_fetched(taf: DecodedTaf, source_name: &str) -> Fetched<DecodedTaf> {
    let issued = taf.timestamp.issued;
    let (from, to) = (taf.timestamp.from, taf.timestamp.to);
    Fetched::new(taf, source_name)
        .observed(issued)
        .valid(Some(from), Some(to))
}

fn recent_fetched(mut metars: Vec<DecodedMetar>, source_name: &str) -> Fetched<Vec<DecodedMetar>> {
    metars.sort_by(|a, b| b.observed.cmp(&a.observed));
    let newest = metars.first().map(|m| m.observed);
    Fetched::new(metars, source_name).observed(newest)
}

fn fetch_metar(source: Arc<dyn WeatherSource>, code: AirportCode) -> FetchFuture<DecodedMetar> {
    async move {
        let metars = source.fetch_metars(std::slice::from_ref(&code)).await?;
        let metar = group_by_icao(metars, |m| &m.icao)
            .remove(code.as_str())
            .and_then(|group| group.into_iter().max_by_key(|m| m.observed))
            .ok_or_else(|| not_reported("METAR", &code))?;
        let observed = metar.observed;
        Ok(Fetched::new(metar, source.source_name()).observed(Some(observed)))
    }
    .boxed()
}

fn fetch_taf(source: Arc<dyn WeatherSource>, code: AirportCode) -> FetchFuture<DecodedTaf> {
    async move {
        let tafs = source.fetch_tafs(std::slice::from_ref(&code)).await?;
        let taf = group_by_icao(tafs, |t| &t.icao)
            .remove(code.as_str())
            .and_then(|group| group.into_iter().last())
            .ok_or_else(|| not_reported("TAF", &code))?;
        Ok(taf_fetched(taf, source.source_name()))
    }
    .boxed()
}

fn fetch_station(source: Arc<dyn WeatherSource>, code: AirportCode) -> FetchFuture<Station> {
    async move {
        let stations = source.fetch_stations(std::slice::from_ref(&code)).await?;
        let station = group_by_icao(stations, |s| &s.icao)
            .remove(code.as_str())
            .and_then(|group| group.into_iter().next())
            .ok_or_else(|| not_reported("station", &code))?;
        Ok(Fetched::new(station, source.source_name()))
    }
    .boxed()
}

fn fetch_recent(
    source: Arc<dyn WeatherSource>,
    code: AirportCode,
    hours: u32,
) -> FetchFuture<Vec<DecodedMetar>> {
    async move {
        let metars = source
            .fetch_recent_metars(std::slice::from_ref(&code), hours)
            .await?;
        let group = group_by_icao(metars, |m| &m.icao)
            .remove(code.as_str())
            .unwrap_or_default();
        Ok(recent_fetched(group, source.source_name()))
    }
    .boxed()
}

fn fetch_hazards(
    source: Arc<dyn WeatherSource>,
    code: AirportCode,
    kind: HazardKind,
) -> FetchFuture<Vec<HazardAdvisory>> {
    async move {
        let advisories = source
            .fetch_hazards(kind, std::slice::from_ref(&code))
            .await?;
        let group = group_by_icao(advisories, |h| &h.icao)
            .remove(code.as_str())
            .unwrap_or_default();
        Ok(Fetched::new(group, source.source_name()))
    }
    .boxed()
}
