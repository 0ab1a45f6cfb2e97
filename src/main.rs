use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;

use dispatchwx_core::{Config, ConfigError};
use dispatchwx_risk::{
    FlightRecord, FlightRiskError, FlightRiskService, FlightStore, PhaseWindows,
    SqliteFlightStore,
};
use dispatchwx_weather::{
    AirportCode, CacheMode, Dataset, ProviderClient, SqliteCacheStore, WeatherCacheManager,
    WeatherService, WeatherServiceError,
};

#[derive(Parser)]
#[command(name = "dispatchwx", version, about = "Airfield weather cache and flight risk")]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update a stored flight
    AddFlight {
        account: String,
        flight: String,
        origin: String,
        destination: String,
        #[arg(long, value_parser = parse_time)]
        departure: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_time)]
        arrival: Option<DateTime<Utc>>,
    },
    #[command(flatten)]
    Weather(WeatherCommand),
}

/// Commands served through the weather cache.
#[derive(Subcommand)]
enum WeatherCommand {
    /// Weather snapshot for one airfield
    Snapshot {
        icao: String,
        /// Observation and forecast only
        #[arg(long)]
        lite: bool,
    },
    /// Risk for an ad-hoc route
    Route {
        origin: String,
        destination: String,
        #[arg(long, value_parser = parse_time)]
        departure: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_time)]
        arrival: Option<DateTime<Utc>>,
    },
    /// Risk for a stored flight, saved back onto the flight
    Flight { account: String, flight: String },
    /// Batch-fetch datasets for many airfields into the cache
    Prime {
        #[arg(required = true)]
        icaos: Vec<String>,
        /// Datasets to prime (default: metar and taf)
        #[arg(long = "dataset", value_parser = parse_dataset)]
        datasets: Vec<Dataset>,
    },
    /// Mark a cached dataset stale in both modes
    Invalidate {
        icao: String,
        #[arg(value_parser = parse_dataset)]
        dataset: Dataset,
    },
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc))
}

fn parse_dataset(value: &str) -> Result<Dataset, String> {
    Dataset::parse(value).ok_or_else(|| format!("unknown dataset: {}", value))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let (config, _) = match path {
        Some(path) => Config::load_validated_from(path)?,
        None => Config::load_validated()?,
    };
    Ok(config)
}

fn flight_store(config: &Config) -> Result<Arc<SqliteFlightStore>> {
    let store = SqliteFlightStore::open(config.database_path())
        .context("Failed to open flight store")?;
    Ok(Arc::new(store))
}

fn weather_service(config: &Config) -> Result<WeatherService> {
    let client = ProviderClient::new(&config.provider)?;
    let store = SqliteCacheStore::open(config.database_path())
        .context("Failed to open weather cache")?;
    let cache = WeatherCacheManager::new(Arc::new(store), (&config.cache).into());
    Ok(WeatherService::new(cache, Arc::new(client)))
}

fn add_flight(
    config: &Config,
    account: String,
    flight: String,
    origin: &str,
    destination: &str,
    departure: Option<DateTime<Utc>>,
    arrival: Option<DateTime<Utc>>,
) -> Result<Value> {
    let record = FlightRecord::new(
        account,
        flight,
        AirportCode::parse(origin)?,
        AirportCode::parse(destination)?,
    )
    .with_schedule(departure, arrival);
    flight_store(config)?.upsert_flight(&record)?;
    tracing::info!("Stored flight {}/{}", record.account_id, record.flight_id);
    Ok(serde_json::to_value(&record)?)
}

async fn run(config: &Config, command: Command) -> Result<Value> {
    match command {
        // Storing a flight needs no provider credentials.
        Command::AddFlight {
            account,
            flight,
            origin,
            destination,
            departure,
            arrival,
        } => add_flight(config, account, flight, &origin, &destination, departure, arrival),
        Command::Weather(command) => {
            let weather = weather_service(config)?;
            let outcome = run_weather(config, &weather, command).await;

            // Let background refreshes land before the runtime shuts down.
            weather.cache().drain().await;
            outcome
        }
    }
}

async fn run_weather(
    config: &Config,
    weather: &WeatherService,
    command: WeatherCommand,
) -> Result<Value> {
    let now = Utc::now();
    let risk = || -> Result<FlightRiskService> {
        Ok(FlightRiskService::new(
            weather.clone(),
            flight_store(config)?,
            PhaseWindows::from(&config.risk),
        ))
    };

    let value = match command {
        WeatherCommand::Snapshot { icao, lite } => {
            let mode = if lite { CacheMode::Lite } else { CacheMode::Full };
            serde_json::to_value(weather.get_airfield_weather_snapshot(&icao, mode).await?)?
        }
        WeatherCommand::Route {
            origin,
            destination,
            departure,
            arrival,
        } => serde_json::to_value(
            risk()?
                .assess_route(&origin, &destination, departure, arrival, now)
                .await?,
        )?,
        WeatherCommand::Flight { account, flight } => {
            serde_json::to_value(risk()?.get_flight_risk(&account, &flight, now).await?)?
        }
        WeatherCommand::Prime { icaos, datasets } => {
            let datasets = if datasets.is_empty() {
                vec![Dataset::Metar, Dataset::Taf]
            } else {
                datasets
            };
            let mut reports = serde_json::Map::new();
            for dataset in datasets {
                let report = weather.prime(icaos.as_slice(), dataset).await?;
                reports.insert(dataset.as_str().to_string(), serde_json::to_value(report)?);
            }
            Value::Object(reports)
        }
        WeatherCommand::Invalidate { icao, dataset } => {
            weather.invalidate(&icao, dataset)?;
            serde_json::json!({
                "airport": icao.trim().to_ascii_uppercase(),
                "dataset": dataset,
                "stale": true,
            })
        }
    };
    Ok(value)
}

/// Short message for the first error in the chain that has one.
fn user_message(error: &anyhow::Error) -> Option<&'static str> {
    if let Some(e) = error.downcast_ref::<FlightRiskError>() {
        return Some(e.user_message());
    }
    if let Some(e) = error.downcast_ref::<WeatherServiceError>() {
        return Some(e.user_message());
    }
    if let Some(e) = error.downcast_ref::<dispatchwx_weather::ProviderError>() {
        return Some(e.user_message());
    }
    error.downcast_ref::<ConfigError>().map(ConfigError::user_message)
}

#[tokio::main]
async fn main() -> Result<()> {
    dispatchwx_core::init()?;
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!("Using database {}", config.database_path().display());

    match run(&config, cli.command).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            if let Some(message) = user_message(&e) {
                eprintln!("{}", message);
            }
            Err(e)
        }
    }
}
