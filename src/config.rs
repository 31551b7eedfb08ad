use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Single pipeline pass, then exit.
    Once,
    /// Blocking loop on a dedicated OS thread.
    Worker,
    /// Cooperative loop behind a `PollController`.
    Task,
}

impl FromStr for PollMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(PollMode::Once),
            "worker" => Ok(PollMode::Worker),
            "task" => Ok(PollMode::Task),
            other => Err(anyhow!("unknown poll mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: String,
    pub max_connections: u32,
    pub raw_alerts_collection: String,
    pub parsed_alerts_collection: String,
    pub locations_collection: String,
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub geocoder_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub mode: PollMode,
    pub interval: Duration,
    pub ledger_capacity: usize,
    pub timezone: Tz,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub geo: GeoConfig,
    pub poll: PollConfig,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Missing keys take
    /// their defaults; present but malformed values are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let http_timeout = Duration::from_millis(parse_var(&lookup, "HTTP_TIMEOUT_MS", 5000u64)?);

        let feed = FeedConfig {
            url: var("ALERTS_FEED_URL", "https://api.tzevaadom.co.il/notifications"),
            timeout: http_timeout,
        };

        let db_host = var("DB_HOST", "localhost");
        let db_port: u16 = parse_var(&lookup, "DB_PORT", 5432)?;
        let db_name = var("DB_DATABASE", "red_alerts");
        let db_user = var("DB_USER", "red_alerts");
        let db_pwd = var("DB_PWD", "red_alerts");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let store = StoreConfig {
            backend: parse_var(&lookup, "STORE_BACKEND", StoreBackend::Postgres)?,
            database_url,
            max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", 10u32)?,
            raw_alerts_collection: collection_var(&lookup, "RAW_ALERTS_COLLECTION", "raw_alerts")?,
            parsed_alerts_collection: collection_var(
                &lookup,
                "PARSED_ALERTS_COLLECTION",
                "parsed_alerts",
            )?,
            locations_collection: collection_var(&lookup, "LOCATIONS_COLLECTION", "locations")?,
        };

        let geo = GeoConfig {
            geocoder_url: var("GEOCODER_URL", "https://photon.komoot.io/api/"),
            timeout: http_timeout,
            max_retries: parse_var(&lookup, "GEO_MAX_RETRIES", 5u32)?,
            base_delay: Duration::from_millis(parse_var(&lookup, "GEO_BASE_DELAY_MS", 1000u64)?),
            max_delay: Duration::from_millis(parse_var(&lookup, "GEO_MAX_DELAY_MS", 16000u64)?),
            jitter: parse_var(&lookup, "GEO_JITTER", true)?,
        };
        if geo.max_retries == 0 {
            bail!("GEO_MAX_RETRIES must be at least 1");
        }

        let timezone_name = var("ALERTS_TIMEZONE", "Asia/Jerusalem");
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|e| anyhow!("invalid ALERTS_TIMEZONE '{}': {}", timezone_name, e))?;

        let poll = PollConfig {
            mode: parse_var(&lookup, "POLL_MODE", PollMode::Task)?,
            interval: Duration::from_millis(parse_var(&lookup, "POLL_INTERVAL_MS", 500u64)?),
            ledger_capacity: parse_var(&lookup, "LEDGER_CAPACITY", 10_000usize)?,
            timezone,
        };

        let log_level = var("LOG_LEVEL", "info");

        Ok(Self {
            feed,
            store,
            geo,
            poll,
            log_level,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
    }
}

fn collection_var<F>(lookup: &F, key: &str, default: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let name = lookup(key).unwrap_or_else(|| default.to_string());
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        bail!("invalid collection name for {}: '{}'", key, name);
    }
    Ok(name)
}
