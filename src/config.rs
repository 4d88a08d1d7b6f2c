use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// What `GET /{location}` returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Latest,
    History,
}

impl FromStr for QueryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" => Ok(QueryMode::Latest),
            "history" => Ok(QueryMode::History),
            other => Err(anyhow::anyhow!("unknown query mode {other:?}, expected latest or history")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub target_location: String,
    pub sample_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub geocoding_base_url: String,
    pub weather_base_url: String,
    pub query_mode: QueryMode,
    pub history_limit: Option<usize>,
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Config {
            port: parse_or(&var, "PORT", 3000)?,
            target_location: var("TARGET_LOCATION").unwrap_or_else(|| "Minsk".to_string()),
            sample_interval_secs: parse_or(&var, "SAMPLE_INTERVAL_SECS", 10)?,
            http_timeout_secs: parse_or(&var, "HTTP_TIMEOUT_SECS", 10)?,
            geocoding_base_url: var("GEOCODING_BASE_URL")
                .unwrap_or_else(|| "https://geocoding-api.open-meteo.com".to_string()),
            weather_base_url: var("WEATHER_BASE_URL")
                .unwrap_or_else(|| "https://api.open-meteo.com".to_string()),
            query_mode: parse_or(&var, "QUERY_MODE", QueryMode::Latest)?,
            history_limit: var("HISTORY_LIMIT")
                .map(|raw| raw.trim().parse::<usize>())
                .transpose()
                .context("HISTORY_LIMIT must be a positive integer")?,
            database_url: var("DATABASE_URL"),
        };

        if config.target_location.trim().is_empty() {
            anyhow::bail!("TARGET_LOCATION must not be empty");
        }
        if config.sample_interval_secs == 0 {
            anyhow::bail!("SAMPLE_INTERVAL_SECS must be greater than zero");
        }
        if config.http_timeout_secs == 0 {
            anyhow::bail!("HTTP_TIMEOUT_SECS must be greater than zero");
        }
        if config.history_limit == Some(0) {
            anyhow::bail!("HISTORY_LIMIT must be greater than zero");
        }

        Ok(config)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        None => Ok(default),
    }
}
