pub mod geocoding;
pub mod meteo;
pub mod types;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use types::{Coordinates, WeatherSnapshot};

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),
    #[error("API error: HTTP {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("No coordinates found for {0:?}")]
    NoResults(String),
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
    #[error("Place name must not be empty")]
    EmptyPlaceName,
}

/// Resolves a place name to coordinates.
#[async_trait]
pub trait CoordinateLookup: Send + Sync {
    async fn resolve(&self, place_name: &str) -> Result<Coordinates, LookupError>;
}

/// Resolves coordinates to the current weather at that point.
#[async_trait]
pub trait WeatherLookup: Send + Sync {
    async fn resolve(&self, coordinates: Coordinates) -> Result<WeatherSnapshot, LookupError>;
}

/// Shared HTTP client for both upstreams. The timeout bounds every lookup.
pub fn build_http_client(timeout: Duration) -> Result<Client, LookupError> {
    let client = Client::builder()
        .user_agent(concat!("temperature-sampler/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;

    Ok(client)
}

/// Single GET with query parameters. Anything but 200 is an error; no retry.
async fn fetch_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    params: &[(&str, String)],
) -> Result<T, LookupError> {
    let response = client.get(url).query(params).send().await?;

    match response.status() {
        StatusCode::OK => {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(LookupError::ApiError {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
