use super::types::{Coordinates, ForecastResponse, WeatherSnapshot};
use super::{endpoint, fetch_json, LookupError, WeatherLookup};
use async_trait::async_trait;
use reqwest::Client;

const FORECAST_PATH: &str = "/v1/forecast";

/// Current-conditions client for an Open-Meteo compatible forecast API.
pub struct MeteoClient {
    client: Client,
    forecast_url: String,
}

impl MeteoClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            forecast_url: endpoint(base_url, FORECAST_PATH),
        }
    }

    pub async fn get_temperature(
        &self,
        coordinates: Coordinates,
    ) -> Result<WeatherSnapshot, LookupError> {
        let response: ForecastResponse = fetch_json(
            &self.client,
            &self.forecast_url,
            &[
                ("latitude", coordinates.latitude.to_string()),
                ("longitude", coordinates.longitude.to_string()),
                ("current", "temperature_2m".to_string()),
            ],
        )
        .await?;

        Ok(response.into())
    }
}

#[async_trait]
impl WeatherLookup for MeteoClient {
    async fn resolve(&self, coordinates: Coordinates) -> Result<WeatherSnapshot, LookupError> {
        self.get_temperature(coordinates).await
    }
}
