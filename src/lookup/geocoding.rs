use super::types::{Coordinates, GeocodingResponse};
use super::{endpoint, fetch_json, CoordinateLookup, LookupError};
use async_trait::async_trait;
use reqwest::Client;

const SEARCH_PATH: &str = "/v1/search";

/// Place-name search against an Open-Meteo compatible geocoding API.
pub struct GeocodingClient {
    client: Client,
    search_url: String,
}

impl GeocodingClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            search_url: endpoint(base_url, SEARCH_PATH),
        }
    }

    pub async fn get_coordinates(&self, place_name: &str) -> Result<Coordinates, LookupError> {
        let place_name = place_name.trim();
        if place_name.is_empty() {
            return Err(LookupError::EmptyPlaceName);
        }

        let response: GeocodingResponse = fetch_json(
            &self.client,
            &self.search_url,
            &[
                ("name", place_name.to_string()),
                ("count", "1".to_string()),
                ("format", "json".to_string()),
            ],
        )
        .await?;

        let result = response
            .into_first()
            .ok_or_else(|| LookupError::NoResults(place_name.to_string()))?;

        tracing::debug!(
            place = place_name,
            matched = result.name.as_deref().unwrap_or(place_name),
            latitude = result.latitude,
            longitude = result.longitude,
            "Resolved coordinates"
        );

        Coordinates::new(result.latitude, result.longitude).map_err(LookupError::InvalidCoordinates)
    }
}

#[async_trait]
impl CoordinateLookup for GeocodingClient {
    async fn resolve(&self, place_name: &str) -> Result<Coordinates, LookupError> {
        self.get_coordinates(place_name).await
    }
}
