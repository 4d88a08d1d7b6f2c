use crate::utils::validate_coordinates;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in degrees, always inside the valid ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, String> {
        validate_coordinates(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Current conditions as reported by the weather provider.
///
/// `time_text` is provider-local time without a zone, e.g. `2024-05-01T12:00`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub time_text: String,
    pub temperature: f64,
}

// Geocoding upstream

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingResult {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

/// Either the search envelope (`{"results": [...]}`), a bare result object,
/// or an envelope without `results`, which the provider sends for no match.
///
/// The shape is picked by key before decoding, so a body with the right keys
/// but wrong field types is a decode error rather than an empty match.
#[derive(Debug, Clone)]
pub enum GeocodingResponse {
    Single(GeocodingResult),
    Search { results: Vec<GeocodingResult> },
    Empty,
}

#[derive(Deserialize)]
struct SearchEnvelope {
    results: Vec<GeocodingResult>,
}

impl<'de> Deserialize<'de> for GeocodingResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let Some(object) = value.as_object() else {
            return Err(de::Error::custom("geocoding response is not a JSON object"));
        };

        if object.contains_key("results") {
            let envelope: SearchEnvelope = serde_json::from_value(value).map_err(de::Error::custom)?;
            Ok(GeocodingResponse::Search {
                results: envelope.results,
            })
        } else if object.contains_key("latitude") || object.contains_key("longitude") {
            serde_json::from_value(value)
                .map(GeocodingResponse::Single)
                .map_err(de::Error::custom)
        } else {
            Ok(GeocodingResponse::Empty)
        }
    }
}

impl GeocodingResponse {
    pub fn into_first(self) -> Option<GeocodingResult> {
        match self {
            GeocodingResponse::Single(result) => Some(result),
            GeocodingResponse::Search { results } => results.into_iter().next(),
            GeocodingResponse::Empty => None,
        }
    }
}

// Weather upstream

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    pub current: CurrentConditions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentConditions {
    pub time: String,
    pub temperature_2m: f64,
}

impl From<ForecastResponse> for WeatherSnapshot {
    fn from(response: ForecastResponse) -> Self {
        Self {
            time_text: response.current.time,
            temperature: response.current.temperature_2m,
        }
    }
}
