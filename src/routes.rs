use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    config::{Config, QueryMode},
    store::{ReadingStore, StoreError},
    utils::ErrorResponse,
};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ReadingStore>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Location not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

const STORE_FAILURE_MESSAGE: &str = "Failed to read readings";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Store(e) => {
                // Backend detail stays in the log, clients get a fixed message.
                tracing::error!("Reading store query failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    STORE_FAILURE_MESSAGE.to_string(),
                )
            }
        };

        (status, Json(ErrorResponse::new(&message, code))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

// Route handlers
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn list_locations(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.store.locations().await?))
}

pub async fn get_location(
    State(state): State<AppState>,
    Path(location): Path<String>,
) -> Result<Response, ApiError> {
    match state.config.query_mode {
        QueryMode::Latest => {
            let reading = state.store.latest(&location).await?;
            let reading = reading.ok_or(ApiError::NotFound(location))?;
            Ok(Json(reading).into_response())
        }
        QueryMode::History => {
            let history = state.store.history(&location).await?;
            if history.is_empty() {
                return Err(ApiError::NotFound(location));
            }
            Ok(Json(history).into_response())
        }
    }
}

// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_locations))
        .route("/health", get(health))
        .route("/:location", get(get_location))
        .with_state(state)
}
