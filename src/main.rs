use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod database;
mod lookup;
mod routes;
mod sampler;
mod store;
mod utils;

use config::Config;
use database::Database;
use lookup::{geocoding::GeocodingClient, meteo::MeteoClient};
use routes::{create_router, AppState};
use sampler::Sampler;
use store::{MemoryStore, ReadingStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "temperature_sampler=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn ReadingStore> = match &config.database_url {
        Some(database_url) => {
            let database = Database::connect(database_url).await?;
            database.init_tables().await?;
            database.health_check().await?;
            tracing::info!("Storing readings in {}", database_url);
            Arc::new(database)
        }
        None => {
            let mut memory = MemoryStore::new();
            if let Some(limit) = config.history_limit {
                memory = memory.with_history_limit(limit);
            }
            tracing::info!("Storing readings in memory");
            Arc::new(memory)
        }
    };

    let http_client = lookup::build_http_client(config.http_timeout())?;
    let geocoder = Arc::new(GeocodingClient::new(http_client.clone(), &config.geocoding_base_url));
    let weather = Arc::new(MeteoClient::new(http_client, &config.weather_base_url));

    let sampler = Arc::new(Sampler::new(
        config.target_location.clone(),
        geocoder,
        weather,
        store.clone(),
        config.sample_interval(),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    // Bind first so a failed bind never leaves a running sampler behind.
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;

    tracing::info!("Sampling {} every {:?}", sampler.location(), config.sample_interval());
    let sampler_handle = sampler.start(shutdown.child_token());

    let state = AppState {
        config: Arc::new(config),
        store,
    };

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Server starting on http://0.0.0.0:{}", port);

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await;

    // Whatever ended the server, the sampler goes down with it.
    shutdown.cancel();
    sampler_handle.stop().await?;
    served?;

    tracing::info!("Shut down cleanly");
    Ok(())
}
