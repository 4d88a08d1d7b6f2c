//! Periodic sampling of the configured location.
//!
//! A cycle chains the coordinate lookup, the weather lookup, timestamp parsing
//! and one store append. Cycles are serialized: a tick that arrives while a
//! cycle is still running is skipped, never queued.

use crate::lookup::{CoordinateLookup, LookupError, WeatherLookup};
use crate::store::{Reading, ReadingStore, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Layout of the provider's `current.time` field: local time, minute precision, no zone.
pub const PROVIDER_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Timestamp {input:?} does not match layout YYYY-MM-DDTHH:MM: {source}")]
    Timestamp {
        input: String,
        source: chrono::ParseError,
    },
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("Store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub enum CycleOutcome {
    Stored(Reading),
    Failed(CycleError),
    /// Another cycle was still in flight.
    Skipped,
}

/// Parse provider-local time. The zone-less value is taken as UTC.
pub fn parse_provider_time(text: &str) -> Result<DateTime<Utc>, ParseError> {
    NaiveDateTime::parse_from_str(text, PROVIDER_TIME_LAYOUT)
        .map(|naive| naive.and_utc())
        .map_err(|source| ParseError::Timestamp {
            input: text.to_string(),
            source,
        })
}

pub struct Sampler {
    location: String,
    geocoder: Arc<dyn CoordinateLookup>,
    weather: Arc<dyn WeatherLookup>,
    store: Arc<dyn ReadingStore>,
    interval: Duration,
    in_flight: Mutex<()>,
}

impl Sampler {
    pub fn new(
        location: impl Into<String>,
        geocoder: Arc<dyn CoordinateLookup>,
        weather: Arc<dyn WeatherLookup>,
        store: Arc<dyn ReadingStore>,
        interval: Duration,
    ) -> Self {
        Self {
            location: location.into(),
            geocoder,
            weather,
            store,
            interval,
            in_flight: Mutex::new(()),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// One full cycle. The store is touched only by the final append, so any
    /// earlier failure leaves it unchanged.
    pub async fn run_cycle(&self) -> Result<Reading, CycleError> {
        let coordinates = self.geocoder.resolve(&self.location).await?;
        let snapshot = self.weather.resolve(coordinates).await?;
        let timestamp = parse_provider_time(&snapshot.time_text)?;

        let reading = Reading {
            name: self.location.clone(),
            timestamp,
            temperature: snapshot.temperature,
        };
        self.store.append(reading.clone()).await?;

        Ok(reading)
    }

    /// Run a cycle unless one is already running.
    pub async fn tick(&self) -> CycleOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return CycleOutcome::Skipped;
        };

        match self.run_cycle().await {
            Ok(reading) => CycleOutcome::Stored(reading),
            Err(e) => CycleOutcome::Failed(e),
        }
    }

    /// Spawn the timer loop. The first tick fires immediately.
    ///
    /// Cancelling `shutdown` stops the loop after any in-flight cycle finishes.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> SamplerHandle {
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                location = %self.location,
                interval_secs = self.interval.as_secs_f64(),
                "Sampler started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = self.tick().await;
                log_outcome(&self.location, &outcome);
            }

            tracing::info!(location = %self.location, "Sampler stopped");
        });

        SamplerHandle { shutdown, handle }
    }
}

fn log_outcome(location: &str, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Stored(reading) => tracing::info!(
            location,
            timestamp = %reading.timestamp.format("%Y-%m-%d %H:%M:%S"),
            temperature = reading.temperature,
            "Updated reading"
        ),
        CycleOutcome::Failed(CycleError::Store(e)) => {
            tracing::error!(location, error = %e, "Sampling cycle failed to store reading")
        }
        CycleOutcome::Failed(e) => {
            tracing::warn!(location, error = %e, "Sampling cycle abandoned")
        }
        CycleOutcome::Skipped => {
            tracing::debug!(location, "Previous cycle still running, tick skipped")
        }
    }
}

pub struct SamplerHandle {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl SamplerHandle {
    /// Cancel the timer and wait for the task to exit.
    pub async fn stop(self) -> Result<(), JoinError> {
        self.shutdown.cancel();
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::geocoding::GeocodingClient;
    use crate::lookup::meteo::MeteoClient;
    use crate::lookup::types::{Coordinates, WeatherSnapshot};
    use crate::lookup::build_http_client;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MINSK: Coordinates = Coordinates {
        latitude: 53.9,
        longitude: 27.5667,
    };

    struct FakeGeocoder {
        coordinates: Option<Coordinates>,
        calls: AtomicUsize,
    }

    impl FakeGeocoder {
        fn returning(coordinates: Option<Coordinates>) -> Arc<Self> {
            Arc::new(Self {
                coordinates,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CoordinateLookup for FakeGeocoder {
        async fn resolve(&self, place_name: &str) -> Result<Coordinates, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.coordinates
                .ok_or_else(|| LookupError::NoResults(place_name.to_string()))
        }
    }

    struct FakeWeather {
        snapshot: Option<WeatherSnapshot>,
    }

    impl FakeWeather {
        fn returning(time_text: &str, temperature: f64) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Some(WeatherSnapshot {
                    time_text: time_text.to_string(),
                    temperature,
                }),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { snapshot: None })
        }
    }

    #[async_trait]
    impl WeatherLookup for FakeWeather {
        async fn resolve(&self, _coordinates: Coordinates) -> Result<WeatherSnapshot, LookupError> {
            self.snapshot.clone().ok_or(LookupError::ApiError {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    /// Fails the first `failures` calls, then reports the same snapshot.
    struct FlakyWeather {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WeatherLookup for FlakyWeather {
        async fn resolve(&self, _coordinates: Coordinates) -> Result<WeatherSnapshot, LookupError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(LookupError::ApiError {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            Ok(WeatherSnapshot {
                time_text: "2024-05-01T12:00".to_string(),
                temperature: 20.1,
            })
        }
    }

    /// Reads come back empty; every write is refused.
    struct FailingStore;

    #[async_trait]
    impl ReadingStore for FailingStore {
        async fn append(&self, _reading: Reading) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
        async fn latest(&self, _location: &str) -> Result<Option<Reading>, StoreError> {
            Ok(None)
        }
        async fn history(&self, _location: &str) -> Result<Vec<Reading>, StoreError> {
            Ok(Vec::new())
        }
        async fn locations(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Blocks inside `resolve` until released, to hold a cycle in flight.
    struct GatedGeocoder {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CoordinateLookup for GatedGeocoder {
        async fn resolve(&self, _place_name: &str) -> Result<Coordinates, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(MINSK)
        }
    }

    fn sampler(
        geocoder: Arc<dyn CoordinateLookup>,
        weather: Arc<dyn WeatherLookup>,
        store: Arc<MemoryStore>,
    ) -> Sampler {
        Sampler::new("Minsk", geocoder, weather, store, Duration::from_secs(10))
    }

    #[test]
    fn test_parse_provider_time() {
        let parsed = parse_provider_time("2024-05-01T12:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_provider_time_rejects_other_layouts() {
        assert!(parse_provider_time("2024-05-01T12:00:00").is_err());
        assert!(parse_provider_time("2024-05-01 12:00").is_err());
        assert!(parse_provider_time("01.05.2024 12:00").is_err());
        assert!(parse_provider_time("").is_err());
    }

    #[tokio::test]
    async fn test_cycle_appends_one_reading() {
        let store = Arc::new(MemoryStore::new());
        let sampler = sampler(
            FakeGeocoder::returning(Some(MINSK)),
            FakeWeather::returning("2024-05-01T12:00", 20.1),
            store.clone(),
        );

        let reading = sampler.run_cycle().await.unwrap();

        let expected = Reading {
            name: "Minsk".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            temperature: 20.1,
        };
        assert_eq!(reading, expected);
        assert_eq!(store.history("Minsk").await.unwrap(), vec![expected]);
    }

    #[tokio::test]
    async fn test_failed_coordinate_lookup_leaves_store_untouched() {
        let store = Arc::new(MemoryStore::new());
        let sampler = sampler(
            FakeGeocoder::returning(None),
            FakeWeather::returning("2024-05-01T12:00", 20.1),
            store.clone(),
        );

        let err = sampler.run_cycle().await.unwrap_err();

        assert!(matches!(err, CycleError::Lookup(LookupError::NoResults(_))));
        assert!(store.locations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_weather_lookup_leaves_store_untouched() {
        let store = Arc::new(MemoryStore::new());
        let sampler = sampler(FakeGeocoder::returning(Some(MINSK)), FakeWeather::failing(), store.clone());

        let outcome = sampler.tick().await;

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleError::Lookup(LookupError::ApiError { status: 503, .. }))
        ));
        assert!(store.latest("Minsk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timestamp_mismatch_abandons_cycle() {
        let store = Arc::new(MemoryStore::new());
        let sampler = sampler(
            FakeGeocoder::returning(Some(MINSK)),
            FakeWeather::returning("May 1st, noon", 20.1),
            store.clone(),
        );

        let err = sampler.run_cycle().await.unwrap_err();

        assert!(matches!(err, CycleError::Parse(ParseError::Timestamp { .. })));
        assert!(store.history("Minsk").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_fails_the_cycle() {
        let geocoder = FakeGeocoder::returning(Some(MINSK));
        let sampler = Sampler::new(
            "Minsk",
            geocoder.clone(),
            FakeWeather::returning("2024-05-01T12:00", 20.1),
            Arc::new(FailingStore),
            Duration::from_secs(10),
        );

        let outcome = sampler.tick().await;

        assert!(matches!(
            outcome,
            CycleOutcome::Failed(CycleError::Store(StoreError::Database(sqlx::Error::PoolClosed)))
        ));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);

        // A refused write does not wedge the sampler: the next tick runs again.
        assert!(matches!(
            sampler.tick().await,
            CycleOutcome::Failed(CycleError::Store(_))
        ));
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_next_cycle() {
        let store = Arc::new(MemoryStore::new());
        let failing = sampler(FakeGeocoder::returning(Some(MINSK)), FakeWeather::failing(), store.clone());
        let working = sampler(
            FakeGeocoder::returning(Some(MINSK)),
            FakeWeather::returning("2024-05-01T12:15", 19.0),
            store.clone(),
        );

        assert!(matches!(failing.tick().await, CycleOutcome::Failed(_)));
        assert!(matches!(working.tick().await, CycleOutcome::Stored(_)));
        assert_eq!(store.history("Minsk").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let geocoder = Arc::new(GatedGeocoder {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let sampler = Arc::new(sampler(
            geocoder.clone(),
            FakeWeather::returning("2024-05-01T12:00", 20.1),
            store.clone(),
        ));

        let first = tokio::spawn({
            let sampler = sampler.clone();
            async move { sampler.tick().await }
        });
        geocoder.entered.notified().await;

        assert!(matches!(sampler.tick().await, CycleOutcome::Skipped));

        geocoder.release.notify_one();
        assert!(matches!(first.await.unwrap(), CycleOutcome::Stored(_)));

        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.history("Minsk").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_samples_immediately_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let geocoder = FakeGeocoder::returning(Some(MINSK));
        let sampler = Arc::new(Sampler::new(
            "Minsk",
            geocoder.clone(),
            FakeWeather::returning("2024-05-01T12:00", 20.1),
            store.clone(),
            Duration::from_secs(3600),
        ));

        let handle = sampler.start(CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.latest("Minsk").await.unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first tick should fire immediately");

        handle.stop().await.unwrap();

        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.history("Minsk").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timer_keeps_sampling_after_failed_cycle() {
        let store = Arc::new(MemoryStore::new());
        let weather = Arc::new(FlakyWeather {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let sampler = Arc::new(Sampler::new(
            "Minsk",
            FakeGeocoder::returning(Some(MINSK)),
            weather.clone(),
            store.clone(),
            Duration::from_millis(20),
        ));

        let handle = sampler.start(CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.history("Minsk").await.unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("later ticks should still store readings");

        handle.stop().await.unwrap();

        // Only the first call failed; every later tick stored one reading.
        let calls = weather.calls.load(Ordering::SeqCst);
        let stored = store.history("Minsk").await.unwrap().len();
        assert!(stored >= 2);
        assert_eq!(calls, stored + 1);
    }

    #[tokio::test]
    async fn test_cycle_against_mock_upstreams() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "latitude": 53.9, "longitude": 27.5667 })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "current": { "time": "2024-05-01T12:00", "temperature_2m": 20.1 }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let http = build_http_client(Duration::from_secs(2)).unwrap();
        let store = Arc::new(MemoryStore::new());
        let sampler = sampler(
            Arc::new(GeocodingClient::new(http.clone(), &mock_server.uri())),
            Arc::new(MeteoClient::new(http, &mock_server.uri())),
            store.clone(),
        );

        assert!(matches!(sampler.tick().await, CycleOutcome::Stored(_)));

        let history = store.history("Minsk").await.unwrap();
        assert_eq!(
            history,
            vec![Reading {
                name: "Minsk".to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                temperature: 20.1,
            }]
        );
    }
}
