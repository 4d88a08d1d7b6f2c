use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// One temperature observation for a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Readings per location, kept in timestamp order.
///
/// The sampler is the only writer; query handlers only read. Every method is
/// atomic with respect to the others, so a reader sees a sequence either
/// before or after an append, never in between.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Append a reading to the sequence of `reading.name`.
    async fn append(&self, reading: Reading) -> Result<(), StoreError>;

    /// The reading with the greatest timestamp, if the location was ever written.
    async fn latest(&self, location: &str) -> Result<Option<Reading>, StoreError>;

    /// A snapshot of every stored reading for the location, oldest first.
    async fn history(&self, location: &str) -> Result<Vec<Reading>, StoreError>;

    /// Known location names, sorted.
    async fn locations(&self) -> Result<Vec<String>, StoreError>;
}

/// In-process store behind a single map-wide reader/writer lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    readings: Arc<RwLock<HashMap<String, VecDeque<Reading>>>>,
    history_limit: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` readings per location, dropping the oldest.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit.max(1));
        self
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn append(&self, reading: Reading) -> Result<(), StoreError> {
        let mut readings = self.readings.write().await;
        let sequence = readings.entry(reading.name.clone()).or_default();

        // In-order appends land at the end; a late arrival goes after its equals.
        let position = sequence.partition_point(|existing| existing.timestamp <= reading.timestamp);
        sequence.insert(position, reading);

        if let Some(limit) = self.history_limit {
            while sequence.len() > limit {
                sequence.pop_front();
            }
        }

        Ok(())
    }

    async fn latest(&self, location: &str) -> Result<Option<Reading>, StoreError> {
        Ok(self
            .readings
            .read()
            .await
            .get(location)
            .and_then(|sequence| sequence.back())
            .cloned())
    }

    async fn history(&self, location: &str) -> Result<Vec<Reading>, StoreError> {
        Ok(self
            .readings
            .read()
            .await
            .get(location)
            .map(|sequence| sequence.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn locations(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.readings.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
