use crate::store::{Reading, ReadingStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::str::FromStr;

/// SQLite-backed reading store.
///
/// Rows are keyed by `(name, timestamp)`; re-sampling the same provider
/// timestamp overwrites the temperature instead of adding a duplicate row.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self::new(pool))
    }

    pub async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reading (
                name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                temperature REAL NOT NULL,
                PRIMARY KEY (name, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for Database {
    async fn append(&self, reading: Reading) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reading (name, timestamp, temperature)
            VALUES ($1, $2, $3)
            ON CONFLICT (name, timestamp) DO UPDATE SET temperature = excluded.temperature
            "#,
        )
        .bind(&reading.name)
        .bind(reading.timestamp)
        .bind(reading.temperature)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest(&self, location: &str) -> Result<Option<Reading>, StoreError> {
        let result = sqlx::query_as::<_, Reading>(
            "SELECT name, timestamp, temperature FROM reading WHERE name = $1 ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(location)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn history(&self, location: &str) -> Result<Vec<Reading>, StoreError> {
        let results = sqlx::query_as::<_, Reading>(
            "SELECT name, timestamp, temperature FROM reading WHERE name = $1 ORDER BY timestamp ASC",
        )
        .bind(location)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn locations(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT name FROM reading ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        Ok(names)
    }
}
