//! Durable threat dataset
//!
//! PostgreSQL in production, an in-process store for tests and dry runs.
//! Both deduplicate by threat URL, so redelivered analyses are harmless.

pub mod models;
pub mod repository;

use std::env;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;

use crate::model::ThreatSignature;

pub use repository::PgThreatStore;

// Environment variable names
const ENV_POSTGRES_HOST: &str = "RADAR_POSTGRES_HOST";
const ENV_POSTGRES_PORT: &str = "RADAR_POSTGRES_PORT";
const ENV_POSTGRES_USER: &str = "RADAR_POSTGRES_USER";
const ENV_POSTGRES_PASSWORD: &str = "RADAR_POSTGRES_PASSWORD";
const ENV_POSTGRES_DB: &str = "RADAR_POSTGRES_DB";

// Default values
const DEFAULT_POSTGRES_HOST: &str = "127.0.0.1";
const DEFAULT_POSTGRES_PORT: &str = "5432";
const DEFAULT_POSTGRES_USER: &str = "radar";
const DEFAULT_POSTGRES_PASSWORD: &str = "radar";
const DEFAULT_POSTGRES_DB: &str = "safety_radar";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ThreatStore: Send + Sync {
    /// Insert threats whose URL is not stored yet; returns how many were added
    async fn append_and_deduplicate(&self, threats: &[ThreatSignature]) -> Result<usize, StoreError>;

    /// Threats processed within the last `days` days, newest first
    async fn fetch_recent(&self, days: u32) -> Result<Vec<ThreatSignature>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Create a new database connection pool
pub async fn create_pool() -> Result<PgPool, StoreError> {
    let host = env::var(ENV_POSTGRES_HOST).unwrap_or_else(|_| DEFAULT_POSTGRES_HOST.to_string());
    let port = env::var(ENV_POSTGRES_PORT).unwrap_or_else(|_| DEFAULT_POSTGRES_PORT.to_string());
    let user = env::var(ENV_POSTGRES_USER).unwrap_or_else(|_| DEFAULT_POSTGRES_USER.to_string());
    let password =
        env::var(ENV_POSTGRES_PASSWORD).unwrap_or_else(|_| DEFAULT_POSTGRES_PASSWORD.to_string());
    let database = env::var(ENV_POSTGRES_DB).unwrap_or_else(|_| DEFAULT_POSTGRES_DB.to_string());

    let database_url = format!(
        "postgres://{}:{}@{}:{}/{}",
        user, password, host, port, database
    );

    tracing::debug!(host = %host, port = %port, database = %database, "Connecting to PostgreSQL");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    tracing::info!(host = %host, port = %port, "PostgreSQL connection established");

    Ok(pool)
}

/// Initialize database schema
pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS threat_signatures (
            url TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            published_date TIMESTAMPTZ NOT NULL,
            relevance_score DOUBLE PRECISION NOT NULL,
            attack_type VARCHAR(50) NOT NULL,
            modality JSONB NOT NULL DEFAULT '[]',
            affected_models JSONB NOT NULL DEFAULT '[]',
            is_theoretical BOOLEAN NOT NULL DEFAULT FALSE,
            severity SMALLINT NOT NULL,
            summary_tldr TEXT NOT NULL,
            summary_detailed TEXT NOT NULL DEFAULT '',
            key_findings JSONB NOT NULL DEFAULT '[]',
            methodology_brief TEXT,
            code_repository TEXT,
            source VARCHAR(50) NOT NULL,
            processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_threat_signatures_processed_at ON threat_signatures(processed_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// In-process threat store
#[derive(Default)]
pub struct MemoryThreatStore {
    threats: Mutex<Vec<ThreatSignature>>,
}

impl MemoryThreatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreatStore for MemoryThreatStore {
    async fn append_and_deduplicate(&self, threats: &[ThreatSignature]) -> Result<usize, StoreError> {
        let mut stored = self.threats.lock().await;
        let mut added = 0;
        for threat in threats {
            if stored.iter().all(|t| t.url != threat.url) {
                stored.push(threat.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    async fn fetch_recent(&self, days: u32) -> Result<Vec<ThreatSignature>, StoreError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut recent: Vec<ThreatSignature> = self
            .threats
            .lock()
            .await
            .iter()
            .filter(|t| t.processed_at >= cutoff)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(recent)
    }
}
