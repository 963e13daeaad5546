//! Heartbeat keys read by operators and the status endpoint

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::WorkerState;
use crate::service::cache::{CacheError, KeyValueStore};

pub const STATUS_KEY: &str = "agent:status";
pub const LAST_ACTIVITY_KEY: &str = "agent:last_activity";

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn KeyValueStore>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Publish the worker state. Failures are logged, never returned.
    pub async fn report(&self, state: WorkerState) {
        if let Err(e) = self.try_report(state).await {
            tracing::warn!(state = state.as_str(), error = %e, "Failed to update agent status");
        }
    }

    async fn try_report(&self, state: WorkerState) -> Result<(), CacheError> {
        self.store.set(STATUS_KEY, state.as_str()).await?;
        self.store
            .set(LAST_ACTIVITY_KEY, &Utc::now().to_rfc3339())
            .await
    }

    pub async fn state(&self) -> Result<Option<String>, CacheError> {
        self.store.get(STATUS_KEY).await
    }

    pub async fn last_activity(&self) -> Result<Option<DateTime<Utc>>, CacheError> {
        Ok(self
            .store
            .get(LAST_ACTIVITY_KEY)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|ts| ts.with_timezone(&Utc)))
    }
}
