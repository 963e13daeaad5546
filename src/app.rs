//! Application wiring
//!
//! Backends, model clients and the pipeline components are built here once
//! and handed to the agent loop, the one-shot commands and the HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::db::{self, MemoryThreatStore, PgThreatStore, ThreatStore};
use crate::model::config::QueueConfig;
use crate::model::{Config, Trigger};
use crate::queue::{MemoryQueue, RedisStreamQueue, WorkQueue};
use crate::retriever::{ArxivSource, DocumentSource};
use crate::service::audit::AuditLogger;
use crate::service::cache::{self, KeyValueStore, MemoryStore, RedisStore};
use crate::service::editorial::EditorialWorkflow;
use crate::service::extraction::ExtractionService;
use crate::service::filter::RelevanceFilter;
use crate::service::status::StatusReporter;
use crate::service::workflow::DocumentWorkflow;
use crate::service::{Agent, AgentSettings, CuratorService, Deduplicator, IngestionService, LlmClient, Worker};

/// State shared with the HTTP handlers
pub struct AppState {
    pub queue: Arc<dyn WorkQueue>,
    pub store: Arc<dyn KeyValueStore>,
    pub threats: Option<Arc<dyn ThreatStore>>,
    /// Feeds manual triggers into the agent loop
    pub triggers: mpsc::Sender<Trigger>,
    pub queue_config: QueueConfig,
}

#[cfg(test)]
impl AppState {
    pub fn in_memory() -> (Self, mpsc::Receiver<Trigger>) {
        let (tx, rx) = mpsc::channel(8);
        let state = Self {
            queue: Arc::new(MemoryQueue::new()),
            store: Arc::new(MemoryStore::new()),
            threats: None,
            triggers: tx,
            queue_config: QueueConfig::default(),
        };
        (state, rx)
    }
}

/// Storage handles
pub struct Backends {
    /// Present unless running in dry-run mode
    pub redis: Option<redis::Client>,
    pub queue: Arc<dyn WorkQueue>,
    pub store: Arc<dyn KeyValueStore>,
    pub threats: Option<Arc<dyn ThreatStore>>,
}

impl Backends {
    /// Connect to Redis (required) and PostgreSQL (optional)
    pub async fn connect() -> Result<Self, AppError> {
        let client = cache::connect_redis()
            .await
            .map_err(|e| AppError::RedisInit(e.to_string()))?;

        let threats: Option<Arc<dyn ThreatStore>> = match db::create_pool().await {
            Ok(pool) => match db::init_schema(&pool).await {
                Ok(()) => Some(Arc::new(PgThreatStore::new(pool))),
                Err(e) => {
                    tracing::warn!(error = %e, "Schema initialization failed, running without threat store");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "PostgreSQL unavailable, running without threat store");
                None
            }
        };

        Ok(Self {
            redis: Some(client.clone()),
            queue: Arc::new(RedisStreamQueue::new(client.clone())),
            store: Arc::new(RedisStore::new(client)),
            threats,
        })
    }

    /// In-process backends; nothing survives the process
    pub fn in_memory() -> Self {
        tracing::info!("Dry run: using in-memory queue, marker store and threat store");
        Self {
            redis: None,
            queue: Arc::new(MemoryQueue::new()),
            store: Arc::new(MemoryStore::new()),
            threats: Some(Arc::new(MemoryThreatStore::new())),
        }
    }
}

/// One client per model role
pub struct LlmClients {
    pub filter: Arc<LlmClient>,
    pub extraction: Arc<LlmClient>,
    pub analysis: Arc<LlmClient>,
}

impl LlmClients {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AppError::MissingConfig("OPENAI_API_KEY"))?;

        let base = LlmClient::new(
            &api_key,
            &config.llm.filter_model,
            Duration::from_secs(config.llm.timeout_secs),
        )
        .map_err(|_| AppError::InvalidConfig("Invalid OPENAI_API_KEY"))?;

        Ok(Self {
            extraction: Arc::new(base.with_model(&config.llm.extraction_model)),
            analysis: Arc::new(base.with_model(&config.llm.analysis_model)),
            filter: Arc::new(base),
        })
    }
}

/// Everything needed to build pipeline components
pub struct AppContext {
    pub config: Config,
    pub backends: Backends,
    pub llm: LlmClients,
    pub dedup: Arc<Deduplicator>,
    pub audit: Arc<AuditLogger>,
}

impl AppContext {
    pub async fn new(config: Config, dry_run: bool) -> Result<Self, AppError> {
        let backends = if dry_run {
            Backends::in_memory()
        } else {
            Backends::connect().await?
        };
        let llm = LlmClients::from_config(&config)?;

        Ok(Self {
            dedup: Arc::new(Deduplicator::new(backends.store.clone())),
            audit: Arc::new(AuditLogger::new("safety-radar")),
            config,
            backends,
            llm,
        })
    }

    fn filter(&self) -> RelevanceFilter<LlmClient> {
        RelevanceFilter::new(self.llm.filter.clone(), &self.config.filter)
    }

    pub fn source(&self) -> Arc<dyn DocumentSource> {
        Arc::new(ArxivSource::new(&self.config.ingestion.categories))
    }

    pub fn ingestion(&self) -> IngestionService<LlmClient> {
        IngestionService::new(
            self.source(),
            self.filter(),
            self.dedup.clone(),
            self.backends.queue.clone(),
            self.audit.clone(),
            self.config.queue.clone(),
        )
    }

    pub fn worker(&self) -> Worker<LlmClient> {
        let workflow = DocumentWorkflow::new(
            self.filter(),
            ExtractionService::new(self.llm.extraction.clone()),
            self.backends.queue.clone(),
            &self.config.queue.analyzed_stream,
        );
        Worker::new(
            self.backends.queue.clone(),
            self.dedup.clone(),
            workflow,
            StatusReporter::new(self.backends.store.clone()),
            self.audit.clone(),
            self.config.queue.clone(),
        )
    }

    pub fn curator(&self) -> CuratorService<LlmClient> {
        CuratorService::new(
            self.backends.queue.clone(),
            self.backends.store.clone(),
            self.backends.threats.clone(),
            EditorialWorkflow::new(self.llm.analysis.clone()),
            self.audit.clone(),
            &self.config.queue.analyzed_stream,
            self.config.curator.batch_size,
        )
    }

    pub fn agent(&self) -> Agent<LlmClient> {
        Agent::new(
            self.worker(),
            self.ingestion(),
            self.curator(),
            self.audit.clone(),
            AgentSettings::from_config(&self.config),
        )
    }

    pub fn api_state(&self, triggers: mpsc::Sender<Trigger>) -> AppState {
        AppState {
            queue: self.backends.queue.clone(),
            store: self.backends.store.clone(),
            threats: self.backends.threats.clone(),
            triggers,
            queue_config: self.config.queue.clone(),
        }
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    #[error("Redis initialization failed: {0}")]
    RedisInit(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
