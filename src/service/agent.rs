//! Long-running agent: scheduled ingestion, queue consumption, curation
//!
//! One loop owns every component. Manual triggers arrive over an mpsc
//! channel fed by the Redis pub/sub listener and the HTTP API, and are picked
//! up at the start of the next iteration, so their latency is bounded by the
//! queue block time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use redis::AsyncCommands;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::model::Trigger;
use crate::model::config::Config;
use crate::queue::QueueError;
use crate::service::audit::{AuditEvent, AuditLogger};
use crate::service::curator::{CuratorError, CuratorService};
use crate::service::ingestion::{IngestionOptions, IngestionService};
use crate::service::llm::StructuredExtractor;
use crate::service::worker::Worker;

pub const TRIGGER_CHANNEL: &str = "agent:trigger";

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    pub block: Duration,
    pub curator_every: u32,
    pub ingestion_interval: Duration,
    pub ingestion: IngestionOptions,
    pub reclaim_interval: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            block: Duration::from_millis(config.queue.block_ms),
            curator_every: config.curator.every.max(1),
            ingestion_interval: Duration::from_secs(config.ingestion.interval_secs),
            ingestion: IngestionOptions {
                days_back: config.ingestion.days_back,
                max_results: config.ingestion.max_results,
            },
            reclaim_interval: Duration::from_secs(config.queue.reclaim_interval_secs),
        }
    }
}

/// Manual requests gathered since the last iteration
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Pending {
    ingest: bool,
    drain: bool,
    curate: bool,
}

impl Pending {
    fn add(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Ingest => self.ingest = true,
            Trigger::ProcessBatch => self.drain = true,
            Trigger::ProcessWithCurator => {
                self.drain = true;
                self.curate = true;
            }
        }
    }
}

/// Loop bookkeeping
#[derive(Debug)]
pub struct AgentState {
    successes_since_curation: u32,
    next_ingestion: Instant,
    next_reclaim: Instant,
}

impl AgentState {
    fn new(settings: &AgentSettings) -> Self {
        let now = Instant::now();
        Self {
            successes_since_curation: 0,
            next_ingestion: now,
            next_reclaim: now + settings.reclaim_interval,
        }
    }
}

pub struct Agent<E> {
    worker: Worker<E>,
    ingestion: IngestionService<E>,
    curator: CuratorService<E>,
    audit: Arc<AuditLogger>,
    settings: AgentSettings,
}

impl<E: StructuredExtractor> Agent<E> {
    pub fn new(
        worker: Worker<E>,
        ingestion: IngestionService<E>,
        curator: CuratorService<E>,
        audit: Arc<AuditLogger>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            worker,
            ingestion,
            curator,
            audit,
            settings,
        }
    }

    /// Run until `shutdown` flips to true
    pub async fn run(
        &self,
        mut triggers: mpsc::Receiver<Trigger>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), QueueError> {
        self.audit.info(
            AuditEvent::SystemStart,
            None,
            json!({ "consumer": self.worker.consumer_name() }),
        );

        self.worker.prepare().await?;
        let mut state = AgentState::new(&self.settings);
        match self.worker.replay_history().await {
            Ok(report) => self.record_successes(&mut state, report.saved.len()),
            Err(e) => tracing::warn!(error = %e, "History replay failed"),
        }

        tracing::info!(consumer = %self.worker.consumer_name(), "Agent started");

        while !*shutdown.borrow() {
            if let Err(e) = self.tick(&mut state, &mut triggers).await {
                tracing::error!(error = %e, "Agent loop error, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!("Agent stopped");
        self.audit.info(AuditEvent::SystemStop, None, serde_json::Value::Null);
        Ok(())
    }

    fn record_successes(&self, state: &mut AgentState, saved: usize) {
        state.successes_since_curation = state
            .successes_since_curation
            .saturating_add(saved as u32);
    }

    /// One loop iteration
    pub async fn tick(
        &self,
        state: &mut AgentState,
        triggers: &mut mpsc::Receiver<Trigger>,
    ) -> Result<(), QueueError> {
        let mut pending = Pending::default();
        while let Ok(trigger) = triggers.try_recv() {
            tracing::info!(trigger = %trigger, "Manual trigger received");
            pending.add(trigger);
        }

        let now = Instant::now();
        if pending.ingest || now >= state.next_ingestion {
            match self.ingestion.run(self.settings.ingestion).await {
                Ok(summary) => tracing::info!(
                    accepted = summary.accepted,
                    rejected = summary.rejected,
                    "Scheduled ingestion finished"
                ),
                Err(e) => tracing::error!(error = %e, "Ingestion failed"),
            }
            state.next_ingestion = Instant::now() + self.settings.ingestion_interval;
        }

        if now >= state.next_reclaim {
            let report = self.with_group(|| self.worker.reclaim()).await?;
            self.record_successes(state, report.saved.len());
            state.next_reclaim = Instant::now() + self.settings.reclaim_interval;
        }

        let report = if pending.drain {
            self.with_group(|| self.worker.drain()).await?
        } else {
            self.with_group(|| self.worker.process_batch(self.settings.block))
                .await?
        };
        self.record_successes(state, report.saved.len());

        if pending.curate || state.successes_since_curation >= self.settings.curator_every {
            state.successes_since_curation = 0;
            if let Err(e) = self.curate().await {
                tracing::error!(error = %e, "Curator run failed");
            }
        }

        Ok(())
    }

    /// Run a group operation, recreating the consumer group once if it has
    /// gone missing (a backfill reset deletes the stream under a running agent)
    async fn with_group<T, F, Fut>(&self, op: F) -> Result<T, QueueError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        match op().await {
            Err(QueueError::NoGroup { stream, group }) => {
                tracing::warn!(stream = %stream, group = %group, "Consumer group missing, recreating");
                self.worker.prepare().await?;
                op().await
            }
            other => other,
        }
    }

    pub async fn curate(&self) -> Result<(), CuratorError> {
        let report = self.curator.run().await?;
        tracing::info!(
            headline = %report.briefing.briefing.headline,
            stored = report.stored,
            "Curator run finished"
        );
        Ok(())
    }

    pub fn initial_state(&self) -> AgentState {
        AgentState::new(&self.settings)
    }
}

/// Forward trigger names published on [`TRIGGER_CHANNEL`] into `sender`.
/// Returns when the subscription or the receiving side closes.
pub async fn listen_for_triggers(
    client: redis::Client,
    sender: mpsc::Sender<Trigger>,
) -> Result<(), redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(TRIGGER_CHANNEL).await?;
    tracing::info!(channel = TRIGGER_CHANNEL, "Listening for manual triggers");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable trigger message");
                continue;
            }
        };

        match payload.parse::<Trigger>() {
            Ok(trigger) => {
                if sender.send(trigger).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring unknown trigger"),
        }
    }

    Ok(())
}

/// Publish a trigger; returns how many listeners received it
pub async fn publish_trigger(client: &redis::Client, trigger: Trigger) -> Result<usize, redis::RedisError> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.publish(TRIGGER_CHANNEL, trigger.as_str()).await
}
