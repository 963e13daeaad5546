//! Curator: turns the latest analyzed threats into a published briefing

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::db::ThreatStore;
use crate::model::{PublishedBriefing, ThreatSignature};
use crate::queue::{QueueError, WorkQueue};
use crate::service::audit::{AuditEvent, AuditLogger};
use crate::service::cache::{CacheError, KeyValueStore, get_json, set_json};
use crate::service::editorial::{EditorialResult, EditorialWorkflow};
use crate::service::llm::StructuredExtractor;

pub const LATEST_BRIEFING_KEY: &str = "curator:latest_summary";

#[derive(Debug, thiserror::Error)]
pub enum CuratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CuratorReport {
    pub briefing: PublishedBriefing,
    /// False when the run aborted without any draft and the previous
    /// briefing was left in place
    pub stored: bool,
    pub skipped_entries: usize,
    pub persisted: usize,
}

/// Read the currently published briefing
pub async fn latest_briefing(
    store: &dyn KeyValueStore,
) -> Result<Option<PublishedBriefing>, CacheError> {
    get_json(store, LATEST_BRIEFING_KEY).await
}

pub struct CuratorService<E> {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn KeyValueStore>,
    threats: Option<Arc<dyn ThreatStore>>,
    editorial: EditorialWorkflow<E>,
    audit: Arc<AuditLogger>,
    analyzed_stream: String,
    batch_size: usize,
}

impl<E: StructuredExtractor> CuratorService<E> {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn KeyValueStore>,
        threats: Option<Arc<dyn ThreatStore>>,
        editorial: EditorialWorkflow<E>,
        audit: Arc<AuditLogger>,
        analyzed_stream: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            store,
            threats,
            editorial,
            audit,
            analyzed_stream: analyzed_stream.to_string(),
            batch_size,
        }
    }

    async fn load_batch(&self) -> Result<(Vec<ThreatSignature>, usize), QueueError> {
        let entries = self.queue.latest(&self.analyzed_stream, self.batch_size).await?;
        let mut threats = Vec::with_capacity(entries.len());
        let mut skipped = 0;
        for entry in entries {
            match entry.decode::<ThreatSignature>() {
                Ok(threat) => threats.push(threat),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(entry_id = %entry.id, error = %e, "Skipping undecodable analyzed entry");
                }
            }
        }
        Ok((threats, skipped))
    }

    async fn persist(&self, threats: &[ThreatSignature]) -> usize {
        let Some(store) = &self.threats else {
            return 0;
        };
        match store.append_and_deduplicate(threats).await {
            Ok(added) => {
                tracing::info!(submitted = threats.len(), added = added, "Persisted threat batch");
                added
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist threat batch");
                0
            }
        }
    }

    async fn previous_summary(&self) -> String {
        match latest_briefing(self.store.as_ref()).await {
            Ok(Some(previous)) => previous.briefing.summary_markdown,
            Ok(None) => String::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not load previous briefing");
                String::new()
            }
        }
    }

    /// Run the editorial workflow over the latest analyzed threats and
    /// publish the result
    pub async fn run(&self) -> Result<CuratorReport, CuratorError> {
        let (threats, skipped_entries) = self.load_batch().await?;
        tracing::info!(
            threats = threats.len(),
            skipped = skipped_entries,
            "Curator batch loaded"
        );

        let persisted = self.persist(&threats).await;
        let previous_summary = self.previous_summary().await;
        let threat_count = threats.len();

        let result: EditorialResult = self.editorial.run(threats, &previous_summary).await;

        let published = PublishedBriefing {
            approved: result.is_approved(),
            briefing: result.briefing.clone(),
            generated_at: Utc::now(),
            threat_count,
            critique_rounds: result.critique_rounds,
        };

        if result.is_placeholder() {
            tracing::warn!(outcome = ?result.outcome, "Keeping previous briefing");
            return Ok(CuratorReport {
                briefing: published,
                stored: false,
                skipped_entries,
                persisted,
            });
        }

        set_json(self.store.as_ref(), LATEST_BRIEFING_KEY, &published).await?;

        tracing::info!(
            headline = %published.briefing.headline,
            approved = published.approved,
            threat_count = threat_count,
            "Briefing published"
        );
        self.audit.info(
            AuditEvent::BriefingPublished,
            Some(&published.briefing.summary_markdown),
            json!({
                "headline": published.briefing.headline,
                "threat_count": threat_count,
                "critique_rounds": published.critique_rounds,
                "approved": published.approved,
            }),
        );

        Ok(CuratorReport {
            briefing: published,
            stored: true,
            skipped_entries,
            persisted,
        })
    }
}
