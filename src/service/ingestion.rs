//! Ingestion: source -> dedup gate -> relevance filter -> pending stream

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use serde_json::json;

use crate::model::config::QueueConfig;
use crate::queue::{QueueError, WorkQueue, encode};
use crate::retriever::DocumentSource;
use crate::service::audit::{AuditEvent, AuditLogger};
use crate::service::dedup::{DedupError, Deduplicator};
use crate::service::filter::RelevanceFilter;
use crate::service::llm::StructuredExtractor;

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Dedup(#[from] DedupError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionOptions {
    pub days_back: u32,
    pub max_results: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionSummary {
    pub fetched: usize,
    pub duplicates: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub duration_ms: u64,
    pub papers_pending: usize,
    pub papers_analyzed: usize,
    /// Set when the source stopped early with an error
    pub source_error: Option<String>,
}

impl IngestionSummary {
    /// Accepted share of the evaluated (non-duplicate) papers
    pub fn acceptance_rate(&self) -> Option<f64> {
        let evaluated = self.accepted + self.rejected;
        (evaluated > 0).then(|| self.accepted as f64 / evaluated as f64)
    }
}

impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = self
            .acceptance_rate()
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "N/A".to_string());
        writeln!(f, "  Fetched:         {} papers", self.fetched)?;
        writeln!(f, "  Duplicates:      {} papers", self.duplicates)?;
        writeln!(f, "  Accepted:        {} papers", self.accepted)?;
        writeln!(f, "  Rejected:        {} papers", self.rejected)?;
        writeln!(f, "  Acceptance Rate: {}", rate)?;
        writeln!(
            f,
            "  Duration:        {:.2} minutes",
            Duration::from_millis(self.duration_ms).as_secs_f64() / 60.0
        )?;
        writeln!(f, "  Queue Pending:   {}", self.papers_pending)?;
        write!(f, "  Queue Analyzed:  {}", self.papers_analyzed)?;
        if let Some(error) = &self.source_error {
            write!(f, "\n  Source Error:    {}", error)?;
        }
        Ok(())
    }
}

pub struct IngestionService<E> {
    source: Arc<dyn DocumentSource>,
    filter: RelevanceFilter<E>,
    dedup: Arc<Deduplicator>,
    queue: Arc<dyn WorkQueue>,
    audit: Arc<AuditLogger>,
    config: QueueConfig,
}

impl<E: StructuredExtractor> IngestionService<E> {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        filter: RelevanceFilter<E>,
        dedup: Arc<Deduplicator>,
        queue: Arc<dyn WorkQueue>,
        audit: Arc<AuditLogger>,
        config: QueueConfig,
    ) -> Self {
        Self {
            source,
            filter,
            dedup,
            queue,
            audit,
            config,
        }
    }

    /// Run one ingestion pass. Source errors end the pass early and are
    /// reported in the summary; queue errors are returned.
    pub async fn run(&self, options: IngestionOptions) -> Result<IngestionSummary, IngestionError> {
        let start_time = Instant::now();
        let mut summary = IngestionSummary::default();

        self.queue
            .ensure_group(&self.config.pending_stream, &self.config.consumer_group)
            .await?;

        tracing::info!(
            source = %self.source.name(),
            days_back = options.days_back,
            max_results = options.max_results,
            "Starting ingestion"
        );

        let mut documents = self.source.fetch_recent(options.days_back, options.max_results);
        while let Some(next) = documents.next().await {
            let doc = match next {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::error!(error = %e, retryable = e.is_retryable(), "Document source failed");
                    summary.source_error = Some(e.to_string());
                    break;
                }
            };
            summary.fetched += 1;

            match self.dedup.is_duplicate(&doc).await {
                Ok(true) => {
                    summary.duplicates += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(doc_id = %doc.id, error = %e, "Dedup check failed, filtering anyway");
                }
            }

            let verdict = self.filter.analyze(&doc.title, &doc.content).await;
            let title_preview: String = doc.title.chars().take(60).collect();

            if verdict.is_relevant {
                summary.accepted += 1;
                let entry_id = self
                    .queue
                    .enqueue(&self.config.pending_stream, &encode(&doc)?)
                    .await?;
                tracing::info!(doc_id = %doc.id, entry_id = %entry_id, title = %title_preview, "ACCEPTED");
                self.audit.info(
                    AuditEvent::JobPublished,
                    Some(&doc.title),
                    json!({
                        "doc_id": doc.id,
                        "entry_id": entry_id.to_string(),
                        "confidence": verdict.confidence_score,
                    }),
                );
            } else {
                summary.rejected += 1;
                tracing::debug!(doc_id = %doc.id, title = %title_preview, "REJECTED");
                if let Err(e) = self.dedup.mark_processed(&doc).await {
                    tracing::warn!(doc_id = %doc.id, error = %e, "Failed to mark rejected document");
                }
            }
        }
        drop(documents);

        summary.papers_pending = self.queue.len(&self.config.pending_stream).await?;
        summary.papers_analyzed = self.queue.len(&self.config.analyzed_stream).await?;
        summary.duration_ms = start_time.elapsed().as_millis() as u64;

        tracing::info!(
            fetched = summary.fetched,
            accepted = summary.accepted,
            rejected = summary.rejected,
            duplicates = summary.duplicates,
            elapsed_ms = summary.duration_ms,
            "Ingestion complete"
        );

        Ok(summary)
    }

    /// Delete both streams and every dedup marker, then recreate the
    /// consumer group from the beginning of the pending stream.
    pub async fn reset(&self) -> Result<(), IngestionError> {
        tracing::info!("Safe reset: deleting streams and markers");

        self.queue.delete_stream(&self.config.pending_stream).await?;
        self.queue.delete_stream(&self.config.analyzed_stream).await?;
        let markers = self.dedup.reset().await?;
        self.queue
            .ensure_group(&self.config.pending_stream, &self.config.consumer_group)
            .await?;

        tracing::info!(markers = markers, "Safe reset complete");
        Ok(())
    }
}
