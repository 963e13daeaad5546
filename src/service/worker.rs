//! Pending-stream consumer
//!
//! Entries are always acknowledged, whatever the outcome. A failed document
//! is recorded in the audit log and dropped; there is no dead-letter stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::model::config::QueueConfig;
use crate::model::{RawDocument, ThreatSignature, WorkerState};
use crate::queue::{QueueEntry, QueueError, ReadCursor, WorkQueue};
use crate::service::audit::{AuditEvent, AuditLogger, AuditSeverity};
use crate::service::dedup::Deduplicator;
use crate::service::llm::StructuredExtractor;
use crate::service::status::StatusReporter;
use crate::service::workflow::{DocumentOutcome, DocumentWorkflow};

/// Upper bound on entries replayed from this consumer's history at startup
const HISTORY_REPLAY_COUNT: usize = 1000;

/// What happened to one queue entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Saved(ThreatSignature),
    Irrelevant,
    Duplicate,
    /// Payload could not be decoded
    Skipped,
    /// Extraction or save failed
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub received: usize,
    pub saved: Vec<ThreatSignature>,
    pub irrelevant: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: EntryOutcome) {
        self.received += 1;
        match outcome {
            EntryOutcome::Saved(threat) => self.saved.push(threat),
            EntryOutcome::Irrelevant => self.irrelevant += 1,
            EntryOutcome::Duplicate => self.duplicates += 1,
            EntryOutcome::Skipped => self.skipped += 1,
            EntryOutcome::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: BatchReport) {
        self.received += other.received;
        self.saved.extend(other.saved);
        self.irrelevant += other.irrelevant;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

pub struct Worker<E> {
    queue: Arc<dyn WorkQueue>,
    dedup: Arc<Deduplicator>,
    workflow: DocumentWorkflow<E>,
    status: StatusReporter,
    audit: Arc<AuditLogger>,
    config: QueueConfig,
}

impl<E: StructuredExtractor> Worker<E> {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        dedup: Arc<Deduplicator>,
        workflow: DocumentWorkflow<E>,
        status: StatusReporter,
        audit: Arc<AuditLogger>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            dedup,
            workflow,
            status,
            audit,
            config,
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.config.consumer_name
    }

    /// Create the consumer group if needed
    pub async fn prepare(&self) -> Result<(), QueueError> {
        self.queue
            .ensure_group(&self.config.pending_stream, &self.config.consumer_group)
            .await
    }

    /// Reprocess entries delivered to this consumer before a restart
    pub async fn replay_history(&self) -> Result<BatchReport, QueueError> {
        let entries = self
            .queue
            .read_group(
                &self.config.pending_stream,
                &self.config.consumer_group,
                &self.config.consumer_name,
                HISTORY_REPLAY_COUNT,
                Duration::ZERO,
                ReadCursor::History,
            )
            .await?;

        if !entries.is_empty() {
            tracing::info!(
                consumer = %self.config.consumer_name,
                count = entries.len(),
                "Replaying unacknowledged entries"
            );
        }
        Ok(self.handle_entries(entries).await)
    }

    /// Take over entries other consumers left pending for too long
    pub async fn reclaim(&self) -> Result<BatchReport, QueueError> {
        let entries = self
            .queue
            .reclaim_stuck(
                &self.config.pending_stream,
                &self.config.consumer_group,
                &self.config.consumer_name,
                Duration::from_millis(self.config.reclaim_min_idle_ms),
                self.config.read_count.max(1) * 10,
            )
            .await?;
        Ok(self.handle_entries(entries).await)
    }

    /// Read one batch of new entries, waiting up to `block` for them
    pub async fn process_batch(&self, block: Duration) -> Result<BatchReport, QueueError> {
        self.status.report(WorkerState::Polling).await;

        let entries = self
            .queue
            .read_group(
                &self.config.pending_stream,
                &self.config.consumer_group,
                &self.config.consumer_name,
                self.config.read_count.max(1),
                block,
                ReadCursor::New,
            )
            .await?;

        let report = self.handle_entries(entries).await;
        if report.received > 0 {
            self.status.report(WorkerState::Polling).await;
        }
        Ok(report)
    }

    /// Drain everything currently pending without waiting
    pub async fn drain(&self) -> Result<BatchReport, QueueError> {
        let mut total = BatchReport::default();
        loop {
            let report = self.process_batch(Duration::ZERO).await?;
            if report.received == 0 {
                return Ok(total);
            }
            total.merge(report);
        }
    }

    async fn handle_entries(&self, entries: Vec<QueueEntry>) -> BatchReport {
        let mut report = BatchReport::default();
        for entry in entries {
            self.status.report(WorkerState::Processing).await;
            let outcome = self.handle_entry(&entry).await;
            report.record(outcome);
        }
        report
    }

    async fn handle_entry(&self, entry: &QueueEntry) -> EntryOutcome {
        let outcome = self.process_entry(entry).await;

        match self
            .queue
            .acknowledge(
                &self.config.pending_stream,
                &self.config.consumer_group,
                entry.id,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!(entry_id = %entry.id, "Entry was already acknowledged"),
            Err(e) => tracing::warn!(entry_id = %entry.id, error = %e, "Failed to acknowledge entry"),
        }

        outcome
    }

    async fn process_entry(&self, entry: &QueueEntry) -> EntryOutcome {
        let entry_id = entry.id.to_string();
        self.audit.info(
            AuditEvent::JobReceived,
            None,
            json!({ "entry_id": entry_id, "consumer": self.config.consumer_name }),
        );

        let doc: RawDocument = match entry.decode() {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(entry_id = %entry_id, error = %e, "Skipping undecodable entry");
                self.audit.warn(
                    AuditEvent::JobSkipped,
                    entry.data.as_deref(),
                    json!({ "entry_id": entry_id, "reason": "decode_error", "error": e.to_string() }),
                );
                return EntryOutcome::Skipped;
            }
        };

        match self.dedup.is_duplicate(&doc).await {
            Ok(true) => {
                tracing::info!(doc_id = %doc.id, "Skipping duplicate document");
                self.audit.info(
                    AuditEvent::JobSkipped,
                    Some(&doc.title),
                    json!({ "entry_id": entry_id, "doc_id": doc.id, "reason": "duplicate" }),
                );
                return EntryOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(doc_id = %doc.id, error = %e, "Dedup check failed, processing anyway");
            }
        }

        // The same paper can sit in the stream under several entries; the
        // lease keeps two consumers from analyzing it at once
        let lease_ttl = Duration::from_millis(self.config.reclaim_min_idle_ms);
        match self
            .dedup
            .acquire_lease(&doc, &self.config.consumer_name, lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(doc_id = %doc.id, "Document is being analyzed by another consumer");
                self.audit.info(
                    AuditEvent::JobSkipped,
                    Some(&doc.title),
                    json!({ "entry_id": entry_id, "doc_id": doc.id, "reason": "in_progress" }),
                );
                return EntryOutcome::Duplicate;
            }
            Err(e) => {
                tracing::warn!(doc_id = %doc.id, error = %e, "Lease unavailable, processing anyway");
            }
        }

        let outcome = self.analyze(&doc, &entry_id).await;
        if let Err(e) = self.dedup.release_lease(&doc).await {
            tracing::warn!(doc_id = %doc.id, error = %e, "Failed to release document lease");
        }
        outcome
    }

    async fn analyze(&self, doc: &RawDocument, entry_id: &str) -> EntryOutcome {
        let start_time = Instant::now();
        self.audit.info(
            AuditEvent::AnalysisStart,
            Some(&doc.title),
            json!({ "entry_id": entry_id, "doc_id": doc.id }),
        );

        let outcome = match self.workflow.run(doc).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(doc_id = %doc.id, error = %e, "Failed to save analysis");
                self.audit.log(
                    AuditEvent::JobError,
                    AuditSeverity::Critical,
                    Some(&doc.title),
                    json!({ "entry_id": entry_id, "doc_id": doc.id, "error": e.to_string() }),
                );
                return EntryOutcome::Failed;
            }
        };

        if outcome.is_terminal() {
            if let Err(e) = self.dedup.mark_processed(doc).await {
                tracing::warn!(doc_id = %doc.id, error = %e, "Failed to mark document processed");
            }
        }

        let result = match outcome {
            DocumentOutcome::Saved(threat, analyzed_id) => {
                let severity = if threat.severity >= 4 {
                    AuditSeverity::Critical
                } else {
                    AuditSeverity::Info
                };
                self.audit.log(
                    AuditEvent::ThreatDetected,
                    severity,
                    Some(&doc.title),
                    json!({
                        "doc_id": doc.id,
                        "analyzed_entry_id": analyzed_id.to_string(),
                        "attack_type": threat.attack_type.as_str(),
                        "threat_severity": threat.severity,
                    }),
                );
                EntryOutcome::Saved(threat)
            }
            DocumentOutcome::Irrelevant => EntryOutcome::Irrelevant,
            DocumentOutcome::ExtractionFailed => {
                self.audit.warn(
                    AuditEvent::JobError,
                    Some(&doc.title),
                    json!({ "entry_id": entry_id, "doc_id": doc.id, "error": "extraction_failed" }),
                );
                EntryOutcome::Failed
            }
        };

        self.audit.info(
            AuditEvent::AnalysisComplete,
            Some(&doc.title),
            json!({
                "entry_id": entry_id,
                "doc_id": doc.id,
                "outcome": match &result {
                    EntryOutcome::Saved(_) => "saved",
                    EntryOutcome::Irrelevant => "irrelevant",
                    _ => "failed",
                },
                "elapsed_ms": start_time.elapsed().as_millis() as u64,
            }),
        );

        result
    }
}
