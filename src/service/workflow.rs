//! Per-document pipeline: filter, extract, save
//!
//! A linear state machine with two early exits. There are no retries here;
//! redelivery by the queue is the only retry path.

use std::sync::Arc;

use crate::model::{RawDocument, ThreatSignature, truncate_chars};
use crate::queue::{EntryId, QueueError, WorkQueue, encode};
use crate::service::extraction::ExtractionService;
use crate::service::filter::RelevanceFilter;
use crate::service::llm::StructuredExtractor;

/// Characters of content shown to the relevance filter
pub const FILTER_CONTENT_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    /// Rejected by the relevance filter
    Irrelevant,
    /// Relevant, but no threat could be extracted
    ExtractionFailed,
    /// Threat appended to the analyzed stream
    Saved(ThreatSignature, EntryId),
}

impl DocumentOutcome {
    /// Whether the document reached a state that should not be re-evaluated
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentOutcome::Irrelevant | DocumentOutcome::Saved(..))
    }
}

#[derive(Debug)]
enum State {
    Filter,
    Extract,
    Save(ThreatSignature),
    End(DocumentOutcome),
}

pub struct DocumentWorkflow<E> {
    filter: RelevanceFilter<E>,
    extraction: ExtractionService<E>,
    queue: Arc<dyn WorkQueue>,
    analyzed_stream: String,
}

impl<E: StructuredExtractor> DocumentWorkflow<E> {
    pub fn new(
        filter: RelevanceFilter<E>,
        extraction: ExtractionService<E>,
        queue: Arc<dyn WorkQueue>,
        analyzed_stream: &str,
    ) -> Self {
        Self {
            filter,
            extraction,
            queue,
            analyzed_stream: analyzed_stream.to_string(),
        }
    }

    /// Run one document to completion. Only a failed write to the analyzed
    /// stream is returned as an error.
    pub async fn run(&self, doc: &RawDocument) -> Result<DocumentOutcome, QueueError> {
        let mut state = State::Filter;

        loop {
            state = match state {
                State::Filter => {
                    let content = truncate_chars(&doc.content, FILTER_CONTENT_CHARS);
                    let verdict = self.filter.analyze(&doc.title, content).await;
                    if verdict.is_relevant {
                        State::Extract
                    } else {
                        tracing::debug!(doc_id = %doc.id, reasoning = %verdict.reasoning, "Document filtered out");
                        State::End(DocumentOutcome::Irrelevant)
                    }
                }
                State::Extract => match self.extraction.process(doc).await {
                    Some(threat) => State::Save(threat),
                    None => State::End(DocumentOutcome::ExtractionFailed),
                },
                State::Save(threat) => {
                    let payload = encode(&threat)?;
                    let id = self.queue.enqueue(&self.analyzed_stream, &payload).await?;
                    tracing::info!(
                        doc_id = %doc.id,
                        entry_id = %id,
                        stream = %self.analyzed_stream,
                        "Saved threat to analyzed stream"
                    );
                    State::End(DocumentOutcome::Saved(threat, id))
                }
                State::End(outcome) => return Ok(outcome),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttackType;
    use crate::model::config::FilterConfig;
    use crate::queue::MemoryQueue;
    use crate::service::fixtures;
    use crate::service::llm::testing::ScriptedExtractor;

    const ANALYZED: &str = "papers:analyzed";

    fn workflow(
        extractor: ScriptedExtractor,
    ) -> (DocumentWorkflow<ScriptedExtractor>, Arc<ScriptedExtractor>, Arc<MemoryQueue>) {
        let extractor = Arc::new(extractor);
        let queue = Arc::new(MemoryQueue::new());
        let workflow = DocumentWorkflow::new(
            RelevanceFilter::new(extractor.clone(), &FilterConfig::default()),
            ExtractionService::new(extractor.clone()),
            queue.clone(),
            ANALYZED,
        );
        (workflow, extractor, queue)
    }

    #[tokio::test]
    async fn test_relevant_document_is_saved() {
        let (workflow, extractor, queue) =
            workflow(ScriptedExtractor::new().respond(fixtures::extracted_jailbreak()));

        let outcome = workflow.run(&fixtures::gcg_jailbreak()).await.unwrap();
        let DocumentOutcome::Saved(threat, id) = &outcome else {
            panic!("expected saved outcome, got {outcome:?}");
        };
        assert_eq!(threat.attack_type, AttackType::Jailbreak);
        assert!(outcome.is_terminal());

        // auto-accepted by the pre-filter: the only call is extraction
        assert_eq!(extractor.calls(), 1);

        let saved = queue.latest(ANALYZED, 10).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, *id);
        let decoded: ThreatSignature = saved[0].decode().unwrap();
        assert_eq!(decoded.url, "http://arxiv.org/abs/2307.15043");
    }

    #[tokio::test]
    async fn test_irrelevant_document_ends_early() {
        let (workflow, extractor, queue) = workflow(ScriptedExtractor::new());

        let outcome = workflow.run(&fixtures::battery_diagnosis()).await.unwrap();
        assert_eq!(outcome, DocumentOutcome::Irrelevant);
        assert!(outcome.is_terminal());
        assert_eq!(extractor.calls(), 0);
        assert_eq!(queue.len(ANALYZED).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_saves_nothing() {
        let (workflow, _, queue) = workflow(ScriptedExtractor::new().respond(serde_json::json!({})));

        let outcome = workflow.run(&fixtures::gcg_jailbreak()).await.unwrap();
        assert_eq!(outcome, DocumentOutcome::ExtractionFailed);
        assert!(!outcome.is_terminal());
        assert_eq!(queue.len(ANALYZED).await.unwrap(), 0);
    }
}
