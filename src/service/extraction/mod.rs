//! Threat extraction from accepted papers

use std::sync::Arc;

use crate::model::{ExtractedThreat, RawDocument, ThreatSignature};
use crate::service::extraction::converters::convert_threat;
use crate::service::extraction::prompts::{EXTRACTION_SYSTEM_PROMPT, build_extraction_prompt};
use crate::service::llm::{ExtractionRequest, StructuredExtractor, StructuredOutput};

pub mod converters;
pub mod prompts;

impl StructuredOutput for ExtractedThreat {
    fn validate(&self) -> Result<(), String> {
        self.check()
    }
}

pub struct ExtractionService<E> {
    extractor: Arc<E>,
}

impl<E: StructuredExtractor> ExtractionService<E> {
    pub fn new(extractor: Arc<E>) -> Self {
        Self { extractor }
    }

    /// Turn a paper into a threat record. Failures are logged and yield `None`.
    pub async fn process(&self, doc: &RawDocument) -> Option<ThreatSignature> {
        if doc.content.trim().is_empty() {
            tracing::debug!(doc_id = %doc.id, "Skipping extraction for empty document");
            return None;
        }

        let start_time = std::time::Instant::now();
        let request = ExtractionRequest::new(build_extraction_prompt(doc))
            .system_prompt(EXTRACTION_SYSTEM_PROMPT)
            .temperature(0.0);

        let extracted = match self.extractor.extract::<ExtractedThreat>(request).await {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::error!(
                    doc_id = %doc.id,
                    model = %self.extractor.model_name(),
                    elapsed_ms = start_time.elapsed().as_millis(),
                    error = %e,
                    "Threat extraction failed"
                );
                return None;
            }
        };

        match convert_threat(extracted, doc) {
            Ok(threat) => {
                tracing::info!(
                    doc_id = %doc.id,
                    attack_type = %threat.attack_type,
                    severity = threat.severity,
                    elapsed_ms = start_time.elapsed().as_millis(),
                    "Extracted threat signature"
                );
                Some(threat)
            }
            Err(e) => {
                tracing::error!(doc_id = %doc.id, error = %e, "Extracted threat failed validation");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttackType;
    use crate::service::fixtures;
    use crate::service::llm::LlmError;
    use crate::service::llm::testing::ScriptedExtractor;

    fn service(extractor: ScriptedExtractor) -> (ExtractionService<ScriptedExtractor>, Arc<ScriptedExtractor>) {
        let extractor = Arc::new(extractor);
        (ExtractionService::new(Arc::clone(&extractor)), extractor)
    }

    #[tokio::test]
    async fn test_extracts_jailbreak_signature() {
        let (service, extractor) =
            service(ScriptedExtractor::new().respond(fixtures::extracted_jailbreak()));
        let doc = fixtures::gcg_jailbreak();

        let threat = service.process(&doc).await.unwrap();

        assert_eq!(threat.attack_type, AttackType::Jailbreak);
        assert!(threat.severity >= 4);
        assert_eq!(threat.url, doc.url);
        assert_eq!(threat.published_date, doc.published_date);
        assert_eq!(threat.source, "arxiv");
        assert_eq!(extractor.calls(), 1);

        let request = &extractor.requests()[0];
        assert!(request.prompt.contains("Source ID: 2307.15043"));
        assert_eq!(request.temperature, Some(0.0));
    }

    #[tokio::test]
    async fn test_identity_fields_come_from_document() {
        let mut response = fixtures::extracted_jailbreak();
        response["url"] = serde_json::json!("https://evil.example.com/other");
        let (service, _) = service(ScriptedExtractor::new().respond(response));
        let doc = fixtures::gcg_jailbreak();

        let threat = service.process(&doc).await.unwrap();
        assert_eq!(threat.url, "http://arxiv.org/abs/2307.15043");
    }

    #[tokio::test]
    async fn test_empty_content_skips_call() {
        let (service, extractor) = service(ScriptedExtractor::new());
        let mut doc = fixtures::gcg_jailbreak();
        doc.content = "  ".to_string();

        assert!(service.process(&doc).await.is_none());
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_yields_none() {
        let (service, _) = service(
            ScriptedExtractor::new().fail(LlmError::ExtractionFailed("rate limited".into())),
        );
        assert!(service.process(&fixtures::gcg_jailbreak()).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_output_yields_none() {
        let mut response = fixtures::extracted_jailbreak();
        response["summary_tldr"] = serde_json::json!("x".repeat(300));
        let (service, _) = service(ScriptedExtractor::new().respond(response));
        assert!(service.process(&fixtures::gcg_jailbreak()).await.is_none());
    }

    #[tokio::test]
    async fn test_long_content_is_truncated_in_prompt() {
        let (service, extractor) =
            service(ScriptedExtractor::new().respond(fixtures::extracted_jailbreak()));
        let mut doc = fixtures::gcg_jailbreak();
        doc.content = "z".repeat(prompts::CONTENT_PROMPT_CHARS + 500);

        service.process(&doc).await.unwrap();
        let prompt = &extractor.requests()[0].prompt;
        assert!(!prompt.contains(&"z".repeat(prompts::CONTENT_PROMPT_CHARS + 1)));
    }
}
