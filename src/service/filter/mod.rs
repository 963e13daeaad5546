//! Two-stage relevance filter
//!
//! Stage one is the keyword [`PreFilter`]. Only papers whose score falls in
//! the borderline band `[regex_threshold, auto_accept_threshold)` reach stage
//! two, a single structured model call.

use std::sync::Arc;

use crate::model::config::FilterConfig;
use crate::model::{FilterVerdict, PreFilterResult};
use crate::service::filter::prompts::{FILTER_SYSTEM_PROMPT, build_filter_prompt};
use crate::service::llm::{ExtractionRequest, StructuredExtractor, StructuredOutput};

pub mod prompts;
pub mod rules;

pub use rules::PreFilter;

impl StructuredOutput for FilterVerdict {
    fn validate(&self) -> Result<(), String> {
        if self.reasoning.trim().is_empty() {
            return Err("reasoning is empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(format!(
                "confidence_score {} is outside [0, 1]",
                self.confidence_score
            ));
        }
        Ok(())
    }
}

pub struct RelevanceFilter<E> {
    pre_filter: PreFilter,
    extractor: Arc<E>,
    regex_threshold: u32,
    auto_accept_threshold: u32,
}

impl<E: StructuredExtractor> RelevanceFilter<E> {
    pub fn new(extractor: Arc<E>, config: &FilterConfig) -> Self {
        Self {
            pre_filter: PreFilter::new(),
            extractor,
            regex_threshold: config.regex_threshold,
            auto_accept_threshold: config.auto_accept_threshold,
        }
    }

    pub fn pre_filter(&self) -> &PreFilter {
        &self.pre_filter
    }

    /// Decide whether a paper is relevant. Model failures fall back to the
    /// keyword decision, so this never fails.
    pub async fn analyze(&self, title: &str, abstract_text: &str) -> FilterVerdict {
        let pre_filter = self.pre_filter.evaluate(title, abstract_text);
        let title_preview: String = title.chars().take(50).collect();

        if pre_filter.score < self.regex_threshold {
            tracing::info!(
                title = %title_preview,
                score = pre_filter.score,
                reasons = ?pre_filter.reasons,
                "Pre-filter: REJECT"
            );
            return FilterVerdict::new(
                false,
                pre_filter.confidence,
                format!(
                    "Pre-filter rejected (score={}): {}",
                    pre_filter.score,
                    pre_filter.reasons.join("; ")
                ),
            );
        }

        if pre_filter.score >= self.auto_accept_threshold {
            tracing::info!(
                title = %title_preview,
                score = pre_filter.score,
                reasons = ?pre_filter.reasons,
                "Pre-filter: AUTO-ACCEPT"
            );
            return FilterVerdict::new(
                true,
                pre_filter.confidence,
                format!(
                    "Strong match (score={}): {}",
                    pre_filter.score,
                    pre_filter.reasons.join("; ")
                ),
            );
        }

        self.analyze_borderline(title, abstract_text, &pre_filter, &title_preview)
            .await
    }

    async fn analyze_borderline(
        &self,
        title: &str,
        abstract_text: &str,
        pre_filter: &PreFilterResult,
        title_preview: &str,
    ) -> FilterVerdict {
        let request = ExtractionRequest::new(build_filter_prompt(title, abstract_text, pre_filter))
            .system_prompt(FILTER_SYSTEM_PROMPT)
            .temperature(0.0);

        match self.extractor.extract::<FilterVerdict>(request).await {
            Ok(verdict) => {
                tracing::info!(
                    title = %title_preview,
                    score = pre_filter.score,
                    model = %self.extractor.model_name(),
                    is_relevant = verdict.is_relevant,
                    "Borderline paper decided by model"
                );
                FilterVerdict::new(verdict.is_relevant, verdict.confidence_score, verdict.reasoning)
            }
            Err(e) => {
                tracing::error!(
                    title = %title_preview,
                    score = pre_filter.score,
                    error = %e,
                    "Relevance model call failed, using pre-filter decision"
                );
                FilterVerdict::new(
                    pre_filter.is_accept(),
                    pre_filter.confidence,
                    format!("LLM error, using pre-filter (score={}): {}", pre_filter.score, e),
                )
            }
        }
    }
}
