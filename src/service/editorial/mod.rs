//! Editorial workflow: draft, critique, revise
//!
//! The curator drafts a briefing from a batch of threats, the critic
//! fact-checks it against the source titles, and rejected drafts are revised
//! up to [`MAX_RETRIES`] times. The last draft is published even if the critic
//! never approves it.

use std::sync::Arc;

use crate::model::{CritiqueResult, DailyBriefing, ThreatSignature};
use crate::service::editorial::prompts::{
    CRITIC_SYSTEM_PROMPT, CRITIC_TEMPERATURE, CURATOR_SYSTEM_PROMPT, CURATOR_TEMPERATURE,
    build_critique_prompt, build_draft_prompt, build_revise_prompt,
};
use crate::service::llm::{ExtractionRequest, LlmError, StructuredExtractor, StructuredOutput};

pub mod prompts;

pub const MAX_RETRIES: u32 = 3;

impl StructuredOutput for DailyBriefing {
    fn validate(&self) -> Result<(), String> {
        if self.headline.trim().is_empty() {
            return Err("headline is empty".to_string());
        }
        if self.summary_markdown.trim().is_empty() {
            return Err("summary_markdown is empty".to_string());
        }
        Ok(())
    }
}

impl StructuredOutput for CritiqueResult {
    fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.score) {
            return Err(format!("score {} is outside 1..=10", self.score));
        }
        Ok(())
    }
}

/// Working state of one editorial run
#[derive(Debug, Clone)]
pub struct EditorialState {
    pub threats: Vec<ThreatSignature>,
    pub previous_summary: String,
    pub current_briefing: Option<DailyBriefing>,
    pub critique_result: Option<CritiqueResult>,
    pub retry_count: u32,
    pub final_output: Option<DailyBriefing>,
}

impl EditorialState {
    pub fn new(threats: Vec<ThreatSignature>, previous_summary: &str) -> Self {
        Self {
            threats,
            previous_summary: previous_summary.to_string(),
            current_briefing: None,
            critique_result: None,
            retry_count: 0,
            final_output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Draft,
    Critique,
    Revise,
    End,
}

/// Where to go after a critique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterCritique {
    Approved,
    Revise,
    RetriesExhausted,
}

pub fn next_after_critique(critique: &CritiqueResult, retry_count: u32) -> AfterCritique {
    if critique.is_approved {
        AfterCritique::Approved
    } else if retry_count < MAX_RETRIES {
        AfterCritique::Revise
    } else {
        AfterCritique::RetriesExhausted
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorialOutcome {
    /// The critic approved the output
    Approved,
    /// The critic kept rejecting; the output is the last draft
    RetriesExhausted,
    /// No threats; the output is the canned quiet-day briefing
    Empty,
    /// A model call failed; the output is the last good draft or a placeholder
    Aborted { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditorialResult {
    pub briefing: DailyBriefing,
    pub outcome: EditorialOutcome,
    pub critique_rounds: u32,
    pub retry_count: u32,
}

impl EditorialResult {
    pub fn is_approved(&self) -> bool {
        self.outcome == EditorialOutcome::Approved
    }

    /// True when the briefing is a stand-in rather than model output
    pub fn is_placeholder(&self) -> bool {
        matches!(self.outcome, EditorialOutcome::Aborted { .. })
            && self.briefing.headline == DailyBriefing::unavailable("").headline
    }
}

pub struct EditorialWorkflow<E> {
    extractor: Arc<E>,
}

impl<E: StructuredExtractor> EditorialWorkflow<E> {
    pub fn new(extractor: Arc<E>) -> Self {
        Self { extractor }
    }

    /// Produce a briefing for `threats`. Never fails: model errors end the
    /// run with the best available output.
    pub async fn run(&self, threats: Vec<ThreatSignature>, previous_summary: &str) -> EditorialResult {
        let start_time = std::time::Instant::now();
        let mut state = EditorialState::new(threats, previous_summary);
        let mut critique_rounds = 0u32;
        let mut outcome = None;
        let mut step = Step::Draft;

        while step != Step::End {
            step = match step {
                Step::Draft => {
                    state.retry_count = 0;
                    if state.threats.is_empty() {
                        tracing::info!("No threats in batch, publishing quiet-day briefing");
                        state.final_output = Some(DailyBriefing::quiet_day());
                        outcome = Some(EditorialOutcome::Empty);
                        Step::End
                    } else {
                        match self.draft(&state).await {
                            Ok(draft) => {
                                state.current_briefing = Some(draft);
                                Step::Critique
                            }
                            Err(e) => {
                                outcome = Some(Self::abort("draft", e));
                                Step::End
                            }
                        }
                    }
                }
                Step::Critique => match self.critique(&state).await {
                    Ok(critique) => {
                        critique_rounds += 1;
                        tracing::info!(
                            round = critique_rounds,
                            approved = critique.is_approved,
                            score = critique.score,
                            "Critique received"
                        );
                        let next = next_after_critique(&critique, state.retry_count);
                        state.critique_result = Some(critique);
                        match next {
                            AfterCritique::Approved => {
                                state.final_output = state.current_briefing.clone();
                                outcome = Some(EditorialOutcome::Approved);
                                Step::End
                            }
                            AfterCritique::Revise => Step::Revise,
                            AfterCritique::RetriesExhausted => {
                                tracing::warn!(
                                    retries = state.retry_count,
                                    "Max retries reached, publishing last draft without approval"
                                );
                                state.final_output = state.current_briefing.clone();
                                outcome = Some(EditorialOutcome::RetriesExhausted);
                                Step::End
                            }
                        }
                    }
                    Err(e) => {
                        outcome = Some(Self::abort("critique", e));
                        Step::End
                    }
                },
                Step::Revise => match self.revise(&state).await {
                    Ok(revised) => {
                        state.current_briefing = Some(revised);
                        state.retry_count += 1;
                        Step::Critique
                    }
                    Err(e) => {
                        outcome = Some(Self::abort("revise", e));
                        Step::End
                    }
                },
                Step::End => Step::End,
            };
        }

        let outcome = outcome.unwrap_or(EditorialOutcome::Aborted {
            error: "workflow ended without an outcome".to_string(),
        });

        let briefing = match (&outcome, state.final_output, state.current_briefing) {
            (EditorialOutcome::Aborted { .. }, _, Some(draft)) => draft,
            (EditorialOutcome::Aborted { error }, _, None) => DailyBriefing::unavailable(error),
            (_, Some(output), _) => output,
            (_, None, Some(draft)) => draft,
            (_, None, None) => DailyBriefing::quiet_day(),
        };

        tracing::info!(
            outcome = ?outcome,
            critique_rounds,
            retries = state.retry_count,
            elapsed_ms = start_time.elapsed().as_millis(),
            "Editorial workflow finished"
        );

        EditorialResult {
            briefing,
            outcome,
            critique_rounds,
            retry_count: state.retry_count,
        }
    }

    fn abort(stage: &str, error: LlmError) -> EditorialOutcome {
        tracing::error!(stage = stage, error = %error, "Editorial workflow aborted");
        EditorialOutcome::Aborted {
            error: format!("{stage} failed: {error}"),
        }
    }

    async fn draft(&self, state: &EditorialState) -> Result<DailyBriefing, LlmError> {
        let request = ExtractionRequest::new(build_draft_prompt(&state.threats, &state.previous_summary))
            .system_prompt(CURATOR_SYSTEM_PROMPT)
            .temperature(CURATOR_TEMPERATURE);
        self.extractor.extract(request).await
    }

    async fn critique(&self, state: &EditorialState) -> Result<CritiqueResult, LlmError> {
        let draft = state
            .current_briefing
            .as_ref()
            .ok_or_else(|| LlmError::ExtractionFailed("no draft to critique".to_string()))?;
        let request = ExtractionRequest::new(build_critique_prompt(draft, &state.threats))
            .system_prompt(CRITIC_SYSTEM_PROMPT)
            .temperature(CRITIC_TEMPERATURE);
        self.extractor.extract(request).await
    }

    async fn revise(&self, state: &EditorialState) -> Result<DailyBriefing, LlmError> {
        let (Some(draft), Some(critique)) = (&state.current_briefing, &state.critique_result) else {
            return Err(LlmError::ExtractionFailed(
                "missing draft or critique for revision".to_string(),
            ));
        };
        let request = ExtractionRequest::new(build_revise_prompt(draft, &critique.feedback))
            .system_prompt(CURATOR_SYSTEM_PROMPT)
            .temperature(CURATOR_TEMPERATURE);
        self.extractor.extract(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::service::fixtures;
    use crate::service::llm::testing::ScriptedExtractor;

    fn threats() -> Vec<ThreatSignature> {
        vec![fixtures::threat_for(&fixtures::gcg_jailbreak())]
    }

    fn critique(approved: bool) -> CritiqueResult {
        CritiqueResult {
            is_approved: approved,
            feedback: String::new(),
            score: 5,
        }
    }

    #[test]
    fn test_transition_rule() {
        assert_eq!(next_after_critique(&critique(true), 0), AfterCritique::Approved);
        assert_eq!(next_after_critique(&critique(true), MAX_RETRIES), AfterCritique::Approved);
        assert_eq!(next_after_critique(&critique(false), 0), AfterCritique::Revise);
        assert_eq!(next_after_critique(&critique(false), MAX_RETRIES - 1), AfterCritique::Revise);
        assert_eq!(
            next_after_critique(&critique(false), MAX_RETRIES),
            AfterCritique::RetriesExhausted
        );
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let extractor = Arc::new(ScriptedExtractor::new());
        let result = EditorialWorkflow::new(extractor.clone()).run(vec![], "").await;

        assert_eq!(result.outcome, EditorialOutcome::Empty);
        assert_eq!(result.briefing, DailyBriefing::quiet_day());
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_approved_first_draft() {
        let extractor = Arc::new(
            ScriptedExtractor::new()
                .respond(fixtures::briefing("Suffix attacks are back"))
                .respond(fixtures::approving_critique()),
        );
        let result = EditorialWorkflow::new(extractor.clone())
            .run(threats(), "Yesterday: nothing")
            .await;

        assert!(result.is_approved());
        assert_eq!(result.briefing.headline, "Suffix attacks are back");
        assert_eq!(result.critique_rounds, 1);
        assert_eq!(result.retry_count, 0);

        let requests = extractor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].temperature, Some(CURATOR_TEMPERATURE));
        assert!(requests[0].prompt.contains("Yesterday: nothing"));
        assert_eq!(requests[1].system_prompt.as_deref(), Some(CRITIC_SYSTEM_PROMPT));
        assert_eq!(requests[1].temperature, Some(CRITIC_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_revision_then_approval() {
        let extractor = Arc::new(
            ScriptedExtractor::new()
                .respond(fixtures::briefing("Draft one"))
                .respond(fixtures::rejecting_critique())
                .respond(fixtures::briefing("Draft two"))
                .respond(fixtures::approving_critique()),
        );
        let result = EditorialWorkflow::new(extractor.clone()).run(threats(), "").await;

        assert!(result.is_approved());
        assert_eq!(result.briefing.headline, "Draft two");
        assert_eq!(result.critique_rounds, 2);
        assert_eq!(result.retry_count, 1);
        assert!(extractor.requests()[2].prompt.contains("Severity of item 1 is overstated."));
    }

    #[tokio::test]
    async fn test_always_rejecting_critic_is_bounded() {
        let mut script = ScriptedExtractor::new().respond(fixtures::briefing("Draft 0"));
        for i in 1..=MAX_RETRIES {
            script = script
                .respond(fixtures::rejecting_critique())
                .respond(fixtures::briefing(&format!("Draft {i}")));
        }
        // one more rejection than there are revisions, then extra responses
        // that must never be consumed
        script = script
            .respond(fixtures::rejecting_critique())
            .respond(fixtures::rejecting_critique())
            .respond(fixtures::briefing("Never"));
        let extractor = Arc::new(script);

        let result = EditorialWorkflow::new(extractor.clone()).run(threats(), "").await;

        assert_eq!(result.outcome, EditorialOutcome::RetriesExhausted);
        assert_eq!(result.critique_rounds, MAX_RETRIES + 1);
        assert_eq!(result.retry_count, MAX_RETRIES);
        assert_eq!(result.briefing.headline, format!("Draft {MAX_RETRIES}"));
        // draft + (MAX_RETRIES + 1) critiques + MAX_RETRIES revisions
        assert_eq!(extractor.calls(), 1 + (MAX_RETRIES as usize + 1) + MAX_RETRIES as usize);
    }

    #[tokio::test]
    async fn test_draft_failure_returns_placeholder() {
        let extractor = Arc::new(ScriptedExtractor::new().fail(LlmError::Timeout(Duration::from_secs(30))));
        let result = EditorialWorkflow::new(extractor).run(threats(), "").await;

        assert!(matches!(result.outcome, EditorialOutcome::Aborted { .. }));
        assert!(result.is_placeholder());
        assert_eq!(result.briefing.headline, "Briefing Unavailable");
    }

    #[tokio::test]
    async fn test_critique_failure_keeps_last_draft() {
        let extractor = Arc::new(
            ScriptedExtractor::new()
                .respond(fixtures::briefing("Unchecked draft"))
                .fail(LlmError::ExtractionFailed("rate limited".to_string())),
        );
        let result = EditorialWorkflow::new(extractor).run(threats(), "").await;

        assert!(matches!(result.outcome, EditorialOutcome::Aborted { .. }));
        assert!(!result.is_placeholder());
        assert_eq!(result.briefing.headline, "Unchecked draft");
        assert_eq!(result.critique_rounds, 0);
    }

    #[tokio::test]
    async fn test_invalid_critique_score_aborts() {
        let extractor = Arc::new(
            ScriptedExtractor::new()
                .respond(fixtures::briefing("Draft"))
                .respond(serde_json::json!({"is_approved": true, "feedback": "", "score": 11})),
        );
        let result = EditorialWorkflow::new(extractor).run(threats(), "").await;
        assert!(matches!(result.outcome, EditorialOutcome::Aborted { .. }));
    }
}
