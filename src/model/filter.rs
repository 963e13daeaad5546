use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const DEFAULT_REASONING: &str = "No reasoning provided";

/// Outcome of the deterministic pre-filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterStatus {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreFilterResult {
    pub status: FilterStatus,
    pub score: u32,
    pub reasons: Vec<String>,
    pub confidence: f64,
}

impl PreFilterResult {
    pub fn is_accept(&self) -> bool {
        self.status == FilterStatus::Accept
    }
}

/// Relevance decision for a single document.
///
/// Field order is the order the model is asked to fill them in: reasoning
/// first, then the score, then the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(description = "Relevance decision for one research paper")]
pub struct FilterVerdict {
    #[schemars(description = "Short justification for the decision, written before deciding")]
    pub reasoning: String,
    #[schemars(description = "Confidence in the decision between 0.0 and 1.0")]
    pub confidence_score: f64,
    #[schemars(description = "Whether the paper is relevant to AI security or safety research")]
    pub is_relevant: bool,
}

impl FilterVerdict {
    /// Build a verdict, clamping confidence to [0, 1] and substituting a
    /// default reasoning when none is given.
    pub fn new(is_relevant: bool, confidence_score: f64, reasoning: impl Into<String>) -> Self {
        let reasoning = reasoning.into();
        let reasoning = if reasoning.trim().is_empty() {
            DEFAULT_REASONING.to_string()
        } else {
            reasoning
        };
        let confidence_score = if confidence_score.is_nan() {
            0.0
        } else {
            confidence_score.clamp(0.0, 1.0)
        };

        Self {
            reasoning,
            confidence_score,
            is_relevant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_clamps_confidence() {
        assert_eq!(FilterVerdict::new(true, 1.7, "x").confidence_score, 1.0);
        assert_eq!(FilterVerdict::new(false, -0.2, "x").confidence_score, 0.0);
        assert_eq!(FilterVerdict::new(false, f64::NAN, "x").confidence_score, 0.0);
    }

    #[test]
    fn test_schema_describes_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(FilterVerdict)).unwrap();
        let properties = &schema["properties"];
        assert_eq!(
            properties["reasoning"]["description"],
            "Short justification for the decision, written before deciding"
        );
        assert_eq!(
            properties["is_relevant"]["description"],
            "Whether the paper is relevant to AI security or safety research"
        );
    }

    #[test]
    fn test_verdict_default_reasoning() {
        let verdict = FilterVerdict::new(true, 0.5, "   ");
        assert_eq!(verdict.reasoning, DEFAULT_REASONING);
    }
}
