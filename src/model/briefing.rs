use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Curated digest of a batch of threats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct DailyBriefing {
    /// One-line headline for the day
    pub headline: String,
    /// Markdown body summarizing the most important threats
    pub summary_markdown: String,
    /// URLs of the threats the briefing calls out
    #[serde(default)]
    pub highlighted_threat_ids: Vec<String>,
}

impl DailyBriefing {
    pub fn quiet_day() -> Self {
        Self {
            headline: "Quiet Day on the AI Front".to_string(),
            summary_markdown: "No new significant threats detected today.".to_string(),
            highlighted_threat_ids: vec![],
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            headline: "Briefing Unavailable".to_string(),
            summary_markdown: format!(
                "The briefing could not be generated for this batch ({reason}). \
                 The analyzed threats remain queued for the next run."
            ),
            highlighted_threat_ids: vec![],
        }
    }
}

/// Fact-check verdict on a draft briefing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CritiqueResult {
    /// True when the draft contains no hallucinations or exaggerations
    pub is_approved: bool,
    /// Specific corrections the editor must apply
    pub feedback: String,
    /// Quality score from 1 to 10
    pub score: u8,
}

/// Briefing as stored under the well-known latest-briefing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PublishedBriefing {
    #[serde(flatten)]
    pub briefing: DailyBriefing,
    pub generated_at: DateTime<Utc>,
    pub threat_count: usize,
    /// Number of critique rounds the draft went through
    pub critique_rounds: u32,
    pub approved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_briefing_is_flat() {
        let published = PublishedBriefing {
            briefing: DailyBriefing::quiet_day(),
            generated_at: Utc::now(),
            threat_count: 0,
            critique_rounds: 0,
            approved: true,
        };
        let value = serde_json::to_value(&published).unwrap();
        assert_eq!(value["headline"], "Quiet Day on the AI Front");
        assert_eq!(value["threat_count"], 0);

        let back: PublishedBriefing = serde_json::from_value(value).unwrap();
        assert_eq!(back, published);
    }
}
