//! Threat records produced by the extraction step

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

pub const MAX_TLDR_CHARS: usize = 280;
pub const MIN_TITLE_CHARS: usize = 5;
pub const MAX_TITLE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, ToSchema)]
pub enum AttackType {
    Jailbreak,
    #[serde(rename = "Prompt Injection")]
    PromptInjection,
    #[serde(rename = "Data Poisoning")]
    DataPoisoning,
    Backdoor,
    #[serde(rename = "Model Extraction")]
    ModelExtraction,
    #[serde(rename = "Adversarial Example")]
    AdversarialExample,
    Other,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::Jailbreak => "Jailbreak",
            AttackType::PromptInjection => "Prompt Injection",
            AttackType::DataPoisoning => "Data Poisoning",
            AttackType::Backdoor => "Backdoor",
            AttackType::ModelExtraction => "Model Extraction",
            AttackType::AdversarialExample => "Adversarial Example",
            AttackType::Other => "Other",
        }
    }
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, ToSchema)]
pub enum Modality {
    Text,
    Vision,
    Audio,
    #[serde(rename = "Multi-modal", alias = "Multimodal")]
    MultiModal,
    Agentic,
}

/// Severity as reported by a model: a label or a small number. Models
/// sometimes write levels as floats (`4.0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SeverityInput {
    Level(i64),
    Fractional(f64),
    Label(String),
}

impl SeverityInput {
    /// Normalize to the 1..=5 scale.
    ///
    /// Unrecognized labels and out-of-range integers collapse to 1 (Info),
    /// which hides malformed model output rather than rejecting it.
    pub fn level(&self) -> u8 {
        match self {
            SeverityInput::Level(n) if (1..=5).contains(n) => *n as u8,
            SeverityInput::Level(_) => 1,
            SeverityInput::Fractional(n) => {
                let rounded = n.round();
                if (1.0..=5.0).contains(&rounded) {
                    rounded as u8
                } else {
                    1
                }
            }
            SeverityInput::Label(label) => match label.trim().to_ascii_lowercase().as_str() {
                "critical" => 5,
                "high" => 4,
                "medium" => 3,
                "low" => 2,
                _ => 1,
            },
        }
    }
}

impl Default for SeverityInput {
    fn default() -> Self {
        SeverityInput::Level(1)
    }
}

impl From<&str> for SeverityInput {
    fn from(label: &str) -> Self {
        SeverityInput::Label(label.to_string())
    }
}

impl From<i64> for SeverityInput {
    fn from(level: i64) -> Self {
        SeverityInput::Level(level)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThreatError {
    #[error("invalid url {0:?}: expected an http(s) URL")]
    InvalidUrl(String),

    #[error("title must be between {MIN_TITLE_CHARS} and {MAX_TITLE_CHARS} characters, got {0}")]
    InvalidTitle(usize),

    #[error("relevance score {0} is outside [0, 1]")]
    RelevanceOutOfRange(f64),

    #[error("summary_tldr must be at most {MAX_TLDR_CHARS} characters, got {0}")]
    SummaryTooLong(usize),

    #[error("invalid code repository {0:?}: expected an http(s) URL")]
    InvalidCodeRepository(String),
}

/// Unvalidated threat fields, as they arrive from a model or a queue payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreatDraft {
    pub title: String,
    pub url: String,
    pub published_date: DateTime<Utc>,
    pub relevance_score: f64,
    pub attack_type: AttackType,
    #[serde(default)]
    pub modality: Vec<Modality>,
    #[serde(default)]
    pub affected_models: Vec<String>,
    #[serde(default)]
    pub is_theoretical: bool,
    #[serde(default)]
    pub severity: SeverityInput,
    pub summary_tldr: String,
    #[serde(default)]
    pub summary_detailed: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub methodology_brief: Option<String>,
    #[serde(default)]
    pub code_repository: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

fn default_source() -> String {
    "arxiv".to_string()
}

/// A validated threat record.
///
/// Deserialization goes through [`ThreatDraft`], so decoding a payload
/// enforces the same constraints as construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "ThreatDraft")]
pub struct ThreatSignature {
    pub title: String,
    pub url: String,
    pub published_date: DateTime<Utc>,
    pub relevance_score: f64,
    pub attack_type: AttackType,
    pub modality: Vec<Modality>,
    pub affected_models: Vec<String>,
    pub is_theoretical: bool,
    pub severity: u8,
    pub summary_tldr: String,
    pub summary_detailed: String,
    pub key_findings: Vec<String>,
    pub methodology_brief: Option<String>,
    pub code_repository: Option<String>,
    pub source: String,
    pub processed_at: DateTime<Utc>,
}

impl TryFrom<ThreatDraft> for ThreatSignature {
    type Error = ThreatError;

    fn try_from(draft: ThreatDraft) -> Result<Self, Self::Error> {
        if !is_http_url(&draft.url) {
            return Err(ThreatError::InvalidUrl(draft.url));
        }

        let title = draft.title.trim().to_string();
        let title_chars = title.chars().count();
        if !(MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&title_chars) {
            return Err(ThreatError::InvalidTitle(title_chars));
        }

        if !(0.0..=1.0).contains(&draft.relevance_score) {
            return Err(ThreatError::RelevanceOutOfRange(draft.relevance_score));
        }

        let tldr_chars = draft.summary_tldr.chars().count();
        if tldr_chars > MAX_TLDR_CHARS {
            return Err(ThreatError::SummaryTooLong(tldr_chars));
        }

        // Models frequently emit "" or "N/A" for a missing repository
        let code_repository = match draft.code_repository {
            Some(repo) if repo.trim().is_empty() || repo.trim().eq_ignore_ascii_case("n/a") => {
                None
            }
            Some(repo) if !is_http_url(repo.trim()) => {
                return Err(ThreatError::InvalidCodeRepository(repo));
            }
            other => other.map(|repo| repo.trim().to_string()),
        };

        Ok(Self {
            title,
            url: draft.url,
            published_date: draft.published_date,
            relevance_score: draft.relevance_score,
            attack_type: draft.attack_type,
            modality: draft.modality,
            affected_models: draft.affected_models,
            is_theoretical: draft.is_theoretical,
            severity: draft.severity.level(),
            summary_tldr: draft.summary_tldr,
            summary_detailed: draft.summary_detailed,
            key_findings: draft.key_findings,
            methodology_brief: draft.methodology_brief,
            code_repository,
            source: draft.source,
            processed_at: draft.processed_at.unwrap_or_else(Utc::now),
        })
    }
}

fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}
