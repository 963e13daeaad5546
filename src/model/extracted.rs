//! Schemas the extraction model fills in.
//!
//! Identity fields (url, publication date, source) are deliberately absent:
//! they are copied from the document, never taken from model output.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::threat::{AttackType, MAX_TLDR_CHARS, Modality, SeverityInput};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[schemars(description = "Threat profile of one AI security research paper")]
pub struct ExtractedThreat {
    #[schemars(description = "Cleaned-up paper title")]
    pub title: String,
    #[schemars(description = "How relevant the paper is to AI security, from 0.0 to 1.0")]
    pub relevance_score: f64,
    #[schemars(description = "Primary attack category the paper studies")]
    pub attack_type: AttackType,
    #[schemars(description = "Input modalities the attack targets (text, vision, audio, multimodal)")]
    #[serde(default)]
    pub modality: Vec<Modality>,
    #[schemars(description = "Model families the paper evaluates against (e.g., 'GPT-4', 'Llama-2')")]
    #[serde(default)]
    pub affected_models: Vec<String>,
    #[schemars(description = "True when the paper ships no code or reproducible artifact")]
    pub is_theoretical: bool,
    #[schemars(description = "1 (Info) to 5 (Critical), or one of Critical/High/Medium/Low/Info")]
    pub severity: SeverityInput,
    #[schemars(description = "One-sentence summary, at most 280 characters")]
    pub summary_tldr: String,
    #[schemars(description = "Paragraph-length technical summary")]
    #[serde(default)]
    pub summary_detailed: String,
    #[schemars(description = "Findings stated in the paper, one per entry")]
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[schemars(description = "How the attack or evaluation was carried out, in one or two sentences")]
    #[serde(default)]
    pub methodology_brief: Option<String>,
    #[schemars(description = "Link to released code, if the paper mentions one")]
    #[serde(default)]
    pub code_repository: Option<String>,
}

impl ExtractedThreat {
    pub fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.relevance_score) {
            return Err(format!(
                "relevance_score {} is outside [0, 1]",
                self.relevance_score
            ));
        }
        let tldr_chars = self.summary_tldr.chars().count();
        if tldr_chars > MAX_TLDR_CHARS {
            return Err(format!(
                "summary_tldr has {tldr_chars} characters (max {MAX_TLDR_CHARS})"
            ));
        }
        Ok(())
    }
}
