//! Database models for threat signatures

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::model::{ThreatDraft, ThreatSignature};

/// Database representation of a threat signature
#[derive(Debug, Clone, FromRow)]
pub struct ThreatSignatureRow {
    pub url: String,
    pub title: String,
    pub published_date: DateTime<Utc>,
    pub relevance_score: f64,
    pub attack_type: String,
    pub modality: serde_json::Value,
    pub affected_models: serde_json::Value,
    pub is_theoretical: bool,
    pub severity: i16,
    pub summary_tldr: String,
    pub summary_detailed: String,
    pub key_findings: serde_json::Value,
    pub methodology_brief: Option<String>,
    pub code_repository: Option<String>,
    pub source: String,
    pub processed_at: DateTime<Utc>,
}

impl ThreatSignatureRow {
    /// Convert database row to domain model, re-running validation
    pub fn into_domain(self) -> Result<ThreatSignature, String> {
        let attack_type = serde_json::from_value(serde_json::Value::String(self.attack_type.clone()))
            .map_err(|e| format!("Invalid attack_type {:?}: {}", self.attack_type, e))?;
        let modality =
            serde_json::from_value(self.modality).map_err(|e| format!("Invalid modality: {}", e))?;
        let affected_models = serde_json::from_value(self.affected_models)
            .map_err(|e| format!("Invalid affected_models: {}", e))?;
        let key_findings = serde_json::from_value(self.key_findings)
            .map_err(|e| format!("Invalid key_findings: {}", e))?;

        let draft = ThreatDraft {
            title: self.title,
            url: self.url,
            published_date: self.published_date,
            relevance_score: self.relevance_score,
            attack_type,
            modality,
            affected_models,
            is_theoretical: self.is_theoretical,
            severity: i64::from(self.severity).into(),
            summary_tldr: self.summary_tldr,
            summary_detailed: self.summary_detailed,
            key_findings,
            methodology_brief: self.methodology_brief,
            code_repository: self.code_repository,
            source: self.source,
            processed_at: Some(self.processed_at),
        };

        ThreatSignature::try_from(draft).map_err(|e| e.to_string())
    }
}

/// JSON columns for a threat's list fields
pub fn json_list<T: serde::Serialize>(items: &[T]) -> serde_json::Value {
    serde_json::to_value(items).unwrap_or_else(|_| serde_json::json!([]))
}
