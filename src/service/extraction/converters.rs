//! Conversion from model output to validated threat records

use crate::model::{ExtractedThreat, RawDocument, ThreatDraft, ThreatError, ThreatSignature};

/// Combine model output with the document's identity fields.
///
/// Title, url, publication date and source always come from the document.
pub fn convert_threat(
    extracted: ExtractedThreat,
    doc: &RawDocument,
) -> Result<ThreatSignature, ThreatError> {
    let title = if doc.title.trim().is_empty() {
        extracted.title
    } else {
        doc.title.clone()
    };

    ThreatSignature::try_from(ThreatDraft {
        title,
        url: doc.url.clone(),
        published_date: doc.published_date,
        relevance_score: extracted.relevance_score,
        attack_type: extracted.attack_type,
        modality: extracted.modality,
        affected_models: extracted.affected_models,
        is_theoretical: extracted.is_theoretical,
        severity: extracted.severity,
        summary_tldr: extracted.summary_tldr,
        summary_detailed: extracted.summary_detailed,
        key_findings: extracted.key_findings,
        methodology_brief: extracted.methodology_brief,
        code_repository: extracted.code_repository,
        source: doc.source.clone(),
        processed_at: None,
    })
}
