//! Shared documents and model responses for service tests

use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use crate::model::{RawDocument, ThreatSignature};
use crate::service::extraction::converters::convert_threat;

pub fn gcg_jailbreak() -> RawDocument {
    RawDocument::new(
        "2307.15043",
        "Universal Jailbreak via Gradient-Based Suffix Optimization",
        "http://arxiv.org/abs/2307.15043",
        "Abstract: We introduce GCG, an automated method for generating adversarial suffixes \
         that cause LLMs to bypass alignment. Our method achieves 99% success rate on Llama-2 \
         and GPT-3.5. We demonstrate that these attacks transfer to other models.",
        "arxiv",
        Utc.with_ymd_and_hms(2023, 7, 27, 0, 0, 0).unwrap(),
    )
}

pub fn battery_diagnosis() -> RawDocument {
    RawDocument::new(
        "2501.00001",
        "BatteryAgent: Physics-Informed Battery Fault Diagnosis",
        "http://arxiv.org/abs/2501.00001",
        "We develop a system for detecting battery failures using physics-informed neural \
         networks.",
        "arxiv",
        Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
    )
}

/// A strongly relevant paper with the given id and title
pub fn jailbreak_paper(id: &str, title: &str) -> RawDocument {
    RawDocument::new(
        id,
        title,
        format!("http://arxiv.org/abs/{id}"),
        "We present a jailbreak that bypasses alignment of GPT-4 and Llama-3 with adversarial \
         suffixes.",
        "arxiv",
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
    )
}

/// Model output for an extraction call on a jailbreak paper
pub fn extracted_jailbreak() -> Value {
    json!({
        "title": "Universal Jailbreak via Gradient-Based Suffix Optimization",
        "relevance_score": 0.97,
        "attack_type": "Jailbreak",
        "modality": ["Text"],
        "affected_models": ["Llama-2", "GPT-3.5"],
        "is_theoretical": false,
        "severity": "Critical",
        "summary_tldr": "Gradient-optimized adversarial suffixes jailbreak aligned LLMs and transfer across models.",
        "summary_detailed": "GCG searches for token suffixes that maximize the likelihood of an affirmative response.",
        "key_findings": ["99% attack success rate on Llama-2"],
        "methodology_brief": "Greedy coordinate gradient search over suffix tokens.",
        "code_repository": "https://github.com/llm-attacks/llm-attacks"
    })
}

pub fn threat_for(doc: &RawDocument) -> ThreatSignature {
    let extracted = serde_json::from_value(extracted_jailbreak()).unwrap();
    convert_threat(extracted, doc).unwrap()
}

pub fn approving_critique() -> Value {
    json!({ "is_approved": true, "feedback": "Accurate.", "score": 9 })
}

pub fn rejecting_critique() -> Value {
    json!({ "is_approved": false, "feedback": "Severity of item 1 is overstated.", "score": 4 })
}

pub fn briefing(headline: &str) -> Value {
    json!({
        "headline": headline,
        "summary_markdown": "- [5/5] Universal Jailbreak: suffix attack (Jailbreak)",
        "highlighted_threat_ids": ["http://arxiv.org/abs/2307.15043"]
    })
}
