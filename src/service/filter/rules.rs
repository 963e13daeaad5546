//! Deterministic keyword pre-filter
//!
//! Scores `"{title} {abstract}"` against fixed term families. Each family is
//! compiled into a single case-insensitive alternation anchored on word
//! boundaries, so a term only counts when it appears as a whole word.

use std::collections::BTreeSet;

use regex::Regex;

use crate::model::{FilterStatus, PreFilterResult};

/// Terms that are AI-security specific on their own
const STRONG_AML_TERMS: &[&str] = &[
    r"adversarial\s+(?:example|attack|perturb|training|robustness|patch)",
    r"prompt\s+inject\w*",
    r"jailbreak\w*",
    r"red[- ]?team\w*",
    r"model\s+extraction",
    r"model\s+inversion",
    r"membership\s+inference",
    r"machine\s+unlearning",
    r"alignment\s+tax",
    r"safety\s+fine[- ]?tun\w*",
    r"rlhf",
    r"constitutional\s+ai",
    r"reward\s+hack\w*",
    r"llm\s+attack",
    r"llm\s+security",
    r"llm\s+safety",
    r"ai\s+safety",
    r"ai\s+security",
    r"ai\s+alignment",
    r"backdoor\s+attack\w*",
    r"data\s+poison\w*",
    r"trojan\s+attack\w*",
    r"federated\s+learning\s+attack\w*",
    r"model\s+poison\w*",
    r"poison\w*\s+(?:attack|dataset|training)",
];

/// Terms that only mean something in an ML context
const AMBIGUOUS_TERMS: &[&str] = &[
    r"trojan",
    r"backdoor",
    r"poison\w*",
    r"evasion",
    r"spoofing",
    r"fingerprint\w*",
    r"watermark\w*",
    r"steganograph\w*",
    r"perturbation",
    r"robust\w*",
];

const ML_ANCHOR_TERMS: &[&str] = &[
    r"neural\s+net\w*",
    r"transformer",
    r"llm",
    r"large\s+language\s+model",
    r"deep\s+learning",
    r"dnn",
    r"cnn",
    r"rnn",
    r"lstm",
    r"gpt",
    r"bert",
    r"diffusion\s+model",
    r"generative\s+model",
    r"classifier",
    r"dataset",
    r"training\s+(?:set|data)",
    r"gradient",
    r"weight",
    r"embedding",
    r"fine[- ]?tun\w*",
    r"prompt",
    r"token\w*",
    r"attention\s+mechanism",
    r"pre[- ]?train\w*",
    r"foundation\s+model",
    r"vision\s+model",
    r"machine\s+learn\w*",
    r"reinforcement\s+learn\w*",
];

/// Off-topic domains: hardware, classic security, cryptography, applied ML
const KILL_LIST_TERMS: &[&str] = &[
    r"fpga",
    r"hardware\s+trojan",
    r"circuit\s+design",
    r"pcb",
    r"voltage\s+glitch",
    r"logic\s+gate",
    r"side[- ]?channel\s+power",
    r"differential\s+power\s+analysis",
    r"buffer\s+overflow",
    r"sql\s+inject\w*",
    r"cross[- ]?site",
    r"xss",
    r"csrf",
    r"ddos",
    r"man[- ]?in[- ]?the[- ]?middle",
    r"arp\s+spoofing",
    r"dns\s+poison",
    r"malware\s+analysis",
    r"ransomware",
    r"cve[- ]?\d{4}",
    r"exploit\s+kit",
    r"penetration\s+test",
    r"vulnerability\s+scan",
    r"firewall\s+rule",
    r"elliptic\s+curve",
    r"rsa\s+encryption",
    r"aes\s+block",
    r"block\s+cipher",
    r"hash\s+collision",
    r"digital\s+signature\s+scheme",
    r"battery\s+(?:fault|diagnosis|monitor|manage)",
    r"medical\s+diagnosis",
    r"cancer\s+detection",
    r"tumor\s+segment",
    r"stock\s+(?:market|trad)",
    r"financial\s+forecast",
    r"portfolio\s+optim",
    r"robot\w*\s+navigation",
    r"autonomous\s+vehicle\s+control",
    r"weather\s+predict",
    r"climate\s+model",
    r"seismic\s+detect",
    r"protein\s+fold",
    r"drug\s+discover",
    r"molecule\s+gener",
];

const GENAI_TERMS: &[&str] = &[
    r"gpt[- ]?\d*",
    r"claude",
    r"llama[- ]?\d*",
    r"chatgpt",
    r"gemini",
    r"bard",
    r"mistral",
    r"mixtral",
    r"phi[- ]?\d",
    r"qwen",
    r"deepseek",
    r"generative\s+ai",
    r"language\s+model",
    r"diffusion\s+model",
    r"text[- ]?to[- ]?image",
    r"stable\s+diffusion",
    r"midjourney",
    r"dall[- ]?e",
    r"multimodal",
    r"vision[- ]?language",
    r"vlm",
];

const SAFETY_TERMS: &[&str] = &[
    r"alignment",
    r"misalignment",
    r"value\s+alignment",
    r"safety\s+eval",
    r"safety\s+bench",
    r"safety\s+audit",
    r"harmful\s+content",
    r"toxic\s+output",
    r"bias\s+detect",
    r"guardrail",
    r"content\s+filter",
    r"moderation",
    r"decepti\w+",
    r"manipulat\w+",
    r"persuasi\w+",
    r"existential\s+risk",
    r"x[- ]?risk",
    r"catastroph\w+",
];

pub const STRONG_AML_POINTS: u32 = 50;
pub const SAFETY_POINTS: u32 = 30;
pub const AMBIGUOUS_POINTS: u32 = 20;
pub const AMBIGUOUS_MAX_COUNTED: usize = 3;
pub const ML_FOUNDATION_POINTS: u32 = 10;
pub const ML_FOUNDATION_MIN_ANCHORS: usize = 3;
pub const KILL_LIST_MIN_ANCHORS: usize = 2;
pub const ACCEPT_SCORE: u32 = 50;
pub const KILL_LIST_CONFIDENCE: f64 = 0.95;
pub const MAX_CONFIDENCE: f64 = 0.99;

/// Multiplier applied once when any generative-AI term is present
const GENAI_BOOST_NUM: u32 = 13;
const GENAI_BOOST_DEN: u32 = 10;

fn term_regex(terms: &[&str]) -> Regex {
    let pattern = format!(r"(?i)\b(?:{})\b", terms.join("|"));
    Regex::new(&pattern).expect("pre-filter term list compiles")
}

/// Matches found for one term family
struct TermMatches {
    count: usize,
    terms: BTreeSet<String>,
}

impl TermMatches {
    fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of different terms matched; repeats of one term count once
    fn distinct(&self) -> usize {
        self.terms.len()
    }

    fn joined(&self) -> String {
        self.terms.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Rule-based relevance scorer. Construction compiles the term families;
/// evaluation is pure.
#[derive(Debug, Clone)]
pub struct PreFilter {
    strong_aml: Regex,
    ambiguous: Regex,
    ml_anchors: Regex,
    kill_list: Regex,
    genai: Regex,
    safety: Regex,
}

impl Default for PreFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl PreFilter {
    pub fn new() -> Self {
        Self {
            strong_aml: term_regex(STRONG_AML_TERMS),
            ambiguous: term_regex(AMBIGUOUS_TERMS),
            ml_anchors: term_regex(ML_ANCHOR_TERMS),
            kill_list: term_regex(KILL_LIST_TERMS),
            genai: term_regex(GENAI_TERMS),
            safety: term_regex(SAFETY_TERMS),
        }
    }

    fn find(regex: &Regex, text: &str) -> TermMatches {
        let mut count = 0;
        let mut terms = BTreeSet::new();
        for m in regex.find_iter(text) {
            count += 1;
            terms.insert(m.as_str().to_string());
        }
        TermMatches { count, terms }
    }

    /// Score a paper by title and abstract.
    pub fn evaluate(&self, title: &str, abstract_text: &str) -> PreFilterResult {
        let text = format!("{} {}", title, abstract_text).to_lowercase();

        let ml_anchors = Self::find(&self.ml_anchors, &text);

        let kill = Self::find(&self.kill_list, &text);
        if !kill.is_empty() && ml_anchors.distinct() < KILL_LIST_MIN_ANCHORS {
            return PreFilterResult {
                status: FilterStatus::Reject,
                score: 0,
                reasons: vec![format!(
                    "KILL_LIST: {{{}}} (insufficient ML context)",
                    kill.joined()
                )],
                confidence: KILL_LIST_CONFIDENCE,
            };
        }

        let mut score = 0u32;
        let mut reasons = Vec::new();

        let strong = Self::find(&self.strong_aml, &text);
        if !strong.is_empty() {
            score += STRONG_AML_POINTS;
            reasons.push(format!("STRONG_AML: {{{}}}", strong.joined()));
        }

        let safety = Self::find(&self.safety, &text);
        if !safety.is_empty() {
            score += SAFETY_POINTS;
            reasons.push(format!("SAFETY_TERMS: {{{}}}", safety.joined()));
        }

        let ambiguous = Self::find(&self.ambiguous, &text);
        if !ambiguous.is_empty() {
            if ml_anchors.is_empty() {
                reasons.push(format!(
                    "IGNORED_AMBIGUOUS: {{{}}} (need ML context)",
                    ambiguous.joined()
                ));
            } else {
                let counted = ambiguous.count.min(AMBIGUOUS_MAX_COUNTED) as u32;
                score += AMBIGUOUS_POINTS * counted;
                reasons.push(format!(
                    "VALIDATED_AMBIGUOUS: {{{}}} with {} ML anchors",
                    ambiguous.joined(),
                    ml_anchors.distinct()
                ));
            }
        }

        let genai = Self::find(&self.genai, &text);
        if !genai.is_empty() {
            score = score * GENAI_BOOST_NUM / GENAI_BOOST_DEN;
            reasons.push(format!("GENAI_BOOST: {{{}}}", genai.joined()));
        }

        if ml_anchors.distinct() >= ML_FOUNDATION_MIN_ANCHORS {
            score += ML_FOUNDATION_POINTS;
            reasons.push(format!("ML_FOUNDATION: {} ML terms", ml_anchors.distinct()));
        }

        if reasons.is_empty() {
            reasons.push("NO_SIGNALS: No relevant terms found".to_string());
        }

        let status = if score >= ACCEPT_SCORE {
            FilterStatus::Accept
        } else {
            FilterStatus::Reject
        };

        PreFilterResult {
            status,
            score,
            reasons,
            confidence: confidence_for(score),
        }
    }
}

fn confidence_for(score: u32) -> f64 {
    let raw = (score as f64 / 100.0).min(MAX_CONFIDENCE);
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(title: &str, abstract_text: &str) -> PreFilterResult {
        PreFilter::new().evaluate(title, abstract_text)
    }

    #[test]
    fn test_gcg_jailbreak_scores_above_auto_accept() {
        let result = evaluate(
            "Universal Jailbreak via Gradient-Based Suffix Optimization",
            "Abstract: We introduce GCG, an automated method for generating adversarial \
             suffixes that cause LLMs to bypass alignment. Our method achieves 99% success \
             rate on Llama-2 and GPT-3.5. We demonstrate that these attacks transfer to \
             other models.",
        );
        // (50 strong + 30 safety) * 1.3
        assert_eq!(result.score, 104);
        assert!(result.score >= 70);
        assert_eq!(result.status, FilterStatus::Accept);
        assert_eq!(result.confidence, 0.99);
        assert!(result.reasons.iter().any(|r| r.starts_with("STRONG_AML")));
        assert!(result.reasons.iter().any(|r| r.starts_with("GENAI_BOOST")));
    }

    #[test]
    fn test_battery_diagnosis_is_killed() {
        let result = evaluate(
            "BatteryAgent: Physics-Informed Battery Fault Diagnosis",
            "We develop a system for detecting battery failures using physics-informed \
             neural networks.",
        );
        assert_eq!(result.status, FilterStatus::Reject);
        assert_eq!(result.score, 0);
        assert!(result.score < 50);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.reasons.len(), 1);
        assert!(result.reasons[0].starts_with("KILL_LIST"));
        assert!(result.reasons[0].contains("battery fault"));
    }

    #[test]
    fn test_kill_list_overrides_strong_terms_without_ml_context() {
        let result = evaluate(
            "Detecting Hardware Trojans in FPGA Circuits",
            "We study jailbreak-style trojan attacks using differential power analysis.",
        );
        assert_eq!(result.status, FilterStatus::Reject);
        assert_eq!(result.score, 0);
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn test_kill_list_needs_two_anchors_to_be_overridden() {
        // "cancer detection" is on the kill list but deep learning + neural network
        // give enough ML context to fall through to normal scoring
        let result = evaluate(
            "Deep Learning for Cancer Detection in Radiology Images",
            "We train a neural network to detect tumors in medical images with 95% accuracy.",
        );
        assert_eq!(result.status, FilterStatus::Reject);
        assert_eq!(result.score, 0);
        assert!(!result.reasons[0].starts_with("KILL_LIST"));
    }

    #[test]
    fn test_strong_match_alone_accepts() {
        let result = evaluate(
            "Universal Jailbreak via Gradient-Based Suffix Optimization",
            "We propose adversarial attacks on aligned language models using gradient \
             optimization.",
        );
        assert_eq!(result.score, 50);
        assert_eq!(result.status, FilterStatus::Accept);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_genai_boost_applies_to_red_teaming() {
        let result = evaluate(
            "Red Teaming GPT-4 with Automated Jailbreaks",
            "We test ChatGPT's safety guardrails using adversarial prompts and automated \
             red teaming.",
        );
        // 50 * 1.3
        assert_eq!(result.score, 65);
        assert_eq!(result.status, FilterStatus::Accept);
    }

    #[test]
    fn test_alignment_paper_accepts() {
        let result = evaluate(
            "Measuring AI Alignment: Behavioral Evaluation Methods",
            "We propose benchmarks for evaluating AI alignment and safety properties of \
             large language models.",
        );
        assert_eq!(result.score, 80);
        assert_eq!(result.status, FilterStatus::Accept);
        assert!(result.reasons.iter().any(|r| r.starts_with("SAFETY_TERMS")));
    }

    #[test]
    fn test_ambiguous_terms_count_with_ml_context() {
        let result = evaluate(
            "Improving LLM Robustness via Adversarial Training",
            "We propose adversarial training methods to improve model robustness against \
             adversarial perturbations.",
        );
        // 50 strong + 2 ambiguous * 20
        assert_eq!(result.score, 90);
        assert!(result.reasons.iter().any(|r| r.starts_with("VALIDATED_AMBIGUOUS")));
    }

    #[test]
    fn test_ambiguous_terms_ignored_without_ml_context() {
        let result = evaluate(
            "Audio Watermarking for Broadcast Monitoring",
            "A robust watermark scheme for radio streams.",
        );
        assert_eq!(result.score, 0);
        assert_eq!(result.status, FilterStatus::Reject);
        assert!(result.reasons[0].starts_with("IGNORED_AMBIGUOUS"));
    }

    #[test]
    fn test_repeated_anchor_counts_once() {
        // "transformer" twice plus "gradient" is two distinct anchors
        let result = evaluate(
            "Faster Transformer Training via Gradient Checkpointing",
            "We propose a method to reduce memory usage during transformer training by 50%.",
        );
        assert_eq!(result.score, 0);
        assert_eq!(result.status, FilterStatus::Reject);
        assert_eq!(result.reasons, vec!["NO_SIGNALS: No relevant terms found".to_string()]);
    }

    #[test]
    fn test_ml_foundation_bonus_alone_rejects() {
        let result = evaluate(
            "Transformer Models and Gradient Descent",
            "We study how the embedding layer of a transformer changes under gradient descent.",
        );
        assert_eq!(result.score, 10);
        assert_eq!(result.status, FilterStatus::Reject);
        assert_eq!(result.confidence, 0.1);
        assert_eq!(result.reasons, vec!["ML_FOUNDATION: 3 ML terms".to_string()]);
    }

    #[test]
    fn test_kill_list_guard_counts_distinct_anchors() {
        let result = evaluate(
            "Neural Network Battery Fault Detection",
            "A neural network and another neural network vote on each cell.",
        );
        assert_eq!(result.status, FilterStatus::Reject);
        assert!(result.reasons[0].starts_with("KILL_LIST"));
    }

    #[test]
    fn test_no_signals() {
        let result = evaluate(
            "Geometry of Reason: Spectral Signatures of Valid Mathematical Reasoning",
            "We present a training-free method to analyze reasoning validity.",
        );
        assert_eq!(result.score, 0);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.reasons, vec!["NO_SIGNALS: No relevant terms found".to_string()]);
    }

    #[test]
    fn test_safety_only_paper_is_borderline() {
        let result = evaluate(
            "Deception in Dialogue Agents",
            "We examine when conversational systems mislead users.",
        );
        assert_eq!(result.score, 30);
        assert_eq!(result.status, FilterStatus::Reject);
        assert_eq!(result.confidence, 0.3);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let filter = PreFilter::new();
        let title = "Backdoor Attacks on Federated Learning";
        let text = "We poison training datasets to inject backdoors into neural networks.";
        let first = filter.evaluate(title, text);
        let second = filter.evaluate(title, text);
        assert_eq!(first, second);
    }

    #[test]
    fn test_matches_whole_words_only() {
        // "bert" inside "roberta" and "gpt" inside "chatgpt" are not anchors
        let filter = PreFilter::new();
        let anchors = PreFilter::find(&filter.ml_anchors, "roberta and chatgpt");
        assert_eq!(anchors.count, 0);
        assert_eq!(anchors.distinct(), 0);
    }
}
