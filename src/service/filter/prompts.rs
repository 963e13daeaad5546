//! Prompts for borderline relevance decisions

use crate::model::{PreFilterResult, truncate_chars};

/// Abstract characters shown to the model
pub const ABSTRACT_PROMPT_CHARS: usize = 600;

pub const FILTER_SYSTEM_PROMPT: &str = "You are an AI Security research assistant helping \
researchers stay up-to-date. When in doubt, prefer ACCEPT over REJECT.";

/// Build the borderline-case prompt
pub fn build_filter_prompt(title: &str, abstract_text: &str, pre_filter: &PreFilterResult) -> String {
    format!(
        r#"You screen papers for an AI Security news feed read by researchers who need to stay current.

**Paper:**
Title: {title}
Abstract: {abstract_text}

**Keyword pre-filter:** score {score} ({reasons})

**ACCEPT when the paper shows:**
1. Concrete attacks on ML systems: jailbreaks, adversarial examples, prompt injection, model extraction, poisoning
2. Security defenses: adversarial training, input validation, alignment methods, safety evaluations
3. Empirical security work: red teaming, attack benchmarks, vulnerability analysis of models
4. Privacy or safety methods in an ML setting: differential privacy, federated learning security
5. Novel security insight, even if theoretical, that practitioners can act on

**REJECT when the paper is:**
1. Pure optimization (speed, accuracy) with no security implication
2. Domain research (medical, finance, IoT) that uses ML but is not about ML security
3. General software engineering: code generation, testing, documentation
4. Interpretability, fairness or efficiency work with no adversarial angle

**Borderline papers:** if attacks or defenses are discussed but are not the main focus, or the paper
reports results on security metrics, ACCEPT. Missing a relevant paper costs more than including a
marginal one.

Write your reasoning first (50-100 words), then give a confidence score and the decision."#,
        title = title,
        abstract_text = truncate_chars(abstract_text, ABSTRACT_PROMPT_CHARS),
        score = pre_filter.score,
        reasons = pre_filter.reasons.join("; "),
    )
}
