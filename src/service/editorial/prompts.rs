use crate::model::{DailyBriefing, ThreatSignature};

pub const CURATOR_SYSTEM_PROMPT: &str = "You are an expert technical editor for AI Security.";
pub const CRITIC_SYSTEM_PROMPT: &str = "You are a pedantic fact-checker.";

pub const CURATOR_TEMPERATURE: f64 = 0.2;
pub const CRITIC_TEMPERATURE: f64 = 0.0;

/// One line per threat: `- [{severity}/5] {title}: {tldr} ({attack_type})`
pub fn format_threat_lines(threats: &[ThreatSignature]) -> String {
    threats
        .iter()
        .map(|t| {
            format!(
                "- [{}/5] {}: {} ({})",
                t.severity, t.title, t.summary_tldr, t.attack_type
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_draft_prompt(threats: &[ThreatSignature], previous_summary: &str) -> String {
    let previous_summary = if previous_summary.trim().is_empty() {
        "(none)"
    } else {
        previous_summary
    };

    format!(
        r#"Write an academic research digest of the papers below. This is a research digest, not an incident report.

## Format

### New Attack Research (N papers)
- **[Paper Title]**: [one-sentence contribution] -> [affected systems]

### New Defense Research (N papers)
- **[Paper Title]**: [defense mechanism] -> [reported effectiveness]

### Research Trends
[2-3 sentences on common themes, gaps in the literature and emerging directions]

### Noteworthy Findings
- [the 1-2 most impactful results of this period]

Only mention papers from the list below. Do not raise or lower their severity.
Put the URLs of the most critical papers in highlighted_threat_ids.

Previous briefing:
{previous_summary}

New research papers:
{threats}
"#,
        previous_summary = previous_summary,
        threats = format_threat_lines(threats),
    )
}

pub fn build_revise_prompt(draft: &DailyBriefing, feedback: &str) -> String {
    format!(
        r#"Your previous draft was rejected by the fact-checker.

Original draft:
{headline}

{summary}

Fact-checker feedback:
{feedback}

Rewrite the briefing so that it addresses every point of the feedback. Keep the same format.
"#,
        headline = draft.headline,
        summary = draft.summary_markdown,
        feedback = feedback,
    )
}

pub fn build_critique_prompt(draft: &DailyBriefing, threats: &[ThreatSignature]) -> String {
    let sources = threats
        .iter()
        .map(|t| format!("- {}", t.title))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Act as a strict fact-checker. Validate the draft briefing against the source papers.

Source papers (ground truth):
{sources}

Draft briefing:
{headline}
{summary}

Check for:
1. Hallucinations: papers mentioned in the draft that are not in the source list.
2. Exaggerations: severity or impact claimed beyond what the source supports.
3. Omissions: critical papers or findings left out.

If there are significant errors, set is_approved to false and give concrete instructions in feedback.
If the draft is accurate or has only minor nits, approve it.
Score the draft from 1 to 10.
"#,
        sources = sources,
        headline = draft.headline,
        summary = draft.summary_markdown,
    )
}
