//! Prompts for threat extraction

use crate::model::{RawDocument, truncate_chars};

/// Document characters shown to the model
pub const CONTENT_PROMPT_CHARS: usize = 8000;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are an expert AI Security Analyst.";

pub fn build_extraction_prompt(doc: &RawDocument) -> String {
    format!(
        r#"Extract a structured threat signature from the paper below.

Source ID: {id}
URL: {url}
Published: {published}
Content:
{content}

Instructions:
- Identify the specific attack type. Use "Other" when none of the listed types fit.
- Rate severity from 1 (Info) to 5 (Critical) by impact and how easily the attack reproduces.
- Look for code links (GitHub, GitLab, project pages). No released code means the work is theoretical.
- Report only claims that appear in the text. Do not infer results, models or numbers the paper does not state."#,
        id = doc.id,
        url = doc.url,
        published = doc.published_date.to_rfc3339(),
        content = truncate_chars(&doc.content, CONTENT_PROMPT_CHARS),
    )
}
