use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// A paper as fetched from a document source, before any filtering.
///
/// Documents are never mutated after construction; `ingested_at` is stamped
/// when the value is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RawDocument {
    /// Source-assigned identifier (e.g. an arXiv id such as `2307.15043`)
    pub id: String,
    pub title: String,
    pub url: String,
    /// Abstract or full text
    pub content: String,
    /// Origin tag, e.g. `arxiv`
    pub source: String,
    pub published_date: DateTime<Utc>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub ingested_at: DateTime<Utc>,
}

impl RawDocument {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        published_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            content: content.into(),
            source: source.into(),
            published_date,
            metadata: Map::new(),
            ingested_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
