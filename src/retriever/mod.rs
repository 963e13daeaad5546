//! Document sources feeding the ingestion service

mod arxiv;

use futures::stream::BoxStream;

use crate::model::RawDocument;

pub use arxiv::ArxivSource;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Source returned HTTP {0}")]
    Status(u16),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl SourceError {
    /// Transport failures and server-side statuses can be retried on the next
    /// cycle; parse failures will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport(_) => true,
            SourceError::Status(status) => *status == 429 || *status >= 500,
            SourceError::Parse(_) => false,
        }
    }
}

/// A finite, lazily fetched sequence of recent documents. Each call starts a
/// fresh sequence. The sequence ends after the first error.
pub trait DocumentSource: Send + Sync {
    fn fetch_recent(
        &self,
        days_back: u32,
        max_results: usize,
    ) -> BoxStream<'_, Result<RawDocument, SourceError>>;

    fn name(&self) -> &str;
}
