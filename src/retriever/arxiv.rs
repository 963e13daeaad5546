//! arXiv Atom API source

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;

use super::{DocumentSource, SourceError};
use crate::model::RawDocument;

const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";
const SOURCE_NAME: &str = "arxiv";
const MAX_PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// arXiv asks clients to wait 3 seconds between requests
const PAGE_DELAY: Duration = Duration::from_secs(3);

pub struct ArxivSource {
    client: Client,
    search_query: String,
}

struct PageState {
    start: usize,
    fetched: usize,
    buffer: VecDeque<RawDocument>,
    exhausted: bool,
}

impl ArxivSource {
    /// Search the given categories, e.g. `cs.CR`
    pub fn new(categories: &[String]) -> Self {
        Self {
            client: Client::new(),
            search_query: build_search_query(categories),
        }
    }

    async fn fetch_page(&self, start: usize, page_size: usize) -> Result<Vec<RawDocument>, SourceError> {
        tracing::info!(start = start, page_size = page_size, "Fetching arXiv batch");

        let start = start.to_string();
        let page_size = page_size.to_string();
        let response = self
            .client
            .get(ARXIV_API_URL)
            .query(&[
                ("search_query", self.search_query.as_str()),
                ("start", start.as_str()),
                ("max_results", page_size.as_str()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
            ])
            .header("User-Agent", "safety-radar/0.1")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "arXiv API returned an error status");
            return Err(SourceError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_feed(&body)
    }
}

impl DocumentSource for ArxivSource {
    fn fetch_recent(
        &self,
        days_back: u32,
        max_results: usize,
    ) -> BoxStream<'_, Result<RawDocument, SourceError>> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_back));
        let page_size = max_results.clamp(1, MAX_PAGE_SIZE);
        let state = PageState {
            start: 0,
            fetched: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        stream::unfold(state, move |mut st| async move {
            loop {
                if st.fetched >= max_results {
                    return None;
                }

                if let Some(doc) = st.buffer.pop_front() {
                    if doc.published_date < cutoff {
                        tracing::info!(cutoff = %cutoff, "Reached date limit, stopping ingestion");
                        return None;
                    }
                    st.fetched += 1;
                    return Some((Ok(doc), st));
                }

                if st.exhausted {
                    return None;
                }

                if st.start > 0 {
                    tokio::time::sleep(PAGE_DELAY).await;
                }

                match self.fetch_page(st.start, page_size).await {
                    Ok(docs) if docs.is_empty() => return None,
                    Ok(docs) => {
                        st.exhausted = docs.len() < page_size;
                        st.start += docs.len();
                        st.buffer.extend(docs);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "arXiv API error");
                        st.exhausted = true;
                        return Some((Err(e), st));
                    }
                }
            }
        })
        .boxed()
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

fn build_search_query(categories: &[String]) -> String {
    categories
        .iter()
        .map(|c| format!("cat:{}", c.trim()))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("invalid selector {css}: {e}")))
}

fn first_text(entry: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    entry
        .select(selector)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

/// Parse an Atom feed into documents. Entries missing an id, title or
/// publication date are skipped.
pub(crate) fn parse_feed(body: &str) -> Result<Vec<RawDocument>, SourceError> {
    let document = Html::parse_document(body);

    let entry_sel = selector("entry")?;
    let id_sel = selector("id")?;
    let title_sel = selector("title")?;
    let summary_sel = selector("summary")?;
    let published_sel = selector("published")?;
    let author_sel = selector("author name")?;
    let link_sel = selector("link")?;
    let category_sel = selector("category")?;

    let mut docs = Vec::new();
    for entry in document.select(&entry_sel) {
        let (Some(entry_id), Some(title), Some(published)) = (
            first_text(&entry, &id_sel),
            first_text(&entry, &title_sel),
            first_text(&entry, &published_sel),
        ) else {
            tracing::debug!("Skipping incomplete feed entry");
            continue;
        };

        let published_date = match DateTime::parse_from_rfc3339(&published) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                tracing::debug!(entry_id = %entry_id, error = %e, "Skipping entry with invalid date");
                continue;
            }
        };

        let arxiv_id = entry_id.rsplit('/').next().unwrap_or(&entry_id).to_string();
        let summary = first_text(&entry, &summary_sel).unwrap_or_default();

        let url = entry
            .select(&link_sel)
            .find(|link| link.value().attr("type") == Some("application/pdf"))
            .and_then(|link| link.value().attr("href"))
            .map(str::to_string)
            .unwrap_or_else(|| entry_id.clone());

        let authors: Vec<String> = entry
            .select(&author_sel)
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .collect();
        let categories: Vec<&str> = entry
            .select(&category_sel)
            .filter_map(|el| el.value().attr("term"))
            .collect();
        let comment = entry
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "arxiv:comment")
            .map(|el| collapse_whitespace(&el.text().collect::<String>()));

        let content = format!("{}\n\nAbstract:\n{}", title, summary);
        docs.push(
            RawDocument::new(arxiv_id, title, url, content, SOURCE_NAME, published_date)
                .with_metadata("authors", json!(authors))
                .with_metadata("categories", json!(categories))
                .with_metadata("comment", json!(comment)),
        );
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/query</id>
  <entry>
    <id>http://arxiv.org/abs/2307.15043v2</id>
    <updated>2023-12-20T20:15:04Z</updated>
    <published>2023-07-27T17:49:12Z</published>
    <title>Universal and Transferable Adversarial Attacks on
      Aligned Language Models</title>
    <summary>  We introduce GCG, an automated method for generating adversarial
suffixes.</summary>
    <author><name>Andy Zou</name></author>
    <author><name>Zifan Wang</name></author>
    <arxiv:comment>Website: llm-attacks.org</arxiv:comment>
    <link href="http://arxiv.org/abs/2307.15043v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2307.15043v2" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CR" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2501.00001v1</id>
    <published>2025-01-02T00:00:00Z</published>
    <title>BatteryAgent</title>
    <summary>Battery fault diagnosis.</summary>
    <link href="http://arxiv.org/abs/2501.00001v1" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2501.00002v1</id>
    <title>No date</title>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let docs = parse_feed(FEED).unwrap();
        assert_eq!(docs.len(), 2);

        let gcg = &docs[0];
        assert_eq!(gcg.id, "2307.15043v2");
        assert_eq!(
            gcg.title,
            "Universal and Transferable Adversarial Attacks on Aligned Language Models"
        );
        assert_eq!(gcg.url, "http://arxiv.org/pdf/2307.15043v2");
        assert_eq!(gcg.source, "arxiv");
        assert!(gcg.content.starts_with("Universal and Transferable"));
        assert!(gcg.content.contains("Abstract:\nWe introduce GCG"));
        assert_eq!(gcg.metadata["authors"], json!(["Andy Zou", "Zifan Wang"]));
        assert_eq!(gcg.metadata["categories"], json!(["cs.CL", "cs.CR"]));
        assert_eq!(gcg.metadata["comment"], json!("Website: llm-attacks.org"));
        assert_eq!(gcg.published_date.to_rfc3339(), "2023-07-27T17:49:12+00:00");

        // no pdf link: falls back to the entry id
        assert_eq!(docs[1].url, "http://arxiv.org/abs/2501.00001v1");
        assert_eq!(docs[1].metadata["comment"], json!(null));
    }

    #[test]
    fn test_search_query() {
        let categories = vec!["cs.CR".to_string(), " cs.AI ".to_string()];
        assert_eq!(build_search_query(&categories), "cat:cs.CR OR cat:cs.AI");
    }

    #[tokio::test]
    #[ignore = "requires network access to export.arxiv.org"]
    async fn test_fetch_recent_live() {
        let source = ArxivSource::new(&["cs.CR".to_string()]);
        let docs: Vec<_> = source.fetch_recent(30, 3).collect().await;
        assert!(docs.len() <= 3);
        for doc in docs {
            let doc = doc.unwrap();
            assert!(!doc.title.is_empty());
        }
    }
}
