//! arXiv evidence provider.
//!
//! Queries the public Atom API (no key required) and turns each `<entry>` into
//! an evidence hit with the paper title, abstract and abstract URL.

use async_trait::async_trait;
use reportsmith_core::error::ProviderError;
use reportsmith_core::research::{EvidenceHit, EvidenceProvider};
use tracing::debug;

use crate::http::{build_client, normalize_whitespace, send_text};

pub const NAME: &str = "arxiv";
pub const ARXIV_API_BASE: &str = "https://export.arxiv.org/api/query";

/// Paper search against the arXiv API.
pub struct ArxivProvider {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivProvider {
    pub fn new() -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(NAME)?,
            base_url: ARXIV_API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl EvidenceProvider for ArxivProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn query(&self, text: &str, max_results: usize) -> Result<Vec<EvidenceHit>, ProviderError> {
        let url = build_search_url(&self.base_url, text, max_results);
        debug!(url = %url, "arXiv search");
        let body = send_text(NAME, self.client.get(&url)).await?;
        Ok(parse_atom_response(&body))
    }
}

/// Build the search URL for a free-text query, ranked by relevance.
pub fn build_search_url(base: &str, query: &str, max_results: usize) -> String {
    let search_query = format!("all:{}", query.trim());
    format!(
        "{base}?search_query={}&start=0&max_results={max_results}&sortBy=relevance&sortOrder=descending",
        urlencoding::encode(&search_query),
    )
}

/// Parse an Atom feed into evidence hits, skipping malformed entries.
pub fn parse_atom_response(xml: &str) -> Vec<EvidenceHit> {
    extract_entries(xml)
        .into_iter()
        .filter_map(parse_entry)
        .collect()
}

/// All `<entry>...</entry>` blocks of the feed.
fn extract_entries(xml: &str) -> Vec<&str> {
    const START: &str = "<entry>";
    const END: &str = "</entry>";

    let mut entries = Vec::new();
    let mut search_from = 0;
    while let Some(pos) = xml[search_from..].find(START) {
        let start = search_from + pos;
        let Some(len) = xml[start..].find(END) else {
            break;
        };
        let end = start + len + END.len();
        entries.push(&xml[start..end]);
        search_from = end;
    }
    entries
}

fn parse_entry(entry: &str) -> Option<EvidenceHit> {
    let id_url = extract_tag_text(entry, "id")?;
    let title = normalize_whitespace(&extract_tag_text(entry, "title")?);
    let summary = normalize_whitespace(&extract_tag_text(entry, "summary").unwrap_or_default());
    if title.is_empty() {
        return None;
    }

    let mut abs_url = id_url;
    let mut link_search = 0;
    while let Some(pos) = entry[link_search..].find("<link") {
        let link_start = link_search + pos;
        let Some(len) = entry[link_start..].find('>') else {
            break;
        };
        let link_end = link_start + len + 1;
        let link = &entry[link_start..link_end];
        if let Some(href) = extract_attribute(link, "href")
            && extract_attribute(link, "type").as_deref() == Some("text/html")
        {
            abs_url = href;
        }
        link_search = link_end;
    }

    Some(EvidenceHit::new(title, summary, Some(abs_url)))
}

/// Text content of the first `<tag ...>text</tag>`.
fn extract_tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    let start = xml.find(&open)?;
    let content_start = xml[start..].find('>')? + start + 1;
    let content_end = xml[content_start..].find(&close)? + content_start;
    Some(xml[content_start..content_end].trim().to_string())
}

/// Value of `attr="..."` inside a tag.
fn extract_attribute(tag: &str, attr: &str) -> Option<String> {
    let search = format!("{attr}=\"");
    let start = tag.find(&search)? + search.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/1706.03762v7</id>
    <title>Attention Is All
      You Need</title>
    <summary>  The dominant sequence transduction models are based on complex recurrent or
convolutional neural networks.  </summary>
    <link href="http://arxiv.org/abs/1706.03762v7" rel="alternate" type="text/html"/>
    <link href="http://arxiv.org/pdf/1706.03762v7" title="pdf" type="application/pdf"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/1810.04805v2</id>
    <title>BERT: Pre-training of Deep Bidirectional Transformers</title>
    <summary>We introduce a new language representation model.</summary>
  </entry>
  <entry>
    <summary>Entry without id or title is skipped.</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let hits = parse_atom_response(SAMPLE_FEED);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Attention Is All You Need");
        assert_eq!(
            hits[0].body,
            "The dominant sequence transduction models are based on complex recurrent or convolutional neural networks."
        );
        assert_eq!(hits[0].url.as_deref(), Some("http://arxiv.org/abs/1706.03762v7"));
        assert_eq!(hits[1].url.as_deref(), Some("http://arxiv.org/abs/1810.04805v2"));
    }

    #[test]
    fn test_parse_empty_feed() {
        assert!(parse_atom_response("<feed><title>ArXiv Query</title></feed>").is_empty());
        assert!(parse_atom_response("").is_empty());
    }

    #[test]
    fn test_build_search_url() {
        let url = build_search_url(ARXIV_API_BASE, "Quantum computing: I. Introduction", 3);
        assert_eq!(
            url,
            "https://export.arxiv.org/api/query?search_query=all%3AQuantum%20computing%3A%20I.%20Introduction\
             &start=0&max_results=3&sortBy=relevance&sortOrder=descending"
        );
    }

    #[test]
    fn test_extract_attribute() {
        let tag = r#"<link href="http://x" type="text/html"/>"#;
        assert_eq!(extract_attribute(tag, "href").as_deref(), Some("http://x"));
        assert_eq!(extract_attribute(tag, "title"), None);
    }
}
