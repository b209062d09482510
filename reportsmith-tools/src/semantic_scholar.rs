//! Semantic Scholar evidence provider (Graph API paper search).

use async_trait::async_trait;
use reportsmith_core::error::ProviderError;
use reportsmith_core::research::{EvidenceHit, EvidenceProvider};
use serde::Deserialize;
use tracing::debug;

use crate::http::{build_client, normalize_whitespace, parse_json, send_text};

pub const NAME: &str = "semantic_scholar";
pub const SEMANTIC_SCHOLAR_API_BASE: &str = "https://api.semanticscholar.org/graph/v1";

/// Paper search against Semantic Scholar. The API key is optional; without one
/// requests fall into the shared public rate limit.
pub struct SemanticScholarProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl SemanticScholarProvider {
    pub fn new(api_key: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(NAME)?,
            api_key,
            base_url: SEMANTIC_SCHOLAR_API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub fn build_search_url(base: &str, query: &str, max_results: usize) -> String {
    format!(
        "{base}/paper/search?query={}&limit={max_results}&fields=title,abstract,url",
        urlencoding::encode(query.trim())
    )
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Paper>,
}

#[derive(Debug, Deserialize)]
struct Paper {
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    url: Option<String>,
}

/// Papers without a title or abstract carry nothing to ground a section on.
pub fn parse_response(body: &str) -> Result<Vec<EvidenceHit>, ProviderError> {
    let response: SearchResponse = parse_json(NAME, body)?;
    Ok(response
        .data
        .into_iter()
        .filter_map(|paper| {
            let title = paper.title.map(|t| normalize_whitespace(&t))?;
            let summary = paper
                .abstract_text
                .map(|a| normalize_whitespace(&a))
                .filter(|a| !a.is_empty())?;
            Some(EvidenceHit::new(title, summary, paper.url))
        })
        .collect())
}

#[async_trait]
impl EvidenceProvider for SemanticScholarProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn query(&self, text: &str, max_results: usize) -> Result<Vec<EvidenceHit>, ProviderError> {
        let url = build_search_url(&self.base_url, text, max_results);
        debug!(url = %url, "Semantic Scholar search");
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let body = send_text(NAME, request).await?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_search_url() {
        assert_eq!(
            build_search_url(SEMANTIC_SCHOLAR_API_BASE, "graph neural networks", 3),
            "https://api.semanticscholar.org/graph/v1/paper/search?query=graph%20neural%20networks&limit=3&fields=title,abstract,url"
        );
    }

    #[test]
    fn test_parse_response_skips_missing_abstracts() {
        let body = r#"{
            "total": 3,
            "data": [
                {"paperId": "a", "title": "Graph  Networks", "abstract": "We study\ngraphs.", "url": "https://www.semanticscholar.org/paper/a"},
                {"paperId": "b", "title": "No abstract", "abstract": null, "url": null},
                {"paperId": "c", "title": null, "abstract": "Orphan abstract"}
            ]
        }"#;
        let hits = parse_response(body).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Graph Networks");
        assert_eq!(hits[0].body, "We study graphs.");
    }

    #[test]
    fn test_parse_response_without_data() {
        assert!(parse_response(r#"{"total": 0, "offset": 0}"#).unwrap().is_empty());
    }
}
