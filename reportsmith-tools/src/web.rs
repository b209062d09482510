//! Web search evidence provider backed by the Tavily search API.

use async_trait::async_trait;
use reportsmith_core::error::ProviderError;
use reportsmith_core::research::{EvidenceHit, EvidenceProvider};
use serde::Deserialize;
use tracing::debug;

use crate::http::{build_client, parse_json, send_text};

pub const NAME: &str = "web";
pub const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Web search through Tavily. Requires an API key.
pub struct TavilyProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilyProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(NAME)?,
            api_key: api_key.into(),
            endpoint: TAVILY_API_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Request body of a Tavily search.
pub fn build_request_body(query: &str, max_results: usize) -> serde_json::Value {
    serde_json::json!({
        "query": query,
        "max_results": max_results,
        "search_depth": "basic",
        "include_answer": false,
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Turn a Tavily response body into evidence hits.
pub fn parse_response(body: &str) -> Result<Vec<EvidenceHit>, ProviderError> {
    let response: SearchResponse = parse_json(NAME, body)?;
    Ok(response
        .results
        .into_iter()
        .filter_map(|result| {
            let content = result.content.filter(|c| !c.trim().is_empty())?;
            let title = result
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Web Search Result".to_string());
            let url = result.url.filter(|u| !u.is_empty());
            Some(EvidenceHit::new(title, content.trim(), url))
        })
        .collect())
}

#[async_trait]
impl EvidenceProvider for TavilyProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn query(&self, text: &str, max_results: usize) -> Result<Vec<EvidenceHit>, ProviderError> {
        debug!(query = text, max_results, "Tavily search");
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&build_request_body(text, max_results));
        let body = send_text(NAME, request).await?;
        parse_response(&body)
    }
}
