//! News evidence provider backed by NewsAPI (`/v2/everything`).

use async_trait::async_trait;
use reportsmith_core::error::ProviderError;
use reportsmith_core::research::{EvidenceHit, EvidenceProvider};
use serde::Deserialize;
use tracing::debug;

use crate::http::{build_client, parse_json, send_text};

pub const NAME: &str = "news";
pub const NEWS_API_URL: &str = "https://newsapi.org/v2/everything";

/// NewsAPI article search. Requires an API key.
pub struct NewsApiProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl NewsApiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(NAME)?,
            api_key: api_key.into(),
            endpoint: NEWS_API_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

pub fn build_search_url(endpoint: &str, query: &str, max_results: usize) -> String {
    format!(
        "{endpoint}?q={}&pageSize={max_results}&sortBy=relevancy",
        urlencoding::encode(query.trim())
    )
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    status: String,
    #[serde(default)]
    articles: Vec<Article>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Article {
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    url: Option<String>,
}

/// Turn a NewsAPI body into hits. An `"status": "error"` body is a provider error.
pub fn parse_response(body: &str) -> Result<Vec<EvidenceHit>, ProviderError> {
    let response: NewsResponse = parse_json(NAME, body)?;
    if response.status != "ok" {
        return Err(ProviderError::Request {
            provider: NAME.to_string(),
            message: response
                .message
                .unwrap_or_else(|| format!("status {}", response.status)),
        });
    }
    Ok(response
        .articles
        .into_iter()
        .filter_map(|article| {
            let title = article.title.filter(|t| t != "[Removed]")?;
            let summary = article
                .description
                .or(article.content)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())?;
            Some(EvidenceHit::new(title, summary, article.url))
        })
        .collect())
}

#[async_trait]
impl EvidenceProvider for NewsApiProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn query(&self, text: &str, max_results: usize) -> Result<Vec<EvidenceHit>, ProviderError> {
        let url = build_search_url(&self.endpoint, text, max_results);
        debug!(url = %url, "NewsAPI search");
        let request = self.client.get(&url).header("X-Api-Key", &self.api_key);
        let body = send_text(NAME, request).await?;
        parse_response(&body)
    }
}
