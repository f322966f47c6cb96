use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{WebHit, WebSearchService};
use super::ServiceError;
use crate::config::ServiceConfig;

/// Live web search through the Tavily API.
///
/// The API key is read from the environment once, at construction.
pub struct TavilyClient {
    url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl TavilyClient {
    pub fn new(url: &str, api_key: String, timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            api_key,
            client,
            timeout_secs,
        })
    }

    /// Fails with `MissingCredential` when the configured variable is unset or empty.
    pub fn from_config(services: &ServiceConfig) -> Result<Self, ServiceError> {
        let var = &services.tavily_api_key_env;
        let api_key = std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ServiceError::MissingCredential(var.clone()))?;
        Self::new(&services.tavily_url, api_key, services.http_timeout_secs)
    }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f32>,
}

fn into_hits(response: TavilyResponse, top_k: usize) -> Vec<WebHit> {
    response
        .results
        .into_iter()
        .filter(|r| !r.content.trim().is_empty())
        .take(top_k)
        .map(|r| WebHit {
            url: r.url,
            title: r.title.filter(|t| !t.trim().is_empty()),
            excerpt: r.content,
            relevance: r.score,
        })
        .collect()
}

impl WebSearchService for TavilyClient {
    fn search(&self, text: &str, top_k: usize) -> Result<Vec<WebHit>, ServiceError> {
        let body = TavilyRequest {
            query: text,
            max_results: top_k,
            search_depth: "basic",
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| ServiceError::from_reqwest(e, &self.url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TavilyResponse = response
            .json()
            .map_err(|e| ServiceError::ResponseParsing(e.to_string()))?;

        let hits = into_hits(parsed, top_k);
        tracing::debug!(results = hits.len(), "Web search complete");
        Ok(hits)
    }
}
