//! MediaWiki search as the encyclopedia collaborator.
//!
//! One request: `generator=search` ranks pages, `prop=extracts` returns the
//! plain-text intro of each. `index` in the response is the 1-based search
//! position.

use std::time::Duration;

use serde::Deserialize;

use super::types::{EncyclopediaLookup, LookupHit};
use super::ServiceError;
use crate::config::ServiceConfig;

pub struct WikipediaClient {
    api_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl WikipediaClient {
    pub fn new(api_url: &str, timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("hybrid-rag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            api_url: api_url.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(services: &ServiceConfig) -> Result<Self, ServiceError> {
        Self::new(
            &api_url_for(&services.wikipedia_url, &services.wikipedia_language),
            services.http_timeout_secs,
        )
    }
}

/// Substitute `{lang}` in the endpoint template.
pub fn api_url_for(template: &str, language: &str) -> String {
    template.replace("{lang}", language)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    pages: Vec<SearchPage>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    title: String,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    extract: Option<String>,
}

/// Pages in search order, 0-based ranks, pages without an extract dropped.
fn into_hits(response: SearchResponse, top_k: usize) -> Vec<LookupHit> {
    let mut pages = response.query.map(|q| q.pages).unwrap_or_default();
    pages.sort_by_key(|p| p.index.unwrap_or(usize::MAX));
    pages
        .into_iter()
        .filter_map(|p| {
            let excerpt = p.extract?.trim().to_string();
            (!excerpt.is_empty()).then_some((p.title, excerpt))
        })
        .take(top_k)
        .enumerate()
        .map(|(rank, (title, excerpt))| LookupHit {
            title,
            excerpt,
            rank,
        })
        .collect()
}

impl EncyclopediaLookup for WikipediaClient {
    fn search(&self, text: &str, top_k: usize) -> Result<Vec<LookupHit>, ServiceError> {
        let limit = top_k.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("generator", "search"),
                ("gsrsearch", text),
                ("gsrlimit", limit.as_str()),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("exlimit", "max"),
            ])
            .send()
            .map_err(|e| ServiceError::from_reqwest(e, &self.api_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .map_err(|e| ServiceError::ResponseParsing(e.to_string()))?;

        let hits = into_hits(parsed, top_k);
        tracing::debug!(results = hits.len(), "Encyclopedia lookup complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> SearchResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn api_url_substitutes_language() {
        assert_eq!(
            api_url_for("https://{lang}.wikipedia.org/w/api.php", "fr"),
            "https://fr.wikipedia.org/w/api.php"
        );
    }

    #[test]
    fn hits_follow_search_index_not_response_order() {
        let raw = r#"{"batchcomplete":true,"query":{"pages":[
            {"pageid":2,"title":"Paris","index":2,"extract":"Paris is the capital of France."},
            {"pageid":1,"title":"France","index":1,"extract":"France is a country in Western Europe."}
        ]}}"#;
        let hits = into_hits(parse(raw), 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "France");
        assert_eq!(hits[0].rank, 0);
        assert_eq!(hits[1].title, "Paris");
        assert_eq!(hits[1].rank, 1);
    }

    #[test]
    fn pages_without_extract_are_skipped_and_ranks_stay_contiguous() {
        let raw = r#"{"query":{"pages":[
            {"title":"Empty","index":1,"extract":"  "},
            {"title":"Missing","index":2},
            {"title":"France","index":3,"extract":"France is a country."}
        ]}}"#;
        let hits = into_hits(parse(raw), 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "France");
        assert_eq!(hits[0].rank, 0);
    }

    #[test]
    fn no_results_is_empty_not_error() {
        let hits = into_hits(parse(r#"{"batchcomplete":true}"#), 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn top_k_limits_hits() {
        let raw = r#"{"query":{"pages":[
            {"title":"A","index":1,"extract":"a"},
            {"title":"B","index":2,"extract":"b"},
            {"title":"C","index":3,"extract":"c"}
        ]}}"#;
        assert_eq!(into_hits(parse(raw), 2).len(), 2);
    }
}
