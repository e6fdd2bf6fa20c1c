use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::core::config::settings::SearchSettings;
use crate::core::errors::RagError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait WebSearcher: Send + Sync {
    /// Pages relevant to `query`, best first.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, RagError>;
}

/// Searcher backed by the configured web search API.
#[derive(Clone)]
pub struct ProviderSearcher {
    client: Client,
    settings: SearchSettings,
}

impl ProviderSearcher {
    pub fn new(client: Client, settings: SearchSettings) -> Self {
        Self { client, settings }
    }

    async fn search_with_provider(&self, query: &str) -> Result<Vec<SearchResult>, RagError> {
        let settings = &self.settings;

        match settings.provider.as_str() {
            "serpapi" => {
                if let Some(api_key) = non_empty(&settings.serpapi_api_key) {
                    return self.serpapi_search(query, api_key).await;
                }
                tracing::warn!("SerpAPI selected but no API key configured");
            }
            "brave" => {
                if let Some(api_key) = non_empty(&settings.brave_api_key) {
                    return self.brave_search(query, api_key).await;
                }
            }
            "bing" => {
                if let Some(api_key) = non_empty(&settings.bing_api_key) {
                    return self.bing_search(query, api_key).await;
                }
            }
            "google" => {
                if let (Some(api_key), Some(engine_id)) = (
                    non_empty(&settings.google_api_key),
                    non_empty(&settings.google_engine_id),
                ) {
                    return self.google_search(query, api_key, engine_id).await;
                }
            }
            _ => {}
        }

        Ok(Vec::new())
    }

    async fn get_json(
        &self,
        request: reqwest::RequestBuilder,
        provider: &str,
    ) -> Result<Value, RagError> {
        let response = request
            .timeout(Duration::from_secs(self.settings.timeout_secs))
            .send()
            .await
            .map_err(RagError::upstream)?;

        if !response.status().is_success() {
            return Err(RagError::Upstream(format!(
                "{} search failed: {}",
                provider,
                response.status()
            )));
        }

        response.json().await.map_err(RagError::upstream)
    }

    async fn serpapi_search(
        &self,
        query: &str,
        api_key: &str,
    ) -> Result<Vec<SearchResult>, RagError> {
        let settings = &self.settings;
        let request = self.client.get("https://serpapi.com/search.json").query(&[
            ("q", query),
            ("location", settings.location.as_str()),
            ("hl", settings.hl.as_str()),
            ("gl", settings.gl.as_str()),
            ("google_domain", settings.google_domain.as_str()),
            ("api_key", api_key),
        ]);

        let payload = self.get_json(request, "SerpAPI").await?;
        if let Some(error) = payload.get("error").and_then(|v| v.as_str()) {
            return Err(RagError::Upstream(format!("SerpAPI error: {}", error)));
        }
        Ok(parse_serpapi(&payload))
    }

    async fn google_search(
        &self,
        query: &str,
        api_key: &str,
        engine_id: &str,
    ) -> Result<Vec<SearchResult>, RagError> {
        let url = format!(
            "https://www.googleapis.com/customsearch/v1?key={}&cx={}&q={}",
            api_key,
            engine_id,
            urlencoding::encode(query)
        );
        let payload = self.get_json(self.client.get(url), "Google").await?;
        Ok(parse_google(&payload))
    }

    async fn brave_search(
        &self,
        query: &str,
        api_key: &str,
    ) -> Result<Vec<SearchResult>, RagError> {
        let url = format!(
            "https://api.search.brave.com/res/v1/web/search?q={}",
            urlencoding::encode(query)
        );
        let request = self
            .client
            .get(url)
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json");
        let payload = self.get_json(request, "Brave").await?;
        Ok(parse_brave(&payload))
    }

    async fn bing_search(&self, query: &str, api_key: &str) -> Result<Vec<SearchResult>, RagError> {
        let url = format!(
            "https://api.bing.microsoft.com/v7.0/search?q={}",
            urlencoding::encode(query)
        );
        let request = self
            .client
            .get(url)
            .header("Ocp-Apim-Subscription-Key", api_key);
        let payload = self.get_json(request, "Bing").await?;
        Ok(parse_bing(&payload))
    }

    async fn duckduckgo_search(&self, query: &str) -> Result<Vec<SearchResult>, RagError> {
        let url = format!(
            "https://api.duckduckgo.com/?q={}&format=json&no_redirect=1&no_html=1",
            urlencoding::encode(query)
        );
        let payload = self.get_json(self.client.get(url), "DuckDuckGo").await?;
        Ok(parse_duckduckgo(&payload))
    }
}

#[async_trait]
impl WebSearcher for ProviderSearcher {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, RagError> {
        let primary = match self.search_with_provider(query).await {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(
                    "{} search failed, falling back to DuckDuckGo: {}",
                    self.settings.provider,
                    err
                );
                Vec::new()
            }
        };

        let results = if primary.is_empty() {
            self.duckduckgo_search(query).await?
        } else {
            primary
        };

        let results = dedupe_and_limit(results, self.settings.max_results);
        tracing::info!("Search for {:?} returned {} pages", query, results.len());
        Ok(results)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Drops repeated URLs, keeps first-seen order, caps at `max_results`.
pub fn dedupe_and_limit(results: Vec<SearchResult>, max_results: usize) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(result.url.clone()))
        .take(max_results)
        .collect()
}

fn parse_serpapi(payload: &Value) -> Vec<SearchResult> {
    let mut results = Vec::new();
    if let Some(items) = payload.get("organic_results").and_then(|v| v.as_array()) {
        for item in items {
            let url = item.get("link").and_then(|v| v.as_str()).unwrap_or("");
            if url.is_empty() {
                continue;
            }
            let title = item.get("title").and_then(|v| v.as_str()).unwrap_or(url);
            let snippet = item.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
            results.push(SearchResult {
                title: title.to_string(),
                url: url.to_string(),
                snippet: snippet.to_string(),
            });
        }
    }
    results
}

fn parse_google(payload: &Value) -> Vec<SearchResult> {
    let items = payload
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut results = Vec::new();
    for item in items {
        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("");
        let url = item.get("link").and_then(|v| v.as_str()).unwrap_or("");
        let snippet = item.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
        if !title.is_empty() && !url.is_empty() {
            results.push(SearchResult {
                title: title.to_string(),
                url: url.to_string(),
                snippet: snippet.to_string(),
            });
        }
    }
    results
}

fn parse_brave(payload: &Value) -> Vec<SearchResult> {
    let mut results = Vec::new();
    if let Some(items) = payload
        .get("web")
        .and_then(|w| w.get("results"))
        .and_then(|v| v.as_array())
    {
        for item in items {
            let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("");
            let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let snippet = item
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("");

            if !title.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    title: title.to_string(),
                    url: url.to_string(),
                    snippet: snippet.to_string(),
                });
            }
        }
    }
    results
}

fn parse_bing(payload: &Value) -> Vec<SearchResult> {
    let mut results = Vec::new();
    if let Some(items) = payload
        .get("webPages")
        .and_then(|wp| wp.get("value"))
        .and_then(|v| v.as_array())
    {
        for item in items {
            let title = item.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let snippet = item.get("snippet").and_then(|v| v.as_str()).unwrap_or("");

            if !title.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    title: title.to_string(),
                    url: url.to_string(),
                    snippet: snippet.to_string(),
                });
            }
        }
    }
    results
}

fn parse_duckduckgo(payload: &Value) -> Vec<SearchResult> {
    let mut results = Vec::new();

    if let Some(abstract_text) = payload.get("AbstractText").and_then(|v| v.as_str()) {
        if let Some(url) = payload.get("AbstractURL").and_then(|v| v.as_str()) {
            if !abstract_text.is_empty() && !url.is_empty() {
                results.push(SearchResult {
                    title: abstract_text
                        .split(" - ")
                        .next()
                        .unwrap_or(abstract_text)
                        .to_string(),
                    url: url.to_string(),
                    snippet: abstract_text.to_string(),
                });
            }
        }
    }

    if let Some(items) = payload.get("Results").and_then(|v| v.as_array()) {
        extract_ddg_topics(items, &mut results);
    }
    if let Some(items) = payload.get("RelatedTopics").and_then(|v| v.as_array()) {
        extract_ddg_topics(items, &mut results);
    }

    results
}

fn extract_ddg_topics(items: &[Value], results: &mut Vec<SearchResult>) {
    for item in items {
        if let Some(topics) = item.get("Topics").and_then(|v| v.as_array()) {
            extract_ddg_topics(topics, results);
            continue;
        }
        let text = item.get("Text").and_then(|v| v.as_str()).unwrap_or("");
        let url = item.get("FirstURL").and_then(|v| v.as_str()).unwrap_or("");
        if text.is_empty() || url.is_empty() {
            continue;
        }
        results.push(SearchResult {
            title: text.split(" - ").next().unwrap_or(text).to_string(),
            url: url.to_string(),
            snippet: text.to_string(),
        });
    }
}
