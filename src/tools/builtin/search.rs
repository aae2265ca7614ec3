//! `WebSearch` and its pluggable backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SearchSettings;
use crate::error::{ConductorError, Result};
use crate::provider::http::{retry_after_header, shared_client, status_to_error};
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;
use crate::types::PermissionLevel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// Anything that can answer a web query.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// HTTP backend speaking the Brave Search JSON shape.
#[derive(Debug, Clone)]
pub struct BraveSearch {
    endpoint: String,
    api_key: Option<String>,
}

impl BraveSearch {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self::new(settings.endpoint.clone(), settings.api_key.clone())
    }
}

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

#[async_trait]
impl SearchBackend for BraveSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let Some(key) = &self.api_key else {
            return Err(ConductorError::Configuration(
                "web search needs BRAVE_API_KEY or [search].api_key".into(),
            ));
        };
        let count = max_results.to_string();
        let response = shared_client()
            .get(&self.endpoint)
            .query(&[("q", query), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(status_to_error(status.as_u16(), &body, retry_after));
        }

        let parsed: BraveResponse = response.json().await?;
        Ok(parsed
            .web
            .map(|web| web.results)
            .unwrap_or_default()
            .into_iter()
            .take(max_results)
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.description,
            })
            .collect())
    }
}

/// Create the `WebSearch` tool over `backend`.
pub fn web_search_tool(backend: Arc<dyn SearchBackend>, default_max_results: usize) -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "WebSearch",
            "Search the web. Returns a numbered list of titles, URLs and snippets.",
            AgentToolParameters::object()
                .string("query", "Search query", true)
                .integer("max_results", "Maximum results to return", false)
                .build(),
            move |args, _ctx: ToolExecutionContext| {
                let backend = backend.clone();
                async move {
                    let query = args.get_str("query")?;
                    if query.trim().is_empty() {
                        return Err(ConductorError::InvalidArgument("query must not be empty".into()));
                    }
                    let max = args
                        .get_u64_opt("max_results")
                        .map_or(default_max_results, |n| n as usize)
                        .clamp(1, 20);
                    let hits = backend
                        .search(query, max)
                        .await
                        .map_err(|e| ConductorError::tool("WebSearch", e.to_string()))?;
                    Ok(Value::String(format_hits(query, &hits)))
                }
            },
        )
        .with_permission_level(PermissionLevel::Auto),
    )
}

fn format_hits(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results for \"{query}\"");
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            if hit.snippet.is_empty() {
                format!("{}. {}\n   {}", i + 1, hit.title, hit.url)
            } else {
                format!("{}. {}\n   {}\n   {}", i + 1, hit.title, hit.url, hit.snippet)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
