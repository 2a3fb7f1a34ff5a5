//! `search_web` tool with pluggable search backends.
//!
//! The tool never returns `Err` to the engine. Every failure becomes a single
//! `[search_error] <kind>: <detail>` line the model can read and stop on.

use afina_core::error::ToolError;
use afina_core::tool::{Tool, ToolResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hard ceiling on results per call, whatever the model asks for.
const MAX_RESULTS_CEILING: usize = 10;

/// A single search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Failure categories reported in the sentinel line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    HttpStatus,
    Parse,
    Provider,
    InvalidArguments,
    UnknownTool,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::HttpStatus => "http_status",
            Self::Parse => "parse",
            Self::Provider => "provider",
            Self::InvalidArguments => "invalid_arguments",
            Self::UnknownTool => "unknown_tool",
        }
    }
}

/// Build the one-line error sentinel. Newlines in `detail` are flattened.
pub fn sentinel(kind: FailureKind, detail: &str) -> String {
    let detail = detail.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("[search_error] {}: {detail}", kind.as_str())
}

/// A backend failure.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl SearchFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::new(FailureKind::Parse, e.to_string())
        } else {
            Self::new(FailureKind::Network, e.to_string())
        }
    }

    pub fn to_sentinel(&self) -> String {
        sentinel(self.kind, &self.detail)
    }
}

/// A search service the tool can query.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize)
    -> Result<Vec<SearchHit>, SearchFailure>;
}

/// DuckDuckGo instant-answer API. Needs no key; returns the abstract plus
/// related topics.
pub struct DuckDuckGoBackend {
    client: reqwest::Client,
    region: String,
    endpoint: String,
}

impl DuckDuckGoBackend {
    pub fn new(client: reqwest::Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
            endpoint: "https://api.duckduckgo.com/".into(),
        }
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoBackend {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SearchFailure> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("kl", self.region.as_str()),
            ])
            .send()
            .await
            .map_err(SearchFailure::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchFailure::new(
                FailureKind::HttpStatus,
                format!("duckduckgo returned {}", status.as_u16()),
            ));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchFailure::new(FailureKind::Parse, e.to_string()))?;

        Ok(parse_duckduckgo(&data, max_results))
    }
}

fn parse_duckduckgo(data: &serde_json::Value, max_results: usize) -> Vec<SearchHit> {
    let str_field = |v: &serde_json::Value, key: &str| {
        v.get(key).and_then(|s| s.as_str()).unwrap_or("").trim().to_string()
    };

    let mut hits = Vec::new();

    let abstract_text = str_field(data, "AbstractText");
    if !abstract_text.is_empty() {
        let heading = str_field(data, "Heading");
        hits.push(SearchHit {
            title: if heading.is_empty() { "Result".into() } else { heading },
            url: str_field(data, "AbstractURL"),
            snippet: abstract_text,
        });
    }

    // Topics may be nested one level under category groups
    let topics = data
        .get("RelatedTopics")
        .and_then(|r| r.as_array())
        .into_iter()
        .flatten()
        .flat_map(|t| match t.get("Topics").and_then(|n| n.as_array()) {
            Some(nested) => nested.iter().collect::<Vec<_>>(),
            None => vec![t],
        });

    for topic in topics {
        if hits.len() >= max_results {
            break;
        }
        let text = str_field(topic, "Text");
        if text.is_empty() {
            continue;
        }
        hits.push(SearchHit {
            title: text.chars().take(80).collect(),
            url: str_field(topic, "FirstURL"),
            snippet: text,
        });
    }

    hits.truncate(max_results);
    hits
}

/// Brave Search web API (requires a subscription token).
pub struct BraveBackend {
    client: reqwest::Client,
    api_key: String,
}

impl BraveBackend {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SearchBackend for BraveBackend {
    fn name(&self) -> &str {
        "brave"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SearchFailure> {
        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &max_results.to_string())])
            .send()
            .await
            .map_err(SearchFailure::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchFailure::new(
                FailureKind::HttpStatus,
                format!("brave returned {}: {body}", status.as_u16()),
            ));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchFailure::new(FailureKind::Parse, e.to_string()))?;

        parse_brave(&data, max_results)
    }
}

fn parse_brave(
    data: &serde_json::Value,
    max_results: usize,
) -> Result<Vec<SearchHit>, SearchFailure> {
    if let Some(message) = data.pointer("/error/detail").and_then(|m| m.as_str()) {
        return Err(SearchFailure::new(FailureKind::Provider, message));
    }

    let Some(results) = data.pointer("/web/results").and_then(|r| r.as_array()) else {
        return Ok(Vec::new());
    };

    let field = |v: &serde_json::Value, key: &str| {
        v.get(key).and_then(|s| s.as_str()).unwrap_or("").trim().to_string()
    };

    Ok(results
        .iter()
        .take(max_results)
        .map(|item| SearchHit {
            title: field(item, "title"),
            url: field(item, "url"),
            snippet: field(item, "description"),
        })
        .collect())
}

/// Render hits as `title: snippet -- url` lines.
pub fn format_hits(hits: &[SearchHit], max_results: usize) -> String {
    hits.iter()
        .take(max_results)
        .map(|h| format!("{}: {} -- {}", h.title, h.snippet, h.url))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The `search_web` tool exposed to the assistant.
pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    default_max_results: usize,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>, default_max_results: usize) -> Self {
        Self {
            backend,
            default_max_results,
        }
    }

    fn parse_arguments(&self, arguments: &serde_json::Value) -> Result<(String, usize), String> {
        let query: String = arguments
            .get("query")
            .and_then(|q| q.as_str())
            .ok_or("missing 'query' argument")?
            .chars()
            .filter(|c| !c.is_control())
            .collect();
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err("'query' must not be empty".into());
        }

        let max_results = match arguments.get("max_results") {
            None | Some(serde_json::Value::Null) => self.default_max_results,
            Some(v) => v
                .as_u64()
                .filter(|n| *n > 0)
                .ok_or("'max_results' must be a positive integer")?
                as usize,
        };

        Ok((query, max_results.min(MAX_RESULTS_CEILING)))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web. Returns up to max_results lines formatted as 'title: snippet -- url'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)",
                    "default": self.default_max_results
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let (query, max_results) = match self.parse_arguments(&arguments) {
            Ok(parsed) => parsed,
            Err(detail) => {
                return Ok(ToolResult::failure(sentinel(
                    FailureKind::InvalidArguments,
                    &detail,
                )));
            }
        };

        debug!(backend = self.backend.name(), %query, max_results, "Running web search");

        match self.backend.search(&query, max_results).await {
            Ok(hits) => Ok(ToolResult::success(format_hits(&hits, max_results))),
            Err(failure) => {
                warn!(
                    backend = self.backend.name(),
                    kind = failure.kind.as_str(),
                    detail = %failure.detail,
                    "Web search failed"
                );
                Ok(ToolResult::failure(failure.to_sentinel()))
            }
        }
    }
}
