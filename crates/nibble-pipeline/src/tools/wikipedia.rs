//! Encyclopedic lookup through the Wikipedia page summary API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nibble_agent::tool::{Tool, ToolResult};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::Result;

pub const WIKIPEDIA_SUMMARY_ENDPOINT: &str = "https://en.wikipedia.org/api/rest_v1/page/summary";

/// A free-text encyclopedic lookup service
#[async_trait]
pub trait EncyclopediaSource: Send + Sync {
    /// Summary text for a topic, or a description of why there is none
    async fn summary(&self, query: &str) -> std::result::Result<String, String>;
}

#[derive(Deserialize)]
struct PageSummary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extract: String,
}

pub struct WikipediaClient {
    client: reqwest::Client,
    endpoint: String,
}

impl WikipediaClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nibble/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: WIKIPEDIA_SUMMARY_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Page title path segment for a free-text query
fn title_segment(query: &str) -> String {
    let title = query.trim().split_whitespace().collect::<Vec<_>>().join("_");
    urlencoding::encode(&title).into_owned()
}

#[async_trait]
impl EncyclopediaSource for WikipediaClient {
    async fn summary(&self, query: &str) -> std::result::Result<String, String> {
        let url = format!("{}/{}", self.endpoint, title_segment(query));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status.as_u16(), body));
        }

        let page: PageSummary = response.json().await.map_err(|e| e.to_string())?;
        if page.extract.trim().is_empty() {
            return Err(format!("No summary available for '{}'", query));
        }
        Ok(format!("{}\n\n{}", page.title, page.extract))
    }
}

/// Exposes an [`EncyclopediaSource`] to the follow-up loop
pub struct EncyclopediaTool {
    source: Arc<dyn EncyclopediaSource>,
}

impl EncyclopediaTool {
    pub fn new(source: Arc<dyn EncyclopediaSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for EncyclopediaTool {
    fn name(&self) -> &str {
        "encyclopedia_lookup"
    }

    fn label(&self) -> &str {
        "Encyclopedia"
    }

    fn description(&self) -> &str {
        "Look up a short encyclopedia summary for a food, ingredient or nutrition topic."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Topic to look up, e.g. 'Quinoa'"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value) -> ToolResult {
        let Some(query) = arguments.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing 'query' argument");
        };

        match self.source.summary(query).await {
            Ok(text) => ToolResult::text(text),
            Err(message) => {
                tracing::warn!(query, "encyclopedia lookup failed: {}", message);
                ToolResult::error(message)
            }
        }
    }
}
