//! Nutrition lookup through the Nutritionix natural-language endpoint

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nibble_agent::tool::{Tool, ToolResult};
use serde_json::{Value, json};

use crate::error::Result;

pub const NUTRITIONIX_ENDPOINT: &str = "https://trackapi.nutritionix.com/v2/natural/nutrients";

/// Outcome of one nutrition lookup. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum NutritionOutcome {
    /// JSON body of a successful lookup
    Facts(Value),
    /// Raw error text from the service or the network layer
    Failed { status: Option<u16>, message: String },
}

impl NutritionOutcome {
    /// Payload handed back to the model
    pub fn payload(&self) -> Value {
        match self {
            NutritionOutcome::Facts(body) => body.clone(),
            NutritionOutcome::Failed { message, .. } => json!({ "error": message }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, NutritionOutcome::Failed { .. })
    }
}

/// Interpret a response: HTTP 200 carries facts, anything else is an error
/// payload holding the raw body.
pub fn outcome_from(status: u16, body: &str) -> NutritionOutcome {
    if status != 200 {
        return NutritionOutcome::Failed {
            status: Some(status),
            message: body.to_string(),
        };
    }
    match serde_json::from_str(body) {
        Ok(facts) => NutritionOutcome::Facts(facts),
        Err(e) => NutritionOutcome::Failed {
            status: Some(status),
            message: format!("invalid JSON from nutrition service: {}", e),
        },
    }
}

/// A structured nutrition lookup service
#[async_trait]
pub trait NutritionSource: Send + Sync {
    async fn lookup(&self, query: &str) -> NutritionOutcome;
}

/// Nutritionix API client
pub struct NutritionixClient {
    client: reqwest::Client,
    app_id: String,
    api_key: String,
    endpoint: String,
}

impl NutritionixClient {
    pub fn new(
        app_id: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            app_id: app_id.into(),
            api_key: api_key.into(),
            endpoint: NUTRITIONIX_ENDPOINT.to_string(),
        })
    }

    /// Point the client at a different endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl NutritionSource for NutritionixClient {
    async fn lookup(&self, query: &str) -> NutritionOutcome {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-app-id", &self.app_id)
            .header("x-app-key", &self.api_key)
            .json(&json!({ "query": query }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                return NutritionOutcome::Failed {
                    status: None,
                    message: e.to_string(),
                };
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => outcome_from(status, &body),
            Err(e) => NutritionOutcome::Failed {
                status: Some(status),
                message: e.to_string(),
            },
        }
    }
}

/// Exposes a [`NutritionSource`] to the reasoning loop
pub struct NutritionTool {
    source: Arc<dyn NutritionSource>,
}

impl NutritionTool {
    pub fn new(source: Arc<dyn NutritionSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for NutritionTool {
    fn name(&self) -> &str {
        "nutrition_lookup"
    }

    fn label(&self) -> &str {
        "Nutrition lookup"
    }

    fn description(&self) -> &str {
        "Fetch nutrition facts (calories, protein, serving size) for a food item described in plain \
         English, e.g. '1 medium apple' or '2 slices of whole wheat bread'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Food item with quantity, in natural language"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _tool_call_id: &str, arguments: Value) -> ToolResult {
        let query = match arguments.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => {
                return ToolResult::error(
                    json!({ "error": "Missing 'query' argument" }).to_string(),
                );
            }
        };

        let outcome = self.source.lookup(query).await;
        let payload = outcome.payload().to_string();

        match outcome {
            NutritionOutcome::Facts(_) => ToolResult::text(payload),
            NutritionOutcome::Failed { status, .. } => {
                tracing::warn!(query, ?status, "nutrition lookup failed");
                ToolResult::error(payload).with_details(json!({ "status": status }))
            }
        }
    }
}
