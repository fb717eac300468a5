//! Google Generative AI (Gemini) API provider

use crate::{
    error::{Error, Result},
    providers::{LlmProvider, get_api_key},
    stream::{MessageEvent, MessageEventStream},
    types::{AssistantMetadata, Content, Context, Message, Model, StopReason, StreamOptions, Usage},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

/// Environment variables checked for the Gemini API key, in order.
pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Google Generative AI client
pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleProvider {
    /// Create a new Google provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_key)
    }

    /// Create a provider that reuses an existing HTTP client
    pub fn with_client(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(get_api_key(None, API_KEY_ENV_VARS)?))
    }

    fn build_request(&self, context: &Context, options: &StreamOptions) -> GeminiRequest {
        let contents = context.messages.iter().filter_map(convert_message).collect();

        let system_instruction = context.system_prompt.as_ref().map(|prompt| GeminiContent {
            role: None,
            parts: vec![GeminiPart::Text {
                text: prompt.clone(),
            }],
        });

        let tools = if context.tools.is_empty() {
            None
        } else {
            let function_declarations = context
                .tools
                .iter()
                .map(|t| GeminiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Some(t.parameters.clone()),
                })
                .collect();
            Some(vec![GeminiTool {
                function_declarations,
            }])
        };

        GeminiRequest {
            contents,
            system_instruction,
            tools,
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: options.max_tokens,
                temperature: options.temperature,
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        let request = self.build_request(context, options);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            model.base_url, model.id
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-goog-api-key"),
            HeaderValue::from_str(&self.api_key).map_err(|_| Error::InvalidApiKey)?,
        );

        // Add model-specific headers
        for (key, value) in &model.headers {
            if let (Ok(name), Ok(val)) = (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                headers.insert(name, val);
            }
        }

        tracing::debug!(
            model = %model.id,
            messages = context.messages.len(),
            tools = context.tools.len(),
            "Opening Gemini stream"
        );

        let request_builder = self.client.post(&url).headers(headers).json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

fn convert_message(msg: &Message) -> Option<GeminiContent> {
    match msg {
        Message::User { content, .. } => {
            let parts: Vec<GeminiPart> = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } => Some(GeminiPart::Text { text: text.clone() }),
                    Content::Image { mime_type, data } => Some(GeminiPart::InlineData {
                        inline_data: GeminiBlob {
                            mime_type: mime_type.clone(),
                            data: data.clone(),
                        },
                    }),
                    Content::ToolCall { .. } => None,
                })
                .collect();

            if parts.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: Some("user".to_string()),
                    parts,
                })
            }
        }
        Message::Assistant { content, .. } => {
            let parts: Vec<GeminiPart> = content
                .iter()
                .filter_map(|c| match c {
                    Content::Text { text } if !text.is_empty() => {
                        Some(GeminiPart::Text { text: text.clone() })
                    }
                    // Gemini matches responses to calls by name, not id
                    Content::ToolCall {
                        name, arguments, ..
                    } => Some(GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: name.clone(),
                            args: arguments.clone(),
                        },
                    }),
                    _ => None,
                })
                .collect();

            if parts.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: Some("model".to_string()),
                    parts,
                })
            }
        }
        Message::ToolResult {
            tool_name,
            content,
            is_error,
            ..
        } => {
            let response_text = content
                .iter()
                .filter_map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("");

            let response = if *is_error {
                serde_json::json!({ "error": response_text })
            } else {
                serde_json::json!({ "result": response_text })
            };

            Some(GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: tool_name.clone(),
                        response,
                    },
                }],
            })
        }
    }
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut tool_calls: Vec<(String, String, serde_json::Value)> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        yield MessageEvent::Start {
            message: Message::Assistant {
                content: vec![],
                metadata: AssistantMetadata {
                    model: Some(model.id.clone()),
                    ..Default::default()
                },
            },
        };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data.is_empty() || msg.data == "[DONE]" {
                        continue;
                    }

                    let response = match serde_json::from_str::<GeminiStreamResponse>(&msg.data) {
                        Ok(response) => response,
                        Err(e) => {
                            let message = serde_json::from_str::<GeminiErrorResponse>(&msg.data)
                                .map(|r| r.error.message)
                                .unwrap_or_else(|_| format!("Failed to parse chunk: {}", e));
                            event_source.close();
                            yield MessageEvent::Error { message };
                            return;
                        }
                    };

                    for candidate in &response.candidates {
                        if let Some(ref content) = candidate.content {
                            for part in &content.parts {
                                match part {
                                    GeminiResponsePart::Text { text } => {
                                        accumulated_text.push_str(text);
                                        yield MessageEvent::TextDelta {
                                            content_index: 0,
                                            delta: text.clone(),
                                        };
                                    }
                                    GeminiResponsePart::FunctionCall { function_call } => {
                                        // Gemini does not assign call ids
                                        let index = tool_calls.len() + 1;
                                        let id = format!("call_{}", tool_calls.len());
                                        yield MessageEvent::ToolCallStart {
                                            content_index: index,
                                            id: id.clone(),
                                            name: function_call.name.clone(),
                                        };
                                        yield MessageEvent::ToolCallDelta {
                                            content_index: index,
                                            delta: function_call.args.to_string(),
                                        };
                                        tool_calls.push((
                                            id,
                                            function_call.name.clone(),
                                            function_call.args.clone(),
                                        ));
                                    }
                                    GeminiResponsePart::Other(_) => {}
                                }
                            }
                        }

                        if let Some(ref reason) = candidate.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref meta) = response.usage_metadata {
                        usage.input = meta.prompt_token_count.unwrap_or(0);
                        usage.output = meta.candidates_token_count.unwrap_or(0);
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    let message = serde_json::from_str::<GeminiErrorResponse>(&body)
                        .map(|r| r.error.message)
                        .unwrap_or(body);
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("HTTP {}: {}", status.as_u16(), message),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            content.push(Content::Text {
                text: accumulated_text,
            });
        }
        let has_tool_calls = !tool_calls.is_empty();
        for (id, name, arguments) in tool_calls {
            content.push(Content::ToolCall {
                id,
                name,
                arguments,
            });
        }

        let stop_reason = map_finish_reason(finish_reason.as_deref(), has_tool_calls);

        yield MessageEvent::Done {
            message: Message::Assistant {
                content,
                metadata: AssistantMetadata {
                    model: Some(model.id.clone()),
                    usage: usage.clone(),
                    stop_reason: Some(stop_reason),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            },
            stop_reason,
            usage,
        };
    }
}

fn map_finish_reason(reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        return StopReason::ToolUse;
    }
    match reason {
        Some("MAX_TOKENS") => StopReason::Length,
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => StopReason::Safety,
        Some("MALFORMED_FUNCTION_CALL") => StopReason::Error,
        _ => StopReason::Stop,
    }
}

// Request types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiResponsePart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiResponseFunctionCall,
    },
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct GeminiResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tool;

    fn request_json(context: &Context) -> serde_json::Value {
        let provider = GoogleProvider::new("test-key");
        let request = provider.build_request(context, &StreamOptions::default());
        serde_json::to_value(&request).unwrap()
    }

    #[test]
    fn test_image_is_sent_as_inline_data() {
        let context = Context {
            system_prompt: Some("identify food".into()),
            messages: vec![Message::user_with_content(vec![
                Content::image("AAAA", "image/jpeg"),
                Content::text("List the food items"),
            ])],
            tools: vec![],
        };

        let json = request_json(&context);
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inlineData"]["data"], "AAAA");
        assert_eq!(parts[1]["text"], "List the food items");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "identify food");
    }

    #[test]
    fn test_tool_round_trip_shapes() {
        let context = Context {
            system_prompt: None,
            messages: vec![
                Message::user("1 apple"),
                Message::Assistant {
                    content: vec![Content::tool_call(
                        "call_0",
                        "nutritionix_lookup",
                        serde_json::json!({"query": "1 apple"}),
                    )],
                    metadata: AssistantMetadata::default(),
                },
                Message::tool_result(
                    "call_0",
                    "nutritionix_lookup",
                    vec![Content::text("upstream failure")],
                    true,
                ),
            ],
            tools: vec![Tool::new(
                "nutritionix_lookup",
                "Look up nutrition facts",
                serde_json::json!({"type": "object"}),
            )],
        };

        let json = request_json(&context);
        assert_eq!(
            json["tools"][0]["functionDeclarations"][0]["name"],
            "nutritionix_lookup"
        );
        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["args"]["query"], "1 apple");
        assert_eq!(contents[2]["parts"][0]["functionResponse"]["name"], "nutritionix_lookup");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["error"],
            "upstream failure"
        );
    }

    #[test]
    fn test_empty_messages_are_skipped() {
        let context = Context {
            messages: vec![Message::user_with_content(vec![]), Message::user("hello")],
            ..Default::default()
        };
        let json = request_json(&context);
        assert_eq!(json["contents"].as_array().unwrap().len(), 1);
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_response_parts_parse() {
        let data = r#"{
            "candidates": [{
                "content": {"parts": [
                    {"text": "Food Items:\n- apple"},
                    {"functionCall": {"name": "nutritionix_lookup", "args": {"query": "apple"}}},
                    {"thought": true, "thoughtSignature": "abc"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 7}
        }"#;
        let response: GeminiStreamResponse = serde_json::from_str(data).unwrap();
        let parts = &response.candidates[0].content.as_ref().unwrap().parts;
        assert!(matches!(parts[0], GeminiResponsePart::Text { .. }));
        assert!(matches!(parts[1], GeminiResponsePart::FunctionCall { .. }));
        assert!(matches!(parts[2], GeminiResponsePart::Other(_)));
        assert_eq!(
            response.usage_metadata.unwrap().prompt_token_count,
            Some(12)
        );
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("STOP"), false), StopReason::Stop);
        assert_eq!(map_finish_reason(Some("STOP"), true), StopReason::ToolUse);
        assert_eq!(map_finish_reason(Some("MAX_TOKENS"), false), StopReason::Length);
        assert_eq!(map_finish_reason(Some("SAFETY"), false), StopReason::Safety);
        assert_eq!(map_finish_reason(None, false), StopReason::Stop);
    }
}
