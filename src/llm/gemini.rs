//! Gemini generateContent client with function calling
//!
//! Uses a long-lived reqwest::Client for connection pooling. Gemini has no
//! tool-call ids, so ids are synthesized per call and mapped back to the
//! function name when tool results are sent.

use super::{http_client, ChatModel};
use crate::error::OrchestrationError;
use crate::models::{Message, Role, ToolCall, ToolDefinition};
use crate::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, error};
use uuid::Uuid;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiChatModel {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiChatModel {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self {
            client: http_client(120),
            api_key: api_key.to_string(),
            model: model.into(),
        }
    }
}

/// Build the request body from the transcript.
fn build_request(messages: &[Message], tools: &[ToolDefinition]) -> GeminiRequest {
    let mut system = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    let mut call_names: HashMap<&str, &str> = HashMap::new();

    for message in messages {
        match message.role {
            Role::System => system.push(message.content.clone()),
            Role::User => contents.push(Content {
                role: "user".into(),
                parts: vec![Part::text(&message.content)],
            }),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(Part::text(&message.content));
                }
                for call in &message.tool_calls {
                    call_names.insert(call.id.as_str(), call.name.as_str());
                    parts.push(Part {
                        function_call: Some(FunctionCall {
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                        }),
                        ..Part::default()
                    });
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: "model".into(),
                        parts,
                    });
                }
            }
            Role::Tool => {
                let name = message
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| call_names.get(id).copied())
                    .or(message.name.as_deref())
                    .unwrap_or_default()
                    .to_string();
                let part = Part {
                    function_response: Some(FunctionResponse {
                        name,
                        response: response_object(&message.content),
                    }),
                    ..Part::default()
                };
                // consecutive results answer the same model turn
                match contents.last_mut() {
                    Some(last) if last.role == "user" && last.parts.iter().all(|p| p.function_response.is_some()) => {
                        last.parts.push(part)
                    }
                    _ => contents.push(Content {
                        role: "user".into(),
                        parts: vec![part],
                    }),
                }
            }
        }
    }

    let tools = if tools.is_empty() {
        None
    } else {
        Some(vec![GeminiTools {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: strip_unsupported(&t.parameters),
                })
                .collect(),
        }])
    };

    GeminiRequest {
        contents,
        tools,
        system_instruction: if system.is_empty() {
            None
        } else {
            Some(SystemInstruction {
                parts: vec![Part::text(&system.join("\n\n"))],
            })
        },
        generation_config: GenerationConfig {
            temperature: 0.0,
            max_output_tokens: 2048,
        },
    }
}

/// `functionResponse.response` must be an object.
fn response_object(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => json!({ "result": other }),
        Err(_) => json!({ "result": content }),
    }
}

/// Gemini rejects JSON-schema keywords outside its OpenAPI subset.
fn strip_unsupported(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !matches!(k.as_str(), "default" | "additionalProperties" | "$schema"))
                .map(|(k, v)| (k.clone(), strip_unsupported(v)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_unsupported).collect()),
        other => other.clone(),
    }
}

fn from_response(response: GeminiResponse) -> Result<Message> {
    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        OrchestrationError::ModelUnavailable("No response from Gemini API".to_string())
    })?;

    let mut text = Vec::new();
    let mut calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(t) = part.text {
            text.push(t);
        }
        if let Some(call) = part.function_call {
            calls.push(ToolCall {
                id: format!("call_{}", Uuid::new_v4().simple()),
                name: call.name,
                arguments: call.args,
            });
        }
    }

    Ok(Message::assistant_with_calls(text.join(""), calls))
}

#[async_trait::async_trait]
impl ChatModel for GeminiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Message> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::ConfigError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);
        let request = build_request(messages, tools);

        debug!(model = %self.model, contents = request.contents.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::ModelUnavailable(format!("{}: {}", self.model, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Gemini API error response: {}", error_text);
            if status == StatusCode::NOT_FOUND {
                return Err(OrchestrationError::ModelNotFound(self.model.clone()));
            }
            return Err(OrchestrationError::ModelUnavailable(format!(
                "{} returned {}: {}",
                self.model, status, error_text
            )));
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::ModelUnavailable(format!("Gemini parse error: {}", e))
        })?;

        from_response(parsed)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTools>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTools {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}
