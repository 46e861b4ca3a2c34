//! OpenAI-compatible chat completions and embeddings

use super::{http_client, ChatModel, Embedder};
use crate::error::OrchestrationError;
use crate::models::{Message, ToolCall, ToolDefinition};
use crate::Result;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(base_url: &str, api_key: &str, model: impl Into<String>) -> Self {
        Self {
            client: http_client(120),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.into(),
        }
    }
}

fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: m.role.to_string(),
            content: Some(m.content.clone()),
            tool_calls: if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: tc.arguments.to_string(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: m.tool_call_id.clone(),
        })
        .collect()
}

fn to_api_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

/// Arguments arrive as a JSON string; keep the raw text if it does not parse.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn from_api_message(message: ApiMessage) -> Message {
    let calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: parse_arguments(&tc.function.arguments),
        })
        .collect();

    Message::assistant_with_calls(message.content.unwrap_or_default(), calls)
}

/// Map an error status to the crate error, flagging unknown models.
fn status_error(model: &str, status: StatusCode, body: &str) -> OrchestrationError {
    if status == StatusCode::NOT_FOUND || body.contains("model_not_found") {
        OrchestrationError::ModelNotFound(model.to_string())
    } else {
        OrchestrationError::ModelUnavailable(format!("{} returned {}: {}", model, status, body))
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Message> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": self.model,
            "messages": to_api_messages(messages),
            "temperature": 0,
        });
        if !tools.is_empty() {
            body["tools"] = json!(to_api_tools(tools));
        }

        debug!(model = %self.model, messages = messages.len(), "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completion request failed: {}", e);
                OrchestrationError::ModelUnavailable(format!("{}: {}", self.model, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, "Chat completion error response: {}", error_text);
            return Err(status_error(&self.model, status, &error_text));
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| {
            OrchestrationError::ModelUnavailable(format!("Failed to parse completion: {}", e))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            OrchestrationError::ModelUnavailable("No choices in completion".to_string())
        })?;

        Ok(from_api_message(choice.message))
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: http_client(60),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": text,
            "encoding_format": "float",
        });

        debug!(model = %self.model, chars = text.len(), "Sending embedding request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::MemoryError(format!(
                "Embedding request returned {}: {}",
                status, error_text
            )));
        }

        let parsed: EmbeddingApiResponse = response.json().await?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| OrchestrationError::MemoryError("Empty embedding response".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(OrchestrationError::MemoryError(format!(
                "Embedding has {} dimensions, expected {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(embedding)
    }
}

// ===== Wire types =====

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
