//! Test doubles for the model collaborators

use crate::error::OrchestrationError;
use crate::llm::{ChatModel, Embedder};
use crate::models::{Message, ToolCall, ToolDefinition};
use crate::Result;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Chat model that replays a fixed script and records every prompt.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Message>>>,
    /// Replayed once the script runs out.
    repeat: Option<Message>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Message>) -> Arc<Self> {
        Self::with_outcomes(replies.into_iter().map(Ok).collect())
    }

    pub fn with_outcomes(outcomes: Vec<Result<Message>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            repeat: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answers every call with `reply`.
    pub fn always(reply: Message) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(reply),
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(reply: Message, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::from(vec![Ok(reply)])),
            repeat: None,
            delay: Some(delay),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub async fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[Message], _tools: &[ToolDefinition]) -> Result<Message> {
        self.calls.lock().await.push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => self.repeat.clone().ok_or_else(|| {
                OrchestrationError::ModelUnavailable("script exhausted".to_string())
            }),
        }
    }
}

/// Assistant message requesting the given `(id, tool, arguments)` calls.
pub fn tool_calls(calls: &[(&str, &str, Value)]) -> Message {
    Message::assistant_with_calls(
        "",
        calls
            .iter()
            .map(|(id, name, arguments)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.clone(),
            })
            .collect(),
    )
}

/// Bag-of-words embedder: texts sharing words land close together.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self { dimension })
    }
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() as usize) % self.dimension] += 1.0;
        }
        Ok(vector)
    }
}

/// Embedder whose backend is always down.
pub struct FailingEmbedder;

#[async_trait::async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(OrchestrationError::MemoryError("embedding backend down".to_string()))
    }
}
