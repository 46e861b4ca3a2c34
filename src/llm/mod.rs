//! Chat and embedding model clients

pub mod fallback;
pub mod gemini;
pub mod openai;

pub use fallback::FallbackChatModel;
pub use gemini::GeminiChatModel;
pub use openai::{OpenAiChatModel, OpenAiEmbedder};

use crate::config::{ChatProvider, Settings};
use crate::error::OrchestrationError;
use crate::models::{Message, ToolDefinition};
use crate::Result;
use std::sync::Arc;

/// A chat model that can answer in text or request tool calls.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// One completion over the full transcript. The returned message has
    /// role `assistant`; `tool_calls` is empty for a final answer.
    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Message>;
}

/// Text → fixed-length vector.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Build the reply model from settings, wrapped in the fallback chain.
pub fn chat_model_from_settings(settings: &Settings) -> Result<Arc<dyn ChatModel>> {
    let candidates: Vec<Arc<dyn ChatModel>> = match settings.chat_provider {
        ChatProvider::OpenAi => {
            let key = settings.openai_api_key.clone().ok_or_else(|| {
                OrchestrationError::ConfigError("OPENAI_API_KEY is not set".to_string())
            })?;
            settings
                .model_candidates()
                .into_iter()
                .map(|model| {
                    Arc::new(OpenAiChatModel::new(&settings.openai_base_url, &key, model))
                        as Arc<dyn ChatModel>
                })
                .collect()
        }
        ChatProvider::Gemini => {
            let key = settings.gemini_api_key.clone().ok_or_else(|| {
                OrchestrationError::ConfigError("GEMINI_API_KEY is not set".to_string())
            })?;
            settings
                .model_candidates()
                .into_iter()
                .map(|model| Arc::new(GeminiChatModel::new(&key, model)) as Arc<dyn ChatModel>)
                .collect()
        }
    };

    Ok(Arc::new(FallbackChatModel::new(candidates)?))
}

/// Model used for memory summaries; defaults to the reply chain.
pub fn summary_model_from_settings(
    settings: &Settings,
    reply_model: Arc<dyn ChatModel>,
) -> Arc<dyn ChatModel> {
    let Some(model) = settings.summary_model.clone() else {
        return reply_model;
    };
    match (settings.chat_provider, &settings.openai_api_key, &settings.gemini_api_key) {
        (ChatProvider::OpenAi, Some(key), _) => {
            Arc::new(OpenAiChatModel::new(&settings.openai_base_url, key, model))
        }
        (ChatProvider::Gemini, _, Some(key)) => Arc::new(GeminiChatModel::new(key, model)),
        _ => reply_model,
    }
}

/// Embeddings need an OpenAI-compatible endpoint; `None` disables memory.
pub fn embedder_from_settings(settings: &Settings) -> Option<Arc<dyn Embedder>> {
    settings.openai_api_key.as_ref().map(|key| {
        Arc::new(OpenAiEmbedder::new(
            &settings.openai_base_url,
            key,
            settings.embedding_model.clone(),
            settings.embedding_dimension,
        )) as Arc<dyn Embedder>
    })
}

/// Shared HTTP client builder for the model clients.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
