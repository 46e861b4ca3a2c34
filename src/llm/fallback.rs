//! Ordered model fallback
//!
//! Tries candidates in order. A candidate that reports the model as not
//! found is skipped and never tried again for the life of the chain; any
//! other failure is returned to the caller unchanged.

use super::ChatModel;
use crate::error::OrchestrationError;
use crate::models::{Message, ToolDefinition};
use crate::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub struct FallbackChatModel {
    candidates: Vec<Arc<dyn ChatModel>>,
    active: AtomicUsize,
}

impl FallbackChatModel {
    pub fn new(candidates: Vec<Arc<dyn ChatModel>>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(OrchestrationError::ConfigError(
                "at least one chat model is required".to_string(),
            ));
        }
        Ok(Self {
            candidates,
            active: AtomicUsize::new(0),
        })
    }

    fn active_model(&self) -> Option<&Arc<dyn ChatModel>> {
        self.candidates.get(self.active.load(Ordering::Acquire))
    }
}

#[async_trait::async_trait]
impl ChatModel for FallbackChatModel {
    fn model_name(&self) -> &str {
        self.active_model().map(|m| m.model_name()).unwrap_or("none")
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Message> {
        let total = self.candidates.len();
        let mut index = self.active.load(Ordering::Acquire);

        while let Some(model) = self.candidates.get(index) {
            match model.complete(messages, tools).await {
                Err(OrchestrationError::ModelNotFound(name)) => {
                    warn!(model = %name, attempt = index + 1, total, "Model not found, moving to next candidate");
                    index += 1;
                    // only ever move forward, even if another task raced us
                    self.active.fetch_max(index, Ordering::AcqRel);
                    if let Some(next) = self.candidates.get(index) {
                        info!(model = next.model_name(), "Fallback: trying model");
                    }
                }
                other => return other,
            }
        }

        Err(OrchestrationError::ModelUnavailable(
            "no configured chat model is available".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubModel {
        name: String,
        outcome: fn(&str) -> Result<Message>,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn new(name: &str, outcome: fn(&str) -> Result<Message>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for StubModel {
        fn model_name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, _: &[Message], _: &[ToolDefinition]) -> Result<Message> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)(&self.name)
        }
    }

    fn missing(name: &str) -> Result<Message> {
        Err(OrchestrationError::ModelNotFound(name.to_string()))
    }

    fn answers(name: &str) -> Result<Message> {
        Ok(Message::assistant(format!("hello from {}", name)))
    }

    fn down(_: &str) -> Result<Message> {
        Err(OrchestrationError::ModelUnavailable("timeout".to_string()))
    }

    #[tokio::test]
    async fn test_skips_missing_models_and_remembers() {
        let first = StubModel::new("retired", missing);
        let second = StubModel::new("current", answers);
        let chain = FallbackChatModel::new(vec![
            first.clone() as Arc<dyn ChatModel>,
            second.clone(),
        ])
        .unwrap();

        let reply = chain.complete(&[Message::user("hi")], &[]).await.unwrap();
        assert_eq!(reply.content, "hello from current");

        chain.complete(&[Message::user("again")], &[]).await.unwrap();
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 2);
        assert_eq!(chain.model_name(), "current");
    }

    #[tokio::test]
    async fn test_other_failures_do_not_advance() {
        let first = StubModel::new("flaky", down);
        let second = StubModel::new("backup", answers);
        let chain = FallbackChatModel::new(vec![first as Arc<dyn ChatModel>, second.clone()]).unwrap();

        let err = chain.complete(&[Message::user("hi")], &[]).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::ModelUnavailable(_)));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exhausted_chain_is_unavailable() {
        let chain = FallbackChatModel::new(vec![
            StubModel::new("a", missing) as Arc<dyn ChatModel>,
            StubModel::new("b", missing),
        ])
        .unwrap();

        let err = tokio_test::assert_err!(tokio_test::block_on(
            chain.complete(&[Message::user("hi")], &[])
        ));
        assert!(matches!(err, OrchestrationError::ModelUnavailable(_)));
        assert!(FallbackChatModel::new(Vec::new()).is_err());
    }
}
