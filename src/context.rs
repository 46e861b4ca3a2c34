//! Per-turn context carrier
//!
//! A `TurnContext` binds the acting user and the record handle for exactly
//! one chat turn. Tools receive it as an argument; the orchestrator also
//! binds it task-locally for the duration of the turn so nested helpers can
//! reach it without threading it through every call. The binding ends when
//! the scoped future completes, on every exit path including panics.

use crate::error::OrchestrationError;
use crate::records::RecordAccess;
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_TURN: TurnContext;
}

#[derive(Clone)]
pub struct TurnContext {
    pub turn_id: Uuid,
    pub user_id: Uuid,
    pub records: Arc<RecordAccess>,
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("turn_id", &self.turn_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl TurnContext {
    /// Fails when either the user or the record handle is missing.
    pub fn new(user_id: Option<Uuid>, records: Option<Arc<RecordAccess>>) -> Result<Self> {
        let user_id = user_id.ok_or_else(|| {
            OrchestrationError::ContextUnavailable("no user bound to this turn".to_string())
        })?;
        let records = records.ok_or_else(|| {
            OrchestrationError::ContextUnavailable("no record store bound to this turn".to_string())
        })?;

        Ok(Self {
            turn_id: Uuid::new_v4(),
            user_id,
            records,
        })
    }

    /// Run `fut` with this context bound as the current turn.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_TURN.scope(self, fut).await
    }

    /// The context bound to the running task.
    pub fn current() -> Result<Self> {
        CURRENT_TURN.try_with(|ctx| ctx.clone()).map_err(|_| {
            OrchestrationError::ContextUnavailable(
                "Database context is unavailable for tool execution.".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InMemoryRecordStore;
    use crate::registry::TableRegistry;

    fn records() -> Arc<RecordAccess> {
        let registry = Arc::new(TableRegistry::standard().unwrap());
        Arc::new(RecordAccess::new(registry, Arc::new(InMemoryRecordStore::new())))
    }

    #[test]
    fn test_missing_user_or_store_is_rejected() {
        let err = TurnContext::new(None, Some(records())).unwrap_err();
        assert!(matches!(err, OrchestrationError::ContextUnavailable(_)));

        let err = TurnContext::new(Some(Uuid::new_v4()), None).unwrap_err();
        assert!(matches!(err, OrchestrationError::ContextUnavailable(_)));
    }

    #[tokio::test]
    async fn test_binding_is_scoped_to_the_turn() {
        assert!(TurnContext::current().is_err());

        let user = Uuid::new_v4();
        let ctx = TurnContext::new(Some(user), Some(records())).unwrap();
        let seen = ctx
            .scope(async { TurnContext::current().map(|c| c.user_id) })
            .await
            .unwrap();

        assert_eq!(seen, user);
        assert!(TurnContext::current().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_turns_are_isolated() {
        let store = records();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let run = |user: Uuid| {
            let ctx = TurnContext::new(Some(user), Some(store.clone())).unwrap();
            tokio::spawn(ctx.scope(async move {
                tokio::task::yield_now().await;
                TurnContext::current().map(|c| c.user_id).unwrap()
            }))
        };

        let (seen_a, seen_b) = tokio::join!(run(a), run(b));
        assert_eq!(seen_a.unwrap(), a);
        assert_eq!(seen_b.unwrap(), b);
    }
}
