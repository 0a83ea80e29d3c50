use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::context::RpcContext;
use crate::error::RpcError;

/// What a handler produces: either a single response, or zero or more
/// stream messages followed by a final response (§4.J).
pub enum RpcOutcome {
    Response(Value),
    Stream { items: Vec<Value>, response: Value },
}

/// One registered RPC method. Handlers receive the decoded JSON payload and
/// a [`RpcContext`] scoping them to the requesting document.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError>;
}

/// `methodName -> handler` table (§4.J). Methods not present here fall
/// through to the wire table's default "allow" with no handler — callers
/// should treat a lookup miss as [`RpcError::UnknownMethod`].
#[derive(Default)]
pub struct MethodRegistry {
    handlers: DashMap<String, Arc<dyn RpcHandler>>,
}

impl MethodRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.handlers.insert(method.into(), handler);
    }

    #[must_use]
    pub fn get(&self, method: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.get(method).map(|h| Arc::clone(h.value()))
    }

    pub async fn dispatch(
        &self,
        method: &str,
        ctx: &RpcContext,
        payload: Value,
    ) -> Result<RpcOutcome, RpcError> {
        let handler = self
            .get(method)
            .ok_or_else(|| RpcError::UnknownMethod(method.to_owned()))?;
        handler.handle(ctx, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teleportal_primitives::DocumentId;
    use teleportal_storage::{InMemoryUnencryptedStorage, LogEngine};

    struct Echo;

    #[async_trait]
    impl RpcHandler for Echo {
        async fn handle(&self, _ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError> {
            Ok(RpcOutcome::Response(payload))
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_the_registered_handler() {
        let registry = MethodRegistry::new();
        registry.register("echo", Arc::new(Echo));

        let ctx = RpcContext::new(
            DocumentId::new("doc-1"),
            Arc::new(InMemoryUnencryptedStorage::new(LogEngine)),
        );
        let outcome = registry
            .dispatch("echo", &ctx, serde_json::json!({"a": 1}))
            .await
            .unwrap();
        match outcome {
            RpcOutcome::Response(v) => assert_eq!(v, serde_json::json!({"a": 1})),
            RpcOutcome::Stream { .. } => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_an_error() {
        let registry = MethodRegistry::new();
        let ctx = RpcContext::new(
            DocumentId::new("doc-1"),
            Arc::new(InMemoryUnencryptedStorage::new(LogEngine)),
        );
        let err = registry
            .dispatch("nope", &ctx, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::UnknownMethod(_)));
    }
}
