// Broker Registry
// One broker per action type, resolved once at registration into a uniform
// execute-untyped-payload handler. Dispatch at message time is a map
// lookup, nothing more.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use common::ActionPayload;

/// Pluggable executor for one action type. `execute` suspends until the
/// action has settled against the outside world.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Action: ActionPayload;

    async fn execute(&self, action: Self::Action) -> anyhow::Result<()>;
}

/// Type-erased execution handler stored in the registry.
#[async_trait]
pub(crate) trait ErasedBroker: Send + Sync {
    async fn execute(&self, payload: serde_json::Value) -> anyhow::Result<()>;
}

struct TypedBroker<B>(B);

#[async_trait]
impl<B: Broker> ErasedBroker for TypedBroker<B> {
    async fn execute(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let action: B::Action = serde_json::from_value(payload)?;
        self.0.execute(action).await
    }
}

/// Capability set of one broker group: action type tag -> handler.
#[derive(Default)]
pub struct BrokerRegistry {
    handlers: HashMap<String, Arc<dyn ErasedBroker>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `broker` for its action type. A second registration for the
    /// same type replaces the first.
    pub fn register<B: Broker>(mut self, broker: B) -> Self {
        let tag = B::Action::ACTION_TYPE;
        if self
            .handlers
            .insert(tag.to_string(), Arc::new(TypedBroker(broker)))
            .is_some()
        {
            warn!(action_type = tag, "replacing previously registered broker");
        }
        self
    }

    pub(crate) fn resolve(&self, action_type: &str) -> Option<Arc<dyn ErasedBroker>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Transfer {
        amount: u64,
    }

    impl ActionPayload for Transfer {
        const ACTION_TYPE: &'static str = "transfer";
    }

    struct Accepting;

    #[async_trait]
    impl Broker for Accepting {
        type Action = Transfer;

        async fn execute(&self, _action: Transfer) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resolves_registered_type_only() {
        let registry = BrokerRegistry::new().register(Accepting);
        assert!(registry.resolve("transfer").is_some());
        assert!(registry.resolve("cancel").is_none());
    }

    #[tokio::test]
    async fn test_erased_handler_decodes_payload() {
        let registry = BrokerRegistry::new().register(Accepting);
        let handler = registry.resolve("transfer").unwrap();
        let payload = serde_json::to_value(Transfer { amount: 5 }).unwrap();
        handler.execute(payload).await.unwrap();

        // A payload that is not a Transfer fails inside the handler.
        assert!(handler.execute(serde_json::json!("garbage")).await.is_err());
    }
}
