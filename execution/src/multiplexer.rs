// Broker Multiplexer
// Starts one isolated execution task per resolvable action. Every way an
// execution can go wrong (missing payload, broker error, broker panic)
// settles into a recorded Error trace; nothing aborts siblings.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;

use common::{ActionExecutionResult, ActionItem, ContentStore, ExecutedAction, ExecutionTrace};

use crate::broker::{BrokerRegistry, ErasedBroker};

pub struct BrokerMultiplexer {
    registry: BrokerRegistry,
    store: Arc<ContentStore>,
}

impl BrokerMultiplexer {
    pub fn new(registry: BrokerRegistry, store: Arc<ContentStore>) -> Self {
        Self { registry, store }
    }

    /// Start executing `action`, or `None` when no broker is registered for
    /// its type: a structural skip, not an error.
    pub fn try_start(&self, action: ActionItem) -> Option<JoinHandle<ExecutedAction>> {
        let handler = self.registry.resolve(&action.action_type)?;
        let store = self.store.clone();

        Some(tokio::spawn(async move {
            let started_at = Utc::now();
            let trace = match run_isolated(handler, store, &action).await {
                Ok(()) => ExecutionTrace::Success,
                Err(detail) => ExecutionTrace::Error { detail },
            };
            ExecutedAction {
                action,
                result: ActionExecutionResult {
                    trace,
                    started_at,
                    completed_at: Utc::now(),
                },
            }
        }))
    }
}

async fn run_isolated(
    handler: Arc<dyn ErasedBroker>,
    store: Arc<ContentStore>,
    action: &ActionItem,
) -> Result<(), String> {
    let payload: serde_json::Value = store
        .get(&action.action)
        .await
        .map_err(|e| format!("failed to load action payload: {e}"))?;

    match AssertUnwindSafe(handler.execute(payload)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "broker panicked".to_string());
            Err(format!("broker panicked: {detail}"))
        }
    }
}
