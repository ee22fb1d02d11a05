// Strategy Module
// One-state machine: await the next knowledge-base delta, evaluate the
// strategy over a read-only query context, and either hold or persist the
// initiated action set onto the decision sequence. A strategy fault is
// fatal here, since there is no safe partial-decision state to resume from.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use common::sequence::{extend, SequenceWalker};
use common::{
    ActionItem, ActionPayload, ActionSet, ContentId, ContentStore, ContextError, DecisionDelta,
    DecisionHead, DecisionStart, DecisionStep, KnowledgeBase, KnowledgeBaseDelta, Shutdown,
    StrategyManifest,
};

use crate::context::fold::ContextFold;
use crate::context::query::QueryContext;

/// One action a strategy wants executed, typed at construction and opaque
/// afterwards.
pub struct Initiative {
    pub(crate) action_type: String,
    pub(crate) payload: serde_json::Value,
}

impl Initiative {
    pub fn new<A: ActionPayload>(payload: &A) -> anyhow::Result<Self> {
        Ok(Self {
            action_type: A::ACTION_TYPE.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }
}

/// What a strategy evaluation concluded.
pub enum Decision {
    Hold,
    Initiate(Vec<Initiative>),
}

/// Read-only view of the strategy's own history, for self-inspecting
/// strategies.
pub struct Reflection<'a> {
    store: &'a ContentStore,
    identity: ContentId,
    head: ContentId,
}

impl<'a> Reflection<'a> {
    pub fn identity(&self) -> ContentId {
        self.identity
    }

    pub fn head(&self) -> ContentId {
        self.head
    }

    /// Backward walk over past decisions, newest first.
    pub fn decisions(&self) -> SequenceWalker<'a, DecisionStart, DecisionStep> {
        SequenceWalker::new(self.store, self.head)
    }
}

/// User-supplied decision function. Must be pure over its two views: all
/// inputs reach it through immutable content-addressed history, which is
/// what makes evaluations reproducible.
#[async_trait]
pub trait Strategy: Send + Sync + 'static {
    fn manifest(&self) -> StrategyManifest;

    async fn decide(&self, reflection: &Reflection<'_>, context: &QueryContext) -> anyhow::Result<Decision>;
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// How far back the per-evaluation context index reaches.
    pub context_window: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            context_window: Duration::hours(24),
        }
    }
}

pub struct StrategyModule<S> {
    strategy: S,
    store: Arc<ContentStore>,
    config: StrategyConfig,
    input: mpsc::UnboundedReceiver<KnowledgeBaseDelta>,
    output: mpsc::UnboundedSender<DecisionDelta>,
}

impl<S: Strategy> StrategyModule<S> {
    pub fn new(
        strategy: S,
        store: Arc<ContentStore>,
        config: StrategyConfig,
        input: mpsc::UnboundedReceiver<KnowledgeBaseDelta>,
        output: mpsc::UnboundedSender<DecisionDelta>,
    ) -> Self {
        Self {
            strategy,
            store,
            config,
            input,
            output,
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        let manifest = self.strategy.manifest();
        let strategy_cid = self.store.put(&manifest).await?;
        let mut contexts = ContextFold::new(self.store.clone()).await?;

        let identity = self
            .store
            .put(&DecisionHead::Identity(DecisionStart {
                strategy: strategy_cid,
                first_context: contexts.identity(),
            }))
            .await?;
        let mut head = identity;
        info!(strategy = %manifest.name, version = %manifest.version, "strategy module started");

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                delta = self.input.recv() => {
                    let Some(delta) = delta else { break };
                    head = self.evaluate(delta, &mut contexts, identity, head).await?;
                }
            }
        }
        Ok(())
    }

    async fn evaluate(
        &mut self,
        delta: KnowledgeBaseDelta,
        contexts: &mut ContextFold,
        identity: ContentId,
        head: ContentId,
    ) -> anyhow::Result<ContentId> {
        let kb: KnowledgeBase = self.store.get(&delta.head).await?;
        let context_head = contexts.apply(&kb).await?;
        if context_head == contexts.identity() {
            // The delta grew maps we do not evaluate over (no observations
            // yet). Nothing to query.
            return Ok(head);
        }

        let earliest = Utc::now() - self.config.context_window;
        let context = match QueryContext::load(self.store.clone(), context_head, earliest).await {
            Ok(context) => context,
            Err(ContextError::InvalidRange) => {
                debug!("every context node is older than the window; holding");
                return Ok(head);
            }
            Err(ContextError::Store(e)) => return Err(e.into()),
        };

        let reflection = Reflection {
            store: self.store.as_ref(),
            identity,
            head,
        };
        let decision = self.strategy.decide(&reflection, &context).await?;

        let Decision::Initiate(initiatives) = decision else {
            return Ok(head);
        };
        if initiatives.is_empty() {
            return Ok(head);
        }

        let mut actions = Vec::with_capacity(initiatives.len());
        for initiative in initiatives {
            let action = self.store.put(&initiative.payload).await?;
            actions.push(ActionItem {
                action_type: initiative.action_type,
                action,
            });
        }
        let action_set = self.store.put(&ActionSet { actions }).await?;

        let new_head = extend::<DecisionHead, _>(&self.store, head, DecisionStep { action_set }).await?;
        debug!(head = %new_head, "decision sequence extended");
        let _ = self.output.send(DecisionDelta { identity, head: new_head });
        Ok(new_head)
    }
}
