//! End-to-end pipeline over the in-process bus: a scripted quote feed fills
//! the knowledge base, a threshold strategy initiates paper orders, and a
//! logging broker settles them into the action sequence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, Level};

use common::{
    ActionExecuted, ActionPayload, ContentStore, InProcessBus, MessageBus, Percept, ShutdownHandle,
    StrategyManifest, StreamInput,
};
use execution::{Broker, BrokerGroup, BrokerRegistry};
use knowledge::KnowledgeBaseGossip;
use observation::{Observer, ObserverGroup, ObserverSet};
use strategy::{Decision, Initiative, LiveStrategy, QueryContext, Reflection, Strategy, StrategyConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Quote {
    pair: String,
    mid: f64,
}

impl Percept for Quote {
    const PERCEPT_TYPE: &'static str = "quote";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PaperOrder {
    pair: String,
    size: f64,
}

impl ActionPayload for PaperOrder {
    const ACTION_TYPE: &'static str = "paper-order";
}

/// Replays a fixed tape of quotes, one every poll interval.
struct QuoteFeed {
    tape: Vec<f64>,
}

#[async_trait]
impl Observer for QuoteFeed {
    type Percept = Quote;

    async fn next(&mut self) -> anyhow::Result<Option<Quote>> {
        if self.tape.is_empty() {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Some(Quote {
            pair: "SOL/USDC".to_string(),
            mid: self.tape.remove(0),
        }))
    }
}

/// Orders once the latest quote crosses the threshold.
struct Breakout {
    threshold: f64,
}

#[async_trait]
impl Strategy for Breakout {
    fn manifest(&self) -> StrategyManifest {
        StrategyManifest {
            name: "breakout".to_string(),
            version: "0.1.0".to_string(),
        }
    }

    async fn decide(&self, _: &Reflection<'_>, context: &QueryContext) -> anyhow::Result<Decision> {
        let Some(quote) = context.latest::<Quote>().await? else {
            return Ok(Decision::Hold);
        };
        if quote.percept.mid < self.threshold {
            return Ok(Decision::Hold);
        }
        info!(mid = quote.percept.mid, "breakout; initiating order");
        Ok(Decision::Initiate(vec![Initiative::new(&PaperOrder {
            pair: quote.percept.pair,
            size: 1.0,
        })?]))
    }
}

/// Settles orders by logging them.
struct PaperDesk;

#[async_trait]
impl Broker for PaperDesk {
    type Action = PaperOrder;

    async fn execute(&self, action: PaperOrder) -> anyhow::Result<()> {
        info!(pair = %action.pair, size = action.size, "paper order filled");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let store = Arc::new(ContentStore::ephemeral());
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let (handle, signal) = ShutdownHandle::new();

    let mut executions = StreamInput::<ActionExecuted>::subscribe(bus.as_ref())?;

    let observers = ObserverSet::new().register(QuoteFeed {
        tape: vec![96.0, 98.5, 101.2, 103.7],
    });
    let capture = tokio::spawn(
        ObserverGroup::new(observers, store.clone(), bus.clone()).run(signal.clone()),
    );
    // A gossip node on the same bus; its re-broadcasts die at every peer's
    // novelty check instead of looping.
    let gossip = tokio::spawn(
        KnowledgeBaseGossip::new(store.clone(), bus.clone()).run(signal.clone()),
    );
    let decide = tokio::spawn(
        LiveStrategy::new(
            Breakout { threshold: 100.0 },
            StrategyConfig::default(),
            store.clone(),
            bus.clone(),
        )
        .run(signal.clone()),
    );
    let execute = tokio::spawn(
        BrokerGroup::new(
            BrokerRegistry::new().register(PaperDesk),
            store.clone(),
            bus.clone(),
        )
        .run(signal.clone()),
    );

    let executed = tokio::time::timeout(Duration::from_secs(10), executions.recv())
        .await?
        .expect("bus closed before any execution settled");
    info!(head = %executed.head, "action sequence grew; shutting down");

    handle.trigger();
    for task in [capture, gossip, decide, execute] {
        task.await??;
    }
    Ok(())
}
