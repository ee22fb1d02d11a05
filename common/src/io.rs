// Stage IO
// Bus <-> queue adapters shared by every group, plus the shutdown signal all
// run loops observe at their suspension points.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::warn;

use crate::bus::{self, BusMessage, MessageBus};
use crate::error::BusError;

/// Cancellation signal observed by every stage. Cloned freely; triggering
/// the [`ShutdownHandle`] releases all clones at once.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once shutdown is requested. Dropping every handle counts as
    /// a request, so orphaned stages cannot hang.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Linked child signal: trips when the parent trips, or when the
    /// returned handle is triggered directly. Lets a group cancel its own
    /// stages on a sibling fault without affecting the rest of the process.
    pub fn child(&self) -> (ShutdownHandle, Shutdown) {
        let (handle, signal) = ShutdownHandle::new();
        let mut parent = self.clone();
        let link = handle.clone();
        tokio::spawn(async move {
            parent.triggered().await;
            link.trigger();
        });
        (handle, signal)
    }
}

#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, Shutdown { rx })
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Drains a bus subscription into a typed queue. Undecodable payloads are
/// logged and skipped, matching the transport bindings' tolerance for
/// malformed peers.
pub struct StreamInput<M> {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: BusMessage> StreamInput<M> {
    pub fn subscribe(bus: &dyn MessageBus) -> Result<Self, BusError> {
        Ok(Self {
            rx: bus.subscribe_raw(M::CHANNEL)?,
            _marker: PhantomData,
        })
    }

    /// Next decoded message; `None` once the subscription ends.
    pub async fn recv(&mut self) -> Option<M> {
        while let Some(payload) = self.rx.recv().await {
            match serde_json::from_slice(&payload) {
                Ok(message) => return Some(message),
                Err(e) => {
                    warn!(channel = M::CHANNEL.as_topic(), error = %e, "skipping undecodable bus message");
                }
            }
        }
        None
    }

    /// Non-blocking variant of [`StreamInput::recv`]: returns the next
    /// already-queued message, if any.
    pub fn try_recv(&mut self) -> Option<M> {
        while let Ok(payload) = self.rx.try_recv() {
            match serde_json::from_slice(&payload) {
                Ok(message) => return Some(message),
                Err(e) => {
                    warn!(channel = M::CHANNEL.as_topic(), error = %e, "skipping undecodable bus message");
                }
            }
        }
        None
    }

    /// Stage loop: forward messages into `output` until the subscription
    /// ends or shutdown is requested.
    pub async fn run(mut self, output: mpsc::UnboundedSender<M>, mut shutdown: Shutdown) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                message = self.recv() => {
                    let Some(message) = message else { break };
                    if output.send(message).is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Drains a typed queue onto the bus.
pub struct EmitOutput<M> {
    bus: Arc<dyn MessageBus>,
    input: mpsc::UnboundedReceiver<M>,
}

impl<M: BusMessage> EmitOutput<M> {
    pub fn new(bus: Arc<dyn MessageBus>, input: mpsc::UnboundedReceiver<M>) -> Self {
        Self { bus, input }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                message = self.input.recv() => {
                    let Some(message) = message else { break };
                    bus::emit(self.bus.as_ref(), &message).await?;
                }
            }
        }
        Ok(())
    }
}

/// Joins a group's stages. The first failing stage trips the shared handle
/// so its siblings terminate together, and its error is returned once every
/// stage has settled.
pub async fn join_group(mut stages: JoinSet<anyhow::Result<()>>, handle: ShutdownHandle) -> anyhow::Result<()> {
    let mut first_failure = None;
    while let Some(joined) = stages.join_next().await {
        let result = joined.unwrap_or_else(|e| Err(anyhow::anyhow!("stage task failed: {e}")));
        if let Err(e) = result {
            handle.trigger();
            if first_failure.is_none() {
                first_failure = Some(e);
            }
        }
    }
    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
