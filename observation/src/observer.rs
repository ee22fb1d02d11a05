// Observer Sources
// An observer is a lazy, potentially infinite sequence of typed percepts;
// reconnects and restarts are the source's own concern, hidden inside
// `next`. Each registered source runs as its own instance task feeding the
// group funnel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use common::{CapturedObservation, ContentStore, Percept, Shutdown};

/// A source of typed percepts.
#[async_trait]
pub trait Observer: Send + 'static {
    type Percept: Percept;

    /// Next percept. Suspends until one is ready; `Ok(None)` ends the
    /// source. An `Err` tears this source down without touching siblings.
    async fn next(&mut self) -> anyhow::Result<Option<Self::Percept>>;
}

/// One captured observation on its way to the group funnel.
pub(crate) struct NewCapture {
    pub source: usize,
    pub capture: CapturedObservation,
}

/// Pull loop for a single source: pull, stamp arrival time, persist the
/// percept, forward the capture.
pub(crate) fn spawn_instance<O: Observer>(
    source: usize,
    mut observer: O,
    store: Arc<ContentStore>,
    funnel: mpsc::UnboundedSender<NewCapture>,
    mut shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let percept = tokio::select! {
                _ = shutdown.triggered() => break,
                next = observer.next() => match next {
                    Ok(Some(percept)) => percept,
                    Ok(None) => {
                        debug!(source, percept_type = O::Percept::PERCEPT_TYPE, "observer source ended");
                        break;
                    }
                    Err(e) => {
                        error!(source, percept_type = O::Percept::PERCEPT_TYPE, error = %e,
                            "observer source failed; tearing down");
                        break;
                    }
                }
            };

            let at = Utc::now();
            let observation = match store.put(&percept).await {
                Ok(cid) => cid,
                Err(e) => {
                    error!(source, error = %e, "failed to persist percept; tearing down source");
                    break;
                }
            };

            let capture = CapturedObservation {
                at,
                percept_type: O::Percept::PERCEPT_TYPE.to_string(),
                observation,
            };
            if funnel.send(NewCapture { source, capture }).is_err() {
                break;
            }
        }
    })
}

type Starter = Box<dyn FnOnce(usize, Arc<ContentStore>, mpsc::UnboundedSender<NewCapture>, Shutdown) -> JoinHandle<()> + Send>;

/// The sources of one observer group. Registration takes ownership, so one
/// source instance cannot be operated twice.
#[derive(Default)]
pub struct ObserverSet {
    starters: Vec<Starter>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<O: Observer>(mut self, observer: O) -> Self {
        self.starters.push(Box::new(move |source, store, funnel, shutdown| {
            spawn_instance(source, observer, store, funnel, shutdown)
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.starters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starters.is_empty()
    }

    /// Start one instance task per source. The passed sender is dropped
    /// here, so the funnel's input closes exactly when every source ends.
    pub(crate) fn start(
        self,
        store: Arc<ContentStore>,
        funnel: mpsc::UnboundedSender<NewCapture>,
        shutdown: Shutdown,
    ) -> Vec<JoinHandle<()>> {
        self.starters
            .into_iter()
            .enumerate()
            .map(|(source, start)| start(source, store.clone(), funnel.clone(), shutdown.clone()))
            .collect()
    }
}
