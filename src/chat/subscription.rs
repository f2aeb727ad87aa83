// Subscription handles and update delivery shared by the live components
//
// A component hands out one handle per subscription. Each handle carries a
// generation number; closing or replacing the subscription moves the
// component's generation on, and anything stamped with an older generation is
// dropped wherever it is found: in the pump task before the view is replaced,
// and in the subscriber's receiver before the update is handed out.

use log::{debug, trace};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backend::{FeedBatch, FeedSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    generation: u64,
}

impl SubscriptionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.generation)
    }
}

/// The generation counter of one component. Zero means "never subscribed".
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new subscription, making every earlier handle stale
    pub fn begin(&self) -> SubscriptionHandle {
        let generation = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        SubscriptionHandle { generation }
    }

    /// End `handle` if it is the current subscription. Returns false if it
    /// was already stale, which makes closing idempotent.
    pub fn end(&self, handle: SubscriptionHandle) -> bool {
        self.0
            .compare_exchange(
                handle.generation,
                handle.generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn is_current(&self, handle: SubscriptionHandle) -> bool {
        self.0.load(Ordering::SeqCst) == handle.generation
    }
}

/// One replacement of a component's view
#[derive(Debug, Clone)]
pub struct Update<T> {
    pub handle: SubscriptionHandle,
    pub payload: T,
}

/// Subscriber side of a component's updates. Updates belonging to a closed
/// or replaced subscription are skipped even if they were already queued.
pub struct Updates<T> {
    rx: mpsc::Receiver<Update<T>>,
    generation: Generation,
}

impl<T> Updates<T> {
    pub(crate) fn channel(buffer: usize, generation: Generation) -> (mpsc::Sender<Update<T>>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Updates { rx, generation })
    }

    /// Wait for the next live update. None once the component is gone.
    pub async fn recv(&mut self) -> Option<Update<T>> {
        while let Some(update) = self.rx.recv().await {
            if self.generation.is_current(update.handle) {
                return Some(update);
            }
            debug!("Dropping update for stale subscription {}", update.handle);
        }
        None
    }

    /// Next live update if one is already queued
    pub fn try_recv(&mut self) -> Option<Update<T>> {
        while let Ok(update) = self.rx.try_recv() {
            if self.generation.is_current(update.handle) {
                return Some(update);
            }
            debug!("Dropping update for stale subscription {}", update.handle);
        }
        None
    }
}

/// Feed `batches` through `apply` until the subscription goes stale or the
/// feed ends. One task per subscription, so batches are handled strictly in
/// arrival order.
///
/// The view slot advances on every batch no matter what the subscriber does.
/// If the update queue is full only the newest undelivered view is kept and
/// handed over once there is room; if the subscriber is gone the pump keeps
/// the view live without sending.
pub(crate) fn spawn_pump<T, F>(
    mut batches: FeedSubscription,
    handle: SubscriptionHandle,
    generation: Generation,
    view: Arc<watch::Sender<T>>,
    updates: mpsc::Sender<Update<T>>,
    mut apply: F,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(&T, FeedBatch) -> T + Send + 'static,
{
    tokio::spawn(async move {
        let mut undelivered: Option<T> = None;
        let mut subscriber_gone = false;

        loop {
            tokio::select! {
                batch = batches.recv() => {
                    let Some(batch) = batch else { break };
                    if !generation.is_current(handle) {
                        debug!("Discarding late batch for closed subscription {}", handle);
                        break;
                    }
                    trace!("Subscription {} received batch of {}", handle, batch.len());

                    let next = apply(&view.borrow(), batch);
                    view.send_replace(next.clone());
                    if subscriber_gone {
                        continue;
                    }

                    match updates.try_send(Update { handle, payload: next }) {
                        Ok(()) => undelivered = None,
                        Err(TrySendError::Full(update)) => {
                            trace!("Update queue for {} is full, holding latest view", handle);
                            undelivered = Some(update.payload);
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!("Subscriber for {} went away, keeping view live", handle);
                            subscriber_gone = true;
                            undelivered = None;
                        }
                    }
                }
                permit = updates.reserve(), if undelivered.is_some() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(payload) = undelivered.take() {
                                permit.send(Update { handle, payload });
                            }
                        }
                        Err(_) => {
                            debug!("Subscriber for {} went away, keeping view live", handle);
                            subscriber_gone = true;
                            undelivered = None;
                        }
                    }
                }
            }
        }
        debug!("Pump for subscription {} finished", handle);
    })
}
