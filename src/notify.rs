//! Change notification fan-out
//!
//! Each observer gets its own bounded channel. Delivery uses `try_send`, so a
//! slow observer loses change-sets instead of stalling ingestion, and an
//! observer that dropped its receiver is removed on the next delivery.

use crate::observability::metrics::metrics;
use crate::state::ChangeSet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Default per-observer queue depth
pub const DEFAULT_OBSERVER_CAPACITY: usize = 64;

pub type ObserverId = u64;

type ObserverMap = RwLock<HashMap<ObserverId, mpsc::Sender<ChangeSet>>>;

/// Outcome of one `notify` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Observer queue was full
    pub dropped: usize,
    /// Observer had gone away and was removed
    pub closed: usize,
}

/// Delivers change-sets to registered observers without blocking
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    observers: Arc<ObserverMap>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_CAPACITY)
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            observers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    /// Register a new observer; dropping the subscription deregisters it
    pub fn register(&self) -> ChangeSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        debug!(observer_id = id, "Registered change observer");

        ChangeSubscription {
            id,
            receiver: rx,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Returns true if the observer was registered
    pub fn deregister(&self, id: ObserverId) -> bool {
        remove_observer(&self.observers, id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver a change-set to every observer; empty change-sets are suppressed
    pub fn notify(&self, change_set: &ChangeSet) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if change_set.is_empty() {
            metrics().change_set_suppressed();
            return report;
        }
        metrics().change_set_emitted();

        let mut gone = Vec::new();
        {
            let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
            for (id, sender) in observers.iter() {
                match sender.try_send(change_set.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            observer_id = id,
                            device_id = %change_set.device_id,
                            "Observer queue full, dropping change-set"
                        );
                        report.dropped += 1;
                    }
                    Err(TrySendError::Closed(_)) => {
                        report.closed += 1;
                        gone.push(*id);
                    }
                }
            }
        }

        for id in gone {
            remove_observer(&self.observers, id);
        }

        metrics().notifications_delivered(report.delivered as u64);
        metrics().notifications_dropped(report.dropped as u64);
        report
    }
}

fn remove_observer(observers: &ObserverMap, id: ObserverId) -> bool {
    let removed = observers
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id)
        .is_some();
    if removed {
        debug!(observer_id = id, "Deregistered change observer");
    }
    removed
}

/// Receiving end of one observer registration
#[derive(Debug)]
pub struct ChangeSubscription {
    id: ObserverId,
    receiver: mpsc::Receiver<ChangeSet>,
    observers: Weak<ObserverMap>,
}

impl ChangeSubscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Wait for the next change-set; `None` once the notifier is gone
    pub async fn recv(&mut self) -> Option<ChangeSet> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeSet> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            remove_observer(&observers, self.id);
        }
    }
}
