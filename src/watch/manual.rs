//! Weak watch with on-demand notification delivery

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{WatchId, WeakProbe, WeakWatch};
use crate::error::WatchError;

/// Facility whose reclamation notifications are delivered explicitly.
///
/// Used by embedders that learn about reclamation from their own source and
/// by tests that need deterministic delivery.
///
/// # Examples
///
/// ```
/// use reclaim::watch::{ManualWatch, WeakProbe, WeakWatch};
/// use std::sync::Arc;
///
/// let watch = ManualWatch::new();
/// let owner = Arc::new(());
/// let id = watch.watch(WeakProbe::new(&owner)).unwrap();
///
/// assert!(watch.notify(id));
/// assert!(!watch.notify(id)); // delivered once
/// assert_eq!(watch.notifications().try_recv(), Ok(id));
/// ```
#[derive(Debug)]
pub struct ManualWatch {
    watched: DashMap<WatchId, WeakProbe>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Error handed to the next `watch` call
    refusal: Mutex<Option<WatchError>>,
    sender: Sender<WatchId>,
    receiver: Receiver<WatchId>,
}

impl ManualWatch {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            watched: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            refusal: Mutex::new(None),
            sender,
            receiver,
        }
    }

    /// Deliver the reclamation notification for `id`.
    ///
    /// Returns false when `id` is unknown, unwatched or already delivered.
    pub fn notify(&self, id: WatchId) -> bool {
        if self.watched.remove(&id).is_none() {
            return false;
        }
        let _ = self.sender.send(id);
        true
    }

    /// Deliver notifications for every watched owner that is no longer alive
    pub fn notify_reclaimed(&self) -> usize {
        let dead: Vec<WatchId> = self
            .watched
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| *entry.key())
            .collect();
        dead.into_iter().filter(|id| self.notify(*id)).count()
    }

    /// Make the next `watch` call fail with `error`
    pub fn refuse_next(&self, error: WatchError) {
        *self.refusal.lock() = Some(error);
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ids currently being watched
    pub fn watched_ids(&self) -> Vec<WatchId> {
        let mut ids: Vec<_> = self.watched.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

impl Default for ManualWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WeakWatch for ManualWatch {
    fn watch(&self, probe: WeakProbe) -> Result<WatchId, WatchError> {
        if let Some(error) = self.refusal.lock().take() {
            return Err(error);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(WatchError::Closed);
        }
        let id = WatchId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watched.insert(id, probe);
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) -> bool {
        self.watched.remove(&id).is_some()
    }

    fn notifications(&self) -> Receiver<WatchId> {
        self.receiver.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
