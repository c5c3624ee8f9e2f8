//! Sweep-based weak watch over `Arc` owners

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;

use super::{WatchId, WeakProbe, WeakWatch};
use crate::error::WatchError;

/// Weak-watch facility for `Arc` owners.
///
/// `collect` is the reclamation pass: every probe whose owner has no strong
/// handles left is removed from the watch table and its id is sent on the
/// notification channel. Removal from the table is what makes delivery
/// exactly-once, even with concurrent passes.
///
/// # Examples
///
/// ```
/// use reclaim::watch::{ArcWatch, WeakProbe, WeakWatch};
/// use std::sync::Arc;
///
/// let watch = ArcWatch::new();
/// let owner = Arc::new(42u32);
/// let id = watch.watch(WeakProbe::new(&owner)).unwrap();
///
/// assert_eq!(watch.collect(), 0);
/// drop(owner);
/// assert_eq!(watch.collect(), 1);
/// assert_eq!(watch.notifications().try_recv(), Ok(id));
/// ```
#[derive(Debug)]
pub struct ArcWatch {
    /// Live probes by watch id
    watched: DashMap<WatchId, WeakProbe>,
    /// Next id to hand out
    next_id: AtomicU64,
    /// Maximum number of live watches, if bounded
    capacity: Option<usize>,
    /// Live watch count, used to enforce `capacity`
    live: AtomicUsize,
    closed: AtomicBool,
    total_watched: AtomicUsize,
    total_reclaimed: AtomicUsize,
    sender: Sender<WatchId>,
    receiver: Receiver<WatchId>,
}

impl ArcWatch {
    /// Create an unbounded facility
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a facility that refuses watches beyond `capacity` live entries
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            watched: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity,
            live: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            total_watched: AtomicUsize::new(0),
            total_reclaimed: AtomicUsize::new(0),
            sender,
            receiver,
        }
    }

    /// Notify every watch whose owner has been reclaimed.
    ///
    /// Returns the number of notifications sent by this pass.
    pub fn collect(&self) -> usize {
        let dead: Vec<WatchId> = self
            .watched
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| *entry.key())
            .collect();

        let mut notified = 0;
        for id in dead {
            if self.watched.remove(&id).is_some() {
                self.live.fetch_sub(1, Ordering::AcqRel);
                self.total_reclaimed.fetch_add(1, Ordering::Relaxed);
                // The receiver lives in `self`, so the channel cannot be disconnected.
                let _ = self.sender.send(id);
                notified += 1;
            }
        }

        if notified > 0 {
            tracing::trace!(notified, "reclamation pass delivered notifications");
        }
        notified
    }

    /// Run `collect` every `interval` on a dedicated thread.
    ///
    /// The sweeper stops when the returned handle is stopped or dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
    ) -> std::io::Result<SweeperHandle> {
        let (stop_sender, stop_receiver) = channel::bounded::<()>(1);
        let watch = Arc::clone(self);

        let handle = thread::Builder::new()
            .name("reclaim-sweeper".into())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(stop_receiver) -> _ => break,
                        default(interval) => {
                            watch.collect();
                        }
                    }
                }
                // Final pass so owners dropped just before shutdown are still announced
                watch.collect();
            })?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "reclamation sweeper started");

        Ok(SweeperHandle {
            stop: Some(stop_sender),
            handle: Some(handle),
        })
    }

    /// Get statistics for this facility
    pub fn stats(&self) -> WatchStats {
        WatchStats {
            live: self.live.load(Ordering::Acquire),
            total_watched: self.total_watched.load(Ordering::Relaxed),
            total_reclaimed: self.total_reclaimed.load(Ordering::Relaxed),
        }
    }

    fn reserve_slot(&self) -> Result<(), WatchError> {
        match self.capacity {
            None => {
                self.live.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Some(capacity) => self
                .live
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                    (live < capacity).then_some(live + 1)
                })
                .map(|_| ())
                .map_err(|_| WatchError::CapacityExceeded { capacity }),
        }
    }
}

impl Default for ArcWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WeakWatch for ArcWatch {
    fn watch(&self, probe: WeakProbe) -> Result<WatchId, WatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WatchError::Closed);
        }
        if !probe.is_alive() {
            return Err(WatchError::AlreadyReclaimed);
        }
        self.reserve_slot()?;

        let id = WatchId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watched.insert(id, probe);
        self.total_watched.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) -> bool {
        if self.watched.remove(&id).is_some() {
            self.live.fetch_sub(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    fn notifications(&self) -> Receiver<WatchId> {
        self.receiver.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Handle to a running sweeper thread
#[derive(Debug)]
pub struct SweeperHandle {
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its final pass
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Statistics for a watch facility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchStats {
    /// Watches not yet reclaimed or unwatched
    pub live: usize,
    /// Total watches ever accepted
    pub total_watched: usize,
    /// Total reclamation notifications sent
    pub total_reclaimed: usize,
}
