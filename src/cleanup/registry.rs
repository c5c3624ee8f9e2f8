//! Cleanup registry
//!
//! The registry is the table of live tickets keyed by watch id, plus the
//! notification channel shared with the weak-watch facility. Tickets leave the
//! table as soon as they settle, whichever path fired them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use crossbeam::channel::Receiver;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::action::CleanupAction;
use super::failure::{FailureSink, TracingFailureSink};
use super::ticket::{CleanupTicket, SettleHook, Settled, TriggerOrigin, TriggerOutcome};
use super::watcher::ReclamationWatcher;
use crate::config::RegistryConfig;
use crate::error::{CleanupError, CleanupResult};
use crate::watch::{ArcWatch, SweeperHandle, WatchId, WeakProbe, WeakWatch};

/// Sized holder so the sink can live behind `ArcSwap`
struct SinkSlot(Arc<dyn FailureSink>);

/// State shared between the registry, its tickets and its watcher
pub(crate) struct RegistryShared {
    tickets: DashMap<WatchId, CleanupTicket>,
    facility: Arc<dyn WeakWatch>,
    notifications: Receiver<WatchId>,
    failure_sink: ArcSwap<SinkSlot>,
    shut_down: AtomicBool,
    total_registered: AtomicUsize,
    explicit_releases: AtomicUsize,
    reclamation_triggers: AtomicUsize,
    stale_notifications: AtomicUsize,
    failures: AtomicUsize,
}

impl RegistryShared {
    /// Trigger the ticket registered under `watch` on the reclamation path.
    ///
    /// Returns true when this call ran the ticket's action.
    pub(crate) fn trigger_watch(&self, watch: WatchId) -> bool {
        let Some((_, ticket)) = self.tickets.remove(&watch) else {
            self.stale_notifications.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%watch, "notification for settled or unknown watch");
            return false;
        };

        match ticket.trigger_from(TriggerOrigin::Reclamation) {
            Ok(TriggerOutcome::Ran) => true,
            Ok(TriggerOutcome::AlreadyTriggered) => {
                self.stale_notifications.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(CleanupError::ActionFailed(failure)) => {
                self.failure_sink.load().0.record(&failure);
                true
            }
            Err(error) => {
                tracing::error!(%watch, %error, "unexpected trigger error");
                false
            }
        }
    }

    /// Process every queued notification on the calling thread
    pub(crate) fn drain_pending(&self) -> usize {
        let mut processed = 0;
        while let Ok(watch) = self.notifications.try_recv() {
            self.trigger_watch(watch);
            processed += 1;
        }
        processed
    }

    pub(crate) fn notifications(&self) -> Receiver<WatchId> {
        self.notifications.clone()
    }

    fn settle(&self, settled: &Settled) {
        if let Some(watch) = settled.watch {
            self.tickets.remove(&watch);
            if settled.origin == TriggerOrigin::Explicit {
                self.facility.unwatch(watch);
            }
        }
        match settled.origin {
            TriggerOrigin::Explicit => self.explicit_releases.fetch_add(1, Ordering::Relaxed),
            TriggerOrigin::Reclamation => {
                self.reclamation_triggers.fetch_add(1, Ordering::Relaxed)
            }
        };
        if settled.failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn settle_hook(shared: Weak<RegistryShared>) -> SettleHook {
    Box::new(move |settled: &Settled| {
        if let Some(shared) = shared.upgrade() {
            shared.settle(settled);
        }
    })
}

/// Table of live cleanup tickets tied to owner reachability.
///
/// A ticket registered here fires exactly once: either when its owner calls
/// [`CleanupTicket::trigger`], or when the weak-watch facility reports the
/// owner reclaimed and the [`ReclamationWatcher`] triggers it.
///
/// # Examples
///
/// ```
/// use reclaim::{CleanupAction, CleanupRegistry, RegistryConfig};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let registry = CleanupRegistry::new(RegistryConfig::default()).unwrap();
///
/// let closed = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&closed);
/// let owner = Arc::new(String::from("connection"));
/// let ticket = registry
///     .register(&owner, CleanupAction::new(move || flag.store(true, Ordering::SeqCst)))
///     .unwrap();
///
/// ticket.trigger().unwrap();
/// assert!(closed.load(Ordering::SeqCst));
/// assert_eq!(registry.stats().live, 0);
/// # registry.shutdown();
/// ```
pub struct CleanupRegistry {
    shared: Arc<RegistryShared>,
    watcher: Mutex<Option<ReclamationWatcher>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl CleanupRegistry {
    /// Build a registry over the built-in [`ArcWatch`] facility.
    ///
    /// Starts the facility's sweeper when `sweep_interval` is set and the
    /// watcher thread when `start_watcher` is set.
    pub fn new(config: RegistryConfig) -> CleanupResult<Self> {
        let facility = Arc::new(ArcWatch::with_capacity(config.watch_capacity));
        let sweeper = match config.sweep_interval {
            Some(interval) => Some(facility.spawn_sweeper(interval).map_err(|error| {
                CleanupError::ThreadSpawn {
                    thread: "reclaim-sweeper".to_string(),
                    reason: error.to_string(),
                }
            })?),
            None => None,
        };

        let registry = Self::with_watch(facility, config)?;
        *registry.sweeper.lock() = sweeper;
        Ok(registry)
    }

    /// Build a registry over a caller-supplied facility.
    ///
    /// The facility decides when reclamation is detected; `sweep_interval`
    /// and `watch_capacity` are ignored.
    pub fn with_watch(facility: Arc<dyn WeakWatch>, config: RegistryConfig) -> CleanupResult<Self> {
        let notifications = facility.notifications();
        let shared = Arc::new(RegistryShared {
            tickets: DashMap::new(),
            facility,
            notifications,
            failure_sink: ArcSwap::from_pointee(SinkSlot(Arc::new(TracingFailureSink))),
            shut_down: AtomicBool::new(false),
            total_registered: AtomicUsize::new(0),
            explicit_releases: AtomicUsize::new(0),
            reclamation_triggers: AtomicUsize::new(0),
            stale_notifications: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });

        let watcher = if config.start_watcher {
            Some(ReclamationWatcher::spawn(
                &config.watcher_thread_name,
                Arc::clone(&shared),
            )?)
        } else {
            None
        };

        Ok(Self {
            shared,
            watcher: Mutex::new(watcher),
            sweeper: Mutex::new(None),
        })
    }

    /// Tie `action` to the lifetime of `owner`.
    ///
    /// Only a weak probe on `owner` is kept. `action` must not reference
    /// `owner`, or the owner can never become unreachable. On error nothing
    /// is registered.
    pub fn register<T>(&self, owner: &Arc<T>, action: CleanupAction) -> CleanupResult<CleanupTicket>
    where
        T: Send + Sync + 'static,
    {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(CleanupError::ShutDown);
        }

        let watch = self.shared.facility.watch(WeakProbe::new(owner))?;
        let ticket = CleanupTicket::with_hook(
            Some(watch),
            action,
            Some(settle_hook(Arc::downgrade(&self.shared))),
        );
        self.shared.tickets.insert(watch, ticket.clone());

        // A shutdown that started after the first check may already have
        // drained and stopped the watcher; nothing would ever fire this ticket.
        if self.shared.shut_down.load(Ordering::SeqCst) {
            self.shared.tickets.remove(&watch);
            self.shared.facility.unwatch(watch);
            return Err(CleanupError::ShutDown);
        }
        self.shared.total_registered.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(ticket = %ticket.id(), %watch, "registered cleanup");
        Ok(ticket)
    }

    /// Register a cleanup with no owner; it runs only when triggered explicitly
    pub fn register_unwatched(&self, action: CleanupAction) -> CleanupResult<CleanupTicket> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(CleanupError::ShutDown);
        }
        let ticket = CleanupTicket::with_hook(
            None,
            action,
            Some(settle_hook(Arc::downgrade(&self.shared))),
        );
        self.shared.total_registered.fetch_add(1, Ordering::Relaxed);
        Ok(ticket)
    }

    /// Deliver a reclamation notification for `watch` on the calling thread
    pub fn trigger_watch(&self, watch: WatchId) -> bool {
        self.shared.trigger_watch(watch)
    }

    /// Process queued notifications on the calling thread.
    ///
    /// Returns the number of notifications consumed.
    pub fn drain_pending(&self) -> usize {
        self.shared.drain_pending()
    }

    /// Replace the sink that receives reclamation-path failures
    pub fn set_failure_sink(&self, sink: Arc<dyn FailureSink>) {
        self.shared.failure_sink.store(Arc::new(SinkSlot(sink)));
    }

    /// Whether `watch` still has a pending ticket
    pub fn is_pending(&self, watch: WatchId) -> bool {
        self.shared.tickets.contains_key(&watch)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    pub fn has_watcher(&self) -> bool {
        self.watcher
            .lock()
            .as_ref()
            .is_some_and(ReclamationWatcher::is_running)
    }

    /// Get statistics for this registry
    pub fn stats(&self) -> RegistryStats {
        let shared = &self.shared;
        RegistryStats {
            registered: shared.total_registered.load(Ordering::Relaxed),
            live: shared.tickets.len(),
            explicit_releases: shared.explicit_releases.load(Ordering::Relaxed),
            reclamation_triggers: shared.reclamation_triggers.load(Ordering::Relaxed),
            stale_notifications: shared.stale_notifications.load(Ordering::Relaxed),
            failures: shared.failures.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting registrations and stop the background threads.
    ///
    /// Every notification queued before the watcher stops is processed; none
    /// is dropped. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.shutdown();
        }
        let drained = self.shared.drain_pending();
        self.shared.facility.close();

        let stats = self.stats();
        if stats.live > 0 {
            tracing::warn!(
                live = stats.live,
                "registry shut down with tickets whose owners are still reachable"
            );
        }
        tracing::debug!(drained, "cleanup registry shut down");
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("stats", &self.stats())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Statistics for a cleanup registry. Advisory snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Tickets ever registered
    pub registered: usize,
    /// Watched tickets still pending
    pub live: usize,
    /// Tickets settled by an explicit trigger
    pub explicit_releases: usize,
    /// Tickets settled by a reclamation notification
    pub reclamation_triggers: usize,
    /// Notifications that found nothing left to run
    pub stale_notifications: usize,
    /// Actions that failed, on either path
    pub failures: usize,
}
