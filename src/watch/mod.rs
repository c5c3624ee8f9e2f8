//! Weak-watch facilities
//!
//! A weak watch pairs a non-owning reference to an object with a notification
//! delivered after the object has been reclaimed. Reachability of a shared
//! owner is expressed through `Arc` strong counts: an owner is reclaimed once
//! its last strong handle is dropped.
//!
//! ## Facilities
//!
//! - **ArcWatch**: watches `Arc` owners and detects reclamation with a sweep
//!   pass, optionally driven by a background sweeper thread
//! - **ManualWatch**: deterministic facility whose notifications are delivered
//!   on demand

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crossbeam::channel::Receiver;

use crate::error::WatchError;

pub mod arc_watch;
pub mod manual;

pub use arc_watch::{ArcWatch, SweeperHandle, WatchStats};
pub use manual::ManualWatch;

/// Identity of one weak watch, unique within the facility that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl WatchId {
    /// Build a watch id from its raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value of this id
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// Non-owning probe on a resource owner.
///
/// Built from `&Arc<T>`, so nothing that holds a probe can keep the owner
/// reachable.
///
/// # Examples
///
/// ```
/// use reclaim::watch::WeakProbe;
/// use std::sync::Arc;
///
/// let owner = Arc::new(String::from("socket"));
/// let probe = WeakProbe::new(&owner);
/// assert!(probe.is_alive());
///
/// drop(owner);
/// assert!(!probe.is_alive());
/// ```
#[derive(Clone)]
pub struct WeakProbe {
    target: Weak<dyn Any + Send + Sync>,
}

impl WeakProbe {
    /// Create a probe watching `owner`
    pub fn new<T: Send + Sync + 'static>(owner: &Arc<T>) -> Self {
        let target: Weak<T> = Arc::downgrade(owner);
        Self { target }
    }

    /// Whether the owner still has strong handles
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl fmt::Debug for WeakProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakProbe")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Host facility that watches owners and announces their reclamation.
///
/// Every id returned by `watch` is yielded on the notification channel at most
/// once, after the watched owner has become unreachable. Ids that were
/// `unwatch`ed are never yielded.
pub trait WeakWatch: Send + Sync {
    /// Start watching an owner
    fn watch(&self, probe: WeakProbe) -> Result<WatchId, WatchError>;

    /// Stop watching without notifying. Returns false for unknown ids.
    fn unwatch(&self, id: WatchId) -> bool;

    /// Consumer end of the reclamation notification queue
    fn notifications(&self) -> Receiver<WatchId>;

    /// Refuse further watches
    fn close(&self);
}
