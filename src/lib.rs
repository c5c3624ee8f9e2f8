//! Deferred, at-most-once resource cleanup tied to owner reachability.
//!
//! An owner registers a [`CleanupAction`] with a [`CleanupRegistry`] and gets a
//! [`CleanupTicket`] back. The action then runs exactly once: when the owner
//! releases the ticket explicitly, or when the weak-watch facility reports the
//! owner reclaimed and the registry's [`ReclamationWatcher`] triggers it,
//! whichever happens first.
//!
//! ```
//! use reclaim::{CleanupAction, CleanupRegistry, RegistryConfig};
//! use reclaim::test_utils::wait_until;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! let registry = CleanupRegistry::new(
//!     RegistryConfig::default().with_sweep_interval(Some(Duration::from_millis(2))),
//! )
//! .unwrap();
//!
//! let open = Arc::new(AtomicUsize::new(1));
//! let handles = Arc::clone(&open);
//! let owner = Arc::new(String::from("file"));
//! registry
//!     .register(&owner, CleanupAction::new(move || { handles.fetch_sub(1, Ordering::SeqCst); }))
//!     .unwrap();
//!
//! drop(owner);
//! assert!(wait_until(Duration::from_secs(5), || open.load(Ordering::SeqCst) == 0));
//! ```

pub mod cleanup;
pub mod config;
pub mod error;
pub mod global;
pub mod test_utils;
pub mod watch;

pub use cleanup::{
    CleanupAction, CleanupRegistry, CleanupTicket, GuardianChain, ReclamationWatcher,
    RegistryStats, TicketGuard, TicketState, TriggerOutcome, WeakAssociationCache, chain,
};
pub use config::RegistryConfig;
pub use error::{ActionFailure, CleanupError, CleanupResult, WatchError};
pub use watch::{ArcWatch, ManualWatch, WatchId, WeakProbe, WeakWatch};
