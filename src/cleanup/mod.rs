//! Deferred, exactly-once resource cleanup
//!
//! This module ties cleanup actions to the reachability of their owners.
//!
//! ## Features
//!
//! - **Tickets**: exactly-once execution of a cleanup action, whichever path fires it
//! - **Registry**: table of live tickets keyed by weak watch
//! - **Watcher**: background loop turning reclamation notifications into triggers
//! - **Weak Cache**: weakly-keyed map pruned through the same notifications
//! - **Guardian Chains**: inner-before-outer ordering across tickets

pub mod action;
pub mod failure;
pub mod guardian;
pub mod registry;
pub mod ticket;
pub mod watcher;
pub mod weak_cache;

pub use action::{BoxError, CleanupAction};
pub use failure::{CollectingFailureSink, FailureSink, TracingFailureSink};
pub use guardian::{GuardianChain, chain};
pub use registry::{CleanupRegistry, RegistryStats};
pub use ticket::{CleanupTicket, TicketGuard, TicketId, TicketState, TriggerOrigin, TriggerOutcome};
pub use watcher::ReclamationWatcher;
pub use weak_cache::{WeakAssociationCache, WeakCacheStats};
