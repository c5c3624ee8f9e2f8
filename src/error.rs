//! Error types for the cleanup registry.

use thiserror::Error;

use crate::cleanup::TicketId;
use crate::watch::WatchId;

/// A cleanup action that returned an error or panicked.
///
/// The ticket that ran the action is already `Cleaned` when this value exists;
/// failed actions are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "cleanup action for ticket {ticket}{} {}: {message}",
    watch_label(.watch),
    failure_kind(.panicked)
)]
pub struct ActionFailure {
    /// Ticket whose action failed
    pub ticket: TicketId,
    /// Watch the ticket was registered under, if any
    pub watch: Option<WatchId>,
    /// Rendered error or panic payload
    pub message: String,
    /// True when the action panicked rather than returning an error
    pub panicked: bool,
}

fn watch_label(watch: &Option<WatchId>) -> String {
    watch.map(|watch| format!(" ({watch})")).unwrap_or_default()
}

fn failure_kind(panicked: &bool) -> &'static str {
    if *panicked { "panicked" } else { "failed" }
}

/// Reasons the weak-watch facility can refuse to watch an object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("watch table is full ({capacity} live watches)")]
    CapacityExceeded { capacity: usize },
    #[error("watch facility is closed")]
    Closed,
    #[error("object was already reclaimed before it could be watched")]
    AlreadyReclaimed,
    #[error("watch refused: {0}")]
    Refused(String),
}

/// Errors surfaced by the cleanup registry and its tickets.
///
/// # Examples
///
/// ```
/// use reclaim::error::{CleanupError, CleanupResult, WatchError};
///
/// let err = CleanupError::from(WatchError::Closed);
/// assert_eq!(err.to_string(), "watch registration failed: watch facility is closed");
///
/// let ok: CleanupResult<u32> = Ok(7);
/// assert!(ok.is_ok());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CleanupError {
    #[error("{0}")]
    ActionFailed(ActionFailure),
    #[error("watch registration failed: {0}")]
    WatchRegistrationFailed(#[from] WatchError),
    #[error("ticket was already triggered")]
    AlreadyTriggered,
    #[error("guardian chain would form a cycle")]
    CycleDetected,
    #[error("process-wide registry is already initialized")]
    AlreadyInitialized,
    #[error("registry has been shut down")]
    ShutDown,
    #[error("failed to spawn {thread} thread: {reason}")]
    ThreadSpawn { thread: String, reason: String },
}

/// Result type for cleanup operations
pub type CleanupResult<T> = Result<T, CleanupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_readable_messages() {
        let cases = [
            (
                CleanupError::WatchRegistrationFailed(WatchError::CapacityExceeded {
                    capacity: 4,
                }),
                "watch registration failed: watch table is full (4 live watches)",
            ),
            (
                CleanupError::AlreadyTriggered,
                "ticket was already triggered",
            ),
            (CleanupError::CycleDetected, "guardian chain would form a cycle"),
            (
                CleanupError::AlreadyInitialized,
                "process-wide registry is already initialized",
            ),
            (CleanupError::ShutDown, "registry has been shut down"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn action_failure_mentions_watch_and_kind() {
        let failure = ActionFailure {
            ticket: TicketId::from_raw(3),
            watch: Some(WatchId::from_raw(9)),
            message: "fd already closed".into(),
            panicked: true,
        };

        assert_eq!(
            failure.to_string(),
            "cleanup action for ticket ticket#3 (watch#9) panicked: fd already closed"
        );
        assert_eq!(
            CleanupError::ActionFailed(failure.clone()).to_string(),
            failure.to_string()
        );
    }

    #[test]
    fn action_failure_without_watch_is_a_std_error() {
        let failure = ActionFailure {
            ticket: TicketId::from_raw(4),
            watch: None,
            message: "disk full".into(),
            panicked: false,
        };

        let error: &dyn std::error::Error = &failure;
        assert_eq!(
            error.to_string(),
            "cleanup action for ticket ticket#4 failed: disk full"
        );
    }
}
