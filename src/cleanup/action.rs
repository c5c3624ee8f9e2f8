//! Cleanup actions

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Boxed error a fallible cleanup action may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How to release one resource.
///
/// An action owns only the raw state it releases (descriptors, buffers,
/// counters). It must not hold, directly or transitively, a strong reference
/// to the owner it was registered for: such an action would keep its own
/// owner reachable and the reclamation path could never fire.
///
/// # Examples
///
/// ```
/// use reclaim::cleanup::CleanupAction;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let open_handles = Arc::new(AtomicUsize::new(1));
/// let handles = Arc::clone(&open_handles);
/// let action = CleanupAction::new(move || {
///     handles.fetch_sub(1, Ordering::SeqCst);
/// });
/// # drop(action);
/// ```
pub struct CleanupAction {
    run: Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>,
}

impl CleanupAction {
    /// Wrap an infallible cleanup closure
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            run: Box::new(move || {
                f();
                Ok(())
            }),
        }
    }

    /// Wrap a cleanup closure that can report failure
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            run: Box::new(move || f().map_err(Into::into)),
        }
    }

    /// Action that releases nothing
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Run the action, converting a panic into a failure
    pub(crate) fn run(self) -> Result<(), ActionError> {
        match panic::catch_unwind(AssertUnwindSafe(self.run)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(ActionError {
                message: error.to_string(),
                panicked: false,
            }),
            Err(payload) => Err(ActionError {
                message: panic_message(payload.as_ref()),
                panicked: true,
            }),
        }
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CleanupAction")
    }
}

/// Failure of a single action run, before it is attributed to a ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActionError {
    pub(crate) message: String,
    pub(crate) panicked: bool,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
