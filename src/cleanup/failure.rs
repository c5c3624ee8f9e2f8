//! Failure sinks for cleanups that have no caller to report to

use parking_lot::Mutex;

use crate::error::ActionFailure;

/// Receives action failures from the reclamation path.
///
/// Runs on the watcher thread; implementations must not block for long.
pub trait FailureSink: Send + Sync {
    fn record(&self, failure: &ActionFailure);
}

impl<F> FailureSink for F
where
    F: Fn(&ActionFailure) + Send + Sync,
{
    fn record(&self, failure: &ActionFailure) {
        self(failure)
    }
}

/// Default sink: logs each failure at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn record(&self, failure: &ActionFailure) {
        tracing::error!(
            ticket = %failure.ticket,
            watch = ?failure.watch,
            panicked = failure.panicked,
            "reclamation cleanup failed: {}",
            failure.message
        );
    }
}

/// Sink that keeps every failure in memory
#[derive(Debug, Default)]
pub struct CollectingFailureSink {
    failures: Mutex<Vec<ActionFailure>>,
}

impl CollectingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the failures recorded so far
    pub fn failures(&self) -> Vec<ActionFailure> {
        self.failures.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FailureSink for CollectingFailureSink {
    fn record(&self, failure: &ActionFailure) {
        self.failures.lock().push(failure.clone());
    }
}
