//! Guardian chains
//!
//! A guardian is a ticket whose cleanup must finish before another ticket's
//! action may start. Linking is structural: once `outer` is chained behind
//! `inner`, every trigger of `outer`, on either path, first runs `inner` to
//! completion. Code supplied for the outer cleanup can therefore only ever
//! observe a resource the inner guardian has already torn down.

use super::action::CleanupAction;
use super::ticket::{CleanupTicket, link_chain};
use crate::error::{CleanupError, CleanupResult};

/// Chain `outer` behind `inner` and return a composite ticket.
///
/// Triggering the composite, or `outer` directly, runs `inner` first. If the
/// inner action fails, the outer action still runs and the inner failure is
/// reported to whoever runs `outer`.
///
/// # Examples
///
/// ```
/// use reclaim::cleanup::{chain, CleanupAction, CleanupTicket};
/// use std::sync::{Arc, Mutex};
///
/// let log = Arc::new(Mutex::new(String::new()));
/// let (i, o) = (Arc::clone(&log), Arc::clone(&log));
/// let inner = CleanupTicket::standalone(CleanupAction::new(move || i.lock().unwrap().push('I')));
/// let outer = CleanupTicket::standalone(CleanupAction::new(move || o.lock().unwrap().push('O')));
///
/// let _composite = chain(&inner, &outer).unwrap();
/// outer.trigger().unwrap();
/// assert_eq!(*log.lock().unwrap(), "IO");
/// ```
pub fn chain(inner: &CleanupTicket, outer: &CleanupTicket) -> CleanupResult<CleanupTicket> {
    outer.run_after(inner)?;
    Ok(composite(outer.clone()))
}

fn composite(outermost: CleanupTicket) -> CleanupTicket {
    CleanupTicket::standalone(CleanupAction::fallible(move || {
        match outermost.trigger_and_wait() {
            Ok(_) => Ok(()),
            Err(CleanupError::ActionFailed(failure)) => Err(failure.to_string()),
            Err(other) => Err(other.to_string()),
        }
    }))
}

/// Ordered guardians, innermost first.
///
/// # Examples
///
/// ```
/// use reclaim::cleanup::{CleanupAction, CleanupTicket, GuardianChain};
///
/// let marker = CleanupTicket::standalone(CleanupAction::noop());
/// let handle = CleanupTicket::standalone(CleanupAction::noop());
/// let hook = CleanupTicket::standalone(CleanupAction::noop());
///
/// let all = GuardianChain::new()
///     .guard(marker.clone())
///     .guard(handle.clone())
///     .guard(hook.clone())
///     .build()
///     .unwrap();
///
/// all.trigger().unwrap();
/// assert!(marker.is_cleaned() && handle.is_cleaned() && hook.is_cleaned());
/// ```
#[derive(Debug, Default)]
pub struct GuardianChain {
    links: Vec<CleanupTicket>,
}

impl GuardianChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a ticket that runs after every ticket already in the chain
    pub fn guard(mut self, ticket: CleanupTicket) -> Self {
        self.links.push(ticket);
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link every ticket behind its predecessor and return a composite that
    /// triggers the whole chain.
    ///
    /// Linking is all or nothing: on error no ticket in the chain is changed.
    pub fn build(self) -> CleanupResult<CleanupTicket> {
        link_chain(&self.links)?;
        Ok(match self.links.last() {
            Some(outermost) => composite(outermost.clone()),
            None => CleanupTicket::standalone(CleanupAction::noop()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn logging(log: &Arc<Mutex<String>>, tag: char) -> CleanupTicket {
        let log = Arc::clone(log);
        CleanupTicket::standalone(CleanupAction::new(move || log.lock().push(tag)))
    }

    #[test]
    fn test_outer_trigger_runs_inner_first() {
        let log = Arc::new(Mutex::new(String::new()));
        let inner = logging(&log, 'I');
        let outer = logging(&log, 'O');

        chain(&inner, &outer).unwrap();
        outer.trigger().unwrap();
        inner.trigger().unwrap();

        assert_eq!(*log.lock(), "IO");
    }

    #[test]
    fn test_inner_alone_does_not_run_outer() {
        let log = Arc::new(Mutex::new(String::new()));
        let inner = logging(&log, 'I');
        let outer = logging(&log, 'O');

        let composite = chain(&inner, &outer).unwrap();
        inner.trigger().unwrap();
        assert_eq!(*log.lock(), "I");

        composite.trigger().unwrap();
        assert_eq!(*log.lock(), "IO");
    }

    #[test]
    fn test_inner_failure_is_reported_and_outer_still_runs() {
        let log = Arc::new(Mutex::new(String::new()));
        let inner = CleanupTicket::standalone(CleanupAction::fallible(|| Err("mark failed")));
        let outer = logging(&log, 'O');

        chain(&inner, &outer).unwrap();
        match outer.trigger() {
            Err(CleanupError::ActionFailed(failure)) => {
                assert_eq!(failure.ticket, outer.id());
                assert!(failure.message.contains("mark failed"));
            }
            other => panic!("expected ActionFailed, got {other:?}"),
        }
        assert_eq!(*log.lock(), "O");
        assert!(inner.is_cleaned());
    }

    #[test]
    fn test_chain_rejects_triggered_outer_and_cycles() {
        let log = Arc::new(Mutex::new(String::new()));
        let a = logging(&log, 'A');
        let b = logging(&log, 'B');

        chain(&a, &b).unwrap();
        assert_eq!(chain(&b, &a).unwrap_err(), CleanupError::CycleDetected);

        let c = logging(&log, 'C');
        c.trigger().unwrap();
        assert_eq!(chain(&a, &c).unwrap_err(), CleanupError::AlreadyTriggered);
    }

    #[test]
    fn test_builder_orders_innermost_first() {
        let log = Arc::new(Mutex::new(String::new()));
        let chain = GuardianChain::new()
            .guard(logging(&log, '1'))
            .guard(logging(&log, '2'))
            .guard(logging(&log, '3'));
        assert_eq!(chain.len(), 3);

        chain.build().unwrap().trigger().unwrap();
        assert_eq!(*log.lock(), "123");
    }

    #[test]
    fn test_failed_build_leaves_tickets_unlinked() {
        let log = Arc::new(Mutex::new(String::new()));
        let first = logging(&log, '1');
        let second = logging(&log, '2');
        let cleaned = logging(&log, 'x');
        cleaned.trigger().unwrap();

        let result = GuardianChain::new()
            .guard(first.clone())
            .guard(second.clone())
            .guard(cleaned)
            .build();
        assert_eq!(result.unwrap_err(), CleanupError::AlreadyTriggered);

        second.trigger().unwrap();
        assert_eq!(*log.lock(), "x2");
        assert!(!first.is_cleaned());

        // The untouched pair can still be chained the other way round
        let reversed = GuardianChain::new()
            .guard(second)
            .guard(first.clone())
            .build();
        assert!(reversed.is_ok());
    }

    #[test]
    fn test_empty_chain_builds_noop() {
        let chain = GuardianChain::new();
        assert!(chain.is_empty());
        assert!(chain.build().unwrap().trigger().is_ok());
    }
}
