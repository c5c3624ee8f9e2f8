//! Exactly-once cleanup tickets
//!
//! A ticket wraps one [`CleanupAction`] and runs it at most once, no matter how
//! many callers or which trigger path asks for it. The only point of mutual
//! exclusion between the explicit and the reclamation path is a single
//! compare-and-set on the ticket state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use super::action::CleanupAction;
use crate::error::{ActionFailure, CleanupError, CleanupResult};
use crate::watch::WatchId;

static NEXT_TICKET_ID: AtomicU64 = AtomicU64::new(1);

/// Serializes guardian linking so two concurrent links cannot close a cycle
static LINK_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Process-unique ticket identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

impl TicketId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }

    fn next() -> Self {
        Self(NEXT_TICKET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket#{}", self.0)
    }
}

/// Lifecycle of a ticket. `Cleaned` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TicketState {
    Registered = 0,
    Cleaning = 1,
    Cleaned = 2,
}

impl TicketState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TicketState::Registered,
            1 => TicketState::Cleaning,
            _ => TicketState::Cleaned,
        }
    }
}

/// Which path fired a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOrigin {
    /// Owner-initiated release
    Explicit,
    /// Reclamation notification delivered by the watcher
    Reclamation,
}

/// Result of a trigger call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// This call won the race and ran the action
    Ran,
    /// Another call had already won; nothing was run
    AlreadyTriggered,
}

/// Hook run by the winning trigger once the ticket is `Cleaned`
pub(crate) type SettleHook = Box<dyn Fn(&Settled) + Send + Sync>;

/// What a settle hook learns about the finished run
#[derive(Debug, Clone, Copy)]
pub(crate) struct Settled {
    pub(crate) watch: Option<WatchId>,
    pub(crate) origin: TriggerOrigin,
    pub(crate) failed: bool,
}

struct TicketInner {
    id: TicketId,
    watch: Option<WatchId>,
    state: AtomicU8,
    /// Taken exactly once, by the winner of the state transition
    action: Mutex<Option<CleanupAction>>,
    /// Thread currently running the action
    runner: Mutex<Option<ThreadId>>,
    done_lock: Mutex<()>,
    done: Condvar,
    /// Tickets that must finish before this ticket's own action runs
    guards: Mutex<Vec<CleanupTicket>>,
    on_settled: Option<SettleHook>,
}

/// Handle to one pending-or-completed cleanup.
///
/// Cloning a ticket yields another handle to the same cleanup.
///
/// # Examples
///
/// ```
/// use reclaim::cleanup::{CleanupAction, CleanupTicket, TicketState, TriggerOutcome};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let runs = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&runs);
/// let ticket = CleanupTicket::standalone(CleanupAction::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// assert_eq!(ticket.trigger(), Ok(TriggerOutcome::Ran));
/// assert_eq!(ticket.trigger(), Ok(TriggerOutcome::AlreadyTriggered));
/// assert_eq!(ticket.state(), TicketState::Cleaned);
/// assert_eq!(runs.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct CleanupTicket {
    inner: Arc<TicketInner>,
}

impl CleanupTicket {
    pub(crate) fn with_hook(
        watch: Option<WatchId>,
        action: CleanupAction,
        on_settled: Option<SettleHook>,
    ) -> Self {
        Self {
            inner: Arc::new(TicketInner {
                id: TicketId::next(),
                watch,
                state: AtomicU8::new(TicketState::Registered as u8),
                action: Mutex::new(Some(action)),
                runner: Mutex::new(None),
                done_lock: Mutex::new(()),
                done: Condvar::new(),
                guards: Mutex::new(Vec::new()),
                on_settled,
            }),
        }
    }

    /// Ticket tied to no owner and no registry; it runs only when triggered
    pub fn standalone(action: CleanupAction) -> Self {
        Self::with_hook(None, action, None)
    }

    pub fn id(&self) -> TicketId {
        self.inner.id
    }

    pub fn watch_id(&self) -> Option<WatchId> {
        self.inner.watch
    }

    /// Current state. Advisory only: it may change right after it is read.
    pub fn state(&self) -> TicketState {
        TicketState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Advisory check for the terminal state
    pub fn is_cleaned(&self) -> bool {
        self.state() == TicketState::Cleaned
    }

    /// Run the action if no one has yet.
    ///
    /// The winner runs the action on the calling thread and gets its failure,
    /// if any. Every other caller returns `AlreadyTriggered` immediately,
    /// without waiting for the winner.
    pub fn trigger(&self) -> CleanupResult<TriggerOutcome> {
        self.fire(TriggerOrigin::Explicit, false)
    }

    /// Like [`trigger`](Self::trigger), but a losing caller blocks until the
    /// winner's run has finished.
    ///
    /// Called from inside this ticket's own action, it returns immediately.
    pub fn trigger_and_wait(&self) -> CleanupResult<TriggerOutcome> {
        self.fire(TriggerOrigin::Explicit, true)
    }

    pub(crate) fn trigger_from(&self, origin: TriggerOrigin) -> CleanupResult<TriggerOutcome> {
        self.fire(origin, false)
    }

    /// Block until the ticket is `Cleaned`. Does not trigger it.
    pub fn wait(&self) {
        let inner = &self.inner;
        if *inner.runner.lock() == Some(thread::current().id()) {
            return;
        }
        let mut guard = inner.done_lock.lock();
        while self.state() != TicketState::Cleaned {
            inner.done.wait(&mut guard);
        }
    }

    fn fire(&self, origin: TriggerOrigin, wait: bool) -> CleanupResult<TriggerOutcome> {
        let inner = &self.inner;
        let won = inner
            .state
            .compare_exchange(
                TicketState::Registered as u8,
                TicketState::Cleaning as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if !won {
            if wait {
                self.wait();
            }
            return Ok(TriggerOutcome::AlreadyTriggered);
        }

        *inner.runner.lock() = Some(thread::current().id());
        let action = inner.action.lock().take();
        let result = match action {
            Some(action) => action.run(),
            None => Ok(()),
        };
        *inner.runner.lock() = None;

        {
            let _guard = inner.done_lock.lock();
            inner
                .state
                .store(TicketState::Cleaned as u8, Ordering::Release);
            inner.done.notify_all();
        }
        inner.guards.lock().clear();

        tracing::debug!(
            ticket = %inner.id,
            origin = ?origin,
            failed = result.is_err(),
            "cleanup ticket settled"
        );

        if let Some(hook) = &inner.on_settled {
            hook(&Settled {
                watch: inner.watch,
                origin,
                failed: result.is_err(),
            });
        }

        result.map(|()| TriggerOutcome::Ran).map_err(|error| {
            CleanupError::ActionFailed(ActionFailure {
                ticket: inner.id,
                watch: inner.watch,
                message: error.message,
                panicked: error.panicked,
            })
        })
    }

    /// Make this ticket's action wait for `guard` to finish first.
    ///
    /// Fails if this ticket has already been triggered, or if `guard` already
    /// waits on this ticket.
    pub(crate) fn run_after(&self, guard: &CleanupTicket) -> CleanupResult<()> {
        link_chain(&[guard.clone(), self.clone()])
    }

    /// Wrap the action held in `action` so that `guard` runs to completion first.
    /// Caller holds `LINK_LOCK` and this ticket's action lock.
    fn link_locked(&self, action: &mut Option<CleanupAction>, guard: &CleanupTicket) {
        let own = action.take();
        let first = guard.clone();
        *action = Some(CleanupAction::fallible(move || {
            let guard_failure = match first.trigger_and_wait() {
                Ok(_) => None,
                Err(error) => Some(error.to_string()),
            };
            let own_failure = match own {
                Some(own) => own.run().err().map(|error| error.message),
                None => None,
            };
            match (guard_failure, own_failure) {
                (None, None) => Ok(()),
                (Some(message), None) | (None, Some(message)) => Err(message),
                (Some(guard), Some(own)) => Err(format!("{own}; guardian: {guard}")),
            }
        }));
        self.inner.guards.lock().push(guard.clone());
    }

    /// Whether this ticket is `other` or transitively waits on it
    fn waits_on(&self, other: &CleanupTicket) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let guards = self.inner.guards.lock().clone();
        guards.iter().any(|guard| guard.waits_on(other))
    }
}

/// Link every ticket in `links` behind its predecessor, or none of them.
///
/// Every pair is checked before the first link is made: no ticket may
/// already wait on a later one (which also rejects duplicates), and every
/// ticket after the first must still be `Registered`. The action locks of the
/// linked tickets are held until linking is done, so a concurrent trigger
/// picks up the linked action.
pub(crate) fn link_chain(links: &[CleanupTicket]) -> CleanupResult<()> {
    let _linking = LINK_LOCK.lock();

    for (i, earlier) in links.iter().enumerate() {
        if links[i + 1..].iter().any(|later| earlier.waits_on(later)) {
            return Err(CleanupError::CycleDetected);
        }
    }

    let mut actions = Vec::with_capacity(links.len().saturating_sub(1));
    for outer in links.iter().skip(1) {
        let action = outer.inner.action.lock();
        if outer.state() != TicketState::Registered {
            return Err(CleanupError::AlreadyTriggered);
        }
        actions.push(action);
    }

    for (pair, action) in links.windows(2).zip(actions.iter_mut()) {
        pair[1].link_locked(action, &pair[0]);
    }
    Ok(())
}

impl fmt::Debug for CleanupTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupTicket")
            .field("id", &self.inner.id)
            .field("watch", &self.inner.watch)
            .field("state", &self.state())
            .finish()
    }
}

/// Scoped explicit release: triggers its ticket when dropped.
///
/// # Examples
///
/// ```
/// use reclaim::cleanup::{CleanupAction, CleanupTicket, TicketGuard};
///
/// let ticket = CleanupTicket::standalone(CleanupAction::noop());
/// {
///     let _guard = TicketGuard::new(ticket.clone());
/// }
/// assert!(ticket.is_cleaned());
/// ```
#[derive(Debug)]
pub struct TicketGuard {
    ticket: Option<CleanupTicket>,
}

impl TicketGuard {
    pub fn new(ticket: CleanupTicket) -> Self {
        Self {
            ticket: Some(ticket),
        }
    }

    pub fn ticket(&self) -> Option<&CleanupTicket> {
        self.ticket.as_ref()
    }

    /// Release now and report the outcome to the caller
    pub fn release(mut self) -> CleanupResult<TriggerOutcome> {
        match self.ticket.take() {
            Some(ticket) => ticket.trigger_and_wait(),
            None => Ok(TriggerOutcome::AlreadyTriggered),
        }
    }

    /// Disarm the guard, leaving the ticket to other trigger paths
    pub fn into_ticket(mut self) -> Option<CleanupTicket> {
        self.ticket.take()
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take()
            && let Err(error) = ticket.trigger_and_wait()
        {
            tracing::error!(ticket = %ticket.id(), %error, "scoped release failed");
        }
    }
}
