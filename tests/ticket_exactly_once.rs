//! Property-based tests for exactly-once ticket execution
//!
//! Races explicit triggers against each other and against reclamation
//! notifications, and checks the action never runs more or fewer than once.

use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use reclaim::cleanup::{CleanupAction, CleanupTicket, TriggerOutcome};
use reclaim::test_utils::{counting_action, manual_registry};

fn race_triggers(ticket: &CleanupTicket, callers: usize, wait: bool) -> Vec<TriggerOutcome> {
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let ticket = ticket.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                if wait {
                    ticket.trigger_and_wait()
                } else {
                    ticket.trigger()
                }
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Invariant: N concurrent triggers run the action exactly once
    #[test]
    fn concurrent_triggers_run_action_once(callers in 2usize..=100, wait in any::<bool>()) {
        let runs = Arc::new(AtomicUsize::new(0));
        let ticket = CleanupTicket::standalone(counting_action(&runs));

        let outcomes = race_triggers(&ticket, callers, wait);

        prop_assert_eq!(runs.load(Ordering::SeqCst), 1);
        prop_assert_eq!(outcomes.iter().filter(|o| **o == TriggerOutcome::Ran).count(), 1);
        prop_assert!(ticket.is_cleaned());
    }

    /// Invariant: waiting callers never return before the action has finished
    #[test]
    fn waiting_callers_observe_completion(callers in 2usize..=32) {
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);
        let ticket = CleanupTicket::standalone(CleanupAction::new(move || {
            thread::yield_now();
            flag.store(1, Ordering::SeqCst);
        }));

        let barrier = Arc::new(Barrier::new(callers));
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let ticket = ticket.clone();
                let barrier = Arc::clone(&barrier);
                let finished = Arc::clone(&finished);
                thread::spawn(move || {
                    barrier.wait();
                    ticket.trigger_and_wait().unwrap();
                    finished.load(Ordering::SeqCst)
                })
            })
            .collect();

        for handle in handles {
            prop_assert_eq!(handle.join().unwrap(), 1);
        }
    }

    /// Invariant: explicit and reclamation paths racing still run once
    #[test]
    fn explicit_and_reclamation_race_runs_once(explicit_callers in 1usize..=16) {
        let (watch, registry) = manual_registry(true).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let owner = Arc::new(0u64);
        let ticket = registry.register(&owner, counting_action(&runs)).unwrap();
        let id = ticket.watch_id().unwrap();

        let barrier = Arc::new(Barrier::new(explicit_callers + 1));
        let handles: Vec<_> = (0..explicit_callers)
            .map(|_| {
                let ticket = ticket.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ticket.trigger_and_wait().unwrap();
                })
            })
            .collect();
        barrier.wait();
        watch.notify(id);

        for handle in handles {
            handle.join().unwrap();
        }
        registry.shutdown();

        prop_assert_eq!(runs.load(Ordering::SeqCst), 1);
        prop_assert!(!registry.is_pending(id));
    }
}
