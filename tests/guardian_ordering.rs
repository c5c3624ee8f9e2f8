//! Guardian chains keep inner-before-outer ordering under every interleaving

use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use reclaim::cleanup::{CleanupAction, CleanupTicket, GuardianChain, chain};
use reclaim::test_utils::{logging_action, manual_registry, wait_until};
use reclaim::CleanupError;

const DEPTH: usize = 3;
const INTERLEAVINGS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Start(usize),
    End(usize),
}

fn position(events: &[Event], event: Event) -> usize {
    events
        .iter()
        .position(|e| *e == event)
        .unwrap_or_else(|| panic!("{event:?} missing from {events:?}"))
}

#[test]
fn depth_three_chain_orders_under_random_interleavings() {
    let (watch, registry) = manual_registry(true).unwrap();

    for seed in 0..INTERLEAVINGS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let events = Arc::new(Mutex::new(Vec::with_capacity(DEPTH * 2)));
        let owners: Vec<_> = (0..DEPTH).map(Arc::new).collect();

        let tickets: Vec<CleanupTicket> = owners
            .iter()
            .enumerate()
            .map(|(level, owner)| {
                let events = Arc::clone(&events);
                registry
                    .register(
                        owner,
                        CleanupAction::new(move || {
                            events.lock().push(Event::Start(level));
                            thread::yield_now();
                            events.lock().push(Event::End(level));
                        }),
                    )
                    .unwrap()
            })
            .collect();

        tickets
            .iter()
            .cloned()
            .fold(GuardianChain::new(), GuardianChain::guard)
            .build()
            .unwrap();

        let mut order: Vec<usize> = (0..DEPTH).collect();
        rng.shuffle(&mut order);

        let mut explicit = Vec::new();
        for level in order {
            let ticket = tickets[level].clone();
            if rng.bool() {
                explicit.push(thread::spawn(move || ticket.trigger_and_wait()));
            } else {
                watch.notify(ticket.watch_id().unwrap());
            }
        }
        for handle in explicit {
            handle.join().unwrap().unwrap();
        }

        assert!(
            wait_until(Duration::from_secs(5), || tickets.iter().all(CleanupTicket::is_cleaned)),
            "seed {seed}: chain did not settle"
        );

        let events = events.lock().clone();
        assert_eq!(events.len(), DEPTH * 2, "seed {seed}: {events:?}");
        for level in 1..DEPTH {
            assert!(
                position(&events, Event::End(level - 1)) < position(&events, Event::Start(level)),
                "seed {seed}: level {level} started before its guardian finished: {events:?}"
            );
        }
    }

    registry.shutdown();
}

#[test]
fn closing_guardian_runs_before_file_removal() {
    let path = std::env::temp_dir().join(format!("reclaim-guardian-{}.tmp", std::process::id()));
    let handle = Arc::new(Mutex::new(Some(File::create(&path).unwrap())));
    let observed_open = Arc::new(Mutex::new(None));

    let closer = {
        let handle = Arc::clone(&handle);
        CleanupTicket::standalone(CleanupAction::fallible(move || {
            let mut file = handle.lock().take().ok_or("handle already closed")?;
            file.write_all(b"flushed")?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
        }))
    };
    let remover = {
        let handle = Arc::clone(&handle);
        let observed_open = Arc::clone(&observed_open);
        let path = path.clone();
        CleanupTicket::standalone(CleanupAction::fallible(move || {
            *observed_open.lock() = Some(handle.lock().is_some());
            fs::remove_file(&path)
        }))
    };

    chain(&closer, &remover).unwrap();
    remover.trigger().unwrap();

    assert_eq!(*observed_open.lock(), Some(false));
    assert!(closer.is_cleaned());
    assert!(!path.exists());
}

#[test]
fn reclamation_of_outer_owner_runs_inner_first() {
    let (watch, registry) = manual_registry(false).unwrap();
    let log = Arc::new(Mutex::new(String::new()));
    let inner_owner = Arc::new("marker");
    let outer_owner = Arc::new("hook");

    let inner = registry.register(&inner_owner, logging_action(&log, "I")).unwrap();
    let outer = registry.register(&outer_owner, logging_action(&log, "O")).unwrap();
    chain(&inner, &outer).unwrap();

    drop(outer_owner);
    assert_eq!(watch.notify_reclaimed(), 1);
    registry.drain_pending();

    assert_eq!(*log.lock(), "IO");
    assert!(inner.is_cleaned());

    // The inner owner's later reclamation finds nothing left to do
    drop(inner_owner);
    watch.notify_reclaimed();
    registry.drain_pending();
    assert_eq!(*log.lock(), "IO");
}

#[test]
fn chaining_behind_a_cleaned_ticket_is_rejected() {
    let outer = CleanupTicket::standalone(CleanupAction::noop());
    outer.trigger().unwrap();

    let inner = CleanupTicket::standalone(CleanupAction::noop());
    assert_eq!(chain(&inner, &outer).unwrap_err(), CleanupError::AlreadyTriggered);
    assert!(!inner.is_cleaned());
}
