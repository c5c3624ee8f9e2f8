//! Shared helpers for tests and benchmarks

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cleanup::{CleanupAction, CleanupRegistry};
use crate::config::RegistryConfig;
use crate::error::CleanupResult;
use crate::watch::{ArcWatch, ManualWatch};

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition was observed to hold.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

/// Action that bumps `counter` once per run
pub fn counting_action(counter: &Arc<AtomicUsize>) -> CleanupAction {
    let counter = Arc::clone(counter);
    CleanupAction::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

/// Action that appends `tag` to a shared log
pub fn logging_action(log: &Arc<Mutex<String>>, tag: &str) -> CleanupAction {
    let log = Arc::clone(log);
    let tag = tag.to_string();
    CleanupAction::new(move || log.lock().push_str(&tag))
}

/// Registry over a [`ManualWatch`], with or without a watcher thread
pub fn manual_registry(
    start_watcher: bool,
) -> CleanupResult<(Arc<ManualWatch>, Arc<CleanupRegistry>)> {
    let watch = Arc::new(ManualWatch::new());
    let config = RegistryConfig::default()
        .with_watcher(start_watcher)
        .with_watcher_thread_name("test-reclamation-watcher");
    let registry = CleanupRegistry::with_watch(watch.clone(), config)?;
    Ok((watch, Arc::new(registry)))
}

/// Registry over an [`ArcWatch`] whose reclamation passes the test drives
pub fn arc_registry() -> CleanupResult<(Arc<ArcWatch>, Arc<CleanupRegistry>)> {
    let watch = Arc::new(ArcWatch::new());
    let config = RegistryConfig::default().with_watcher_thread_name("test-reclamation-watcher");
    let registry = CleanupRegistry::with_watch(watch.clone(), config)?;
    Ok((watch, Arc::new(registry)))
}
