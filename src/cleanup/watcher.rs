//! Background reclamation watcher

use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Sender};

use super::registry::RegistryShared;
use crate::error::{CleanupError, CleanupResult};

/// The single background loop of a registry.
///
/// Blocks on the notification channel and triggers the ticket behind each
/// watch id it receives. On shutdown it drains every notification already
/// queued before it exits.
#[derive(Debug)]
pub struct ReclamationWatcher {
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReclamationWatcher {
    pub(crate) fn spawn(name: &str, shared: Arc<RegistryShared>) -> CleanupResult<Self> {
        let (stop_sender, stop_receiver) = channel::bounded::<()>(1);
        let notifications = shared.notifications();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(stop_receiver) -> _ => {
                            let drained = shared.drain_pending();
                            tracing::debug!(drained, "reclamation watcher stopping");
                            break;
                        },
                        recv(notifications) -> notification => match notification {
                            Ok(watch) => {
                                tracing::trace!(%watch, "reclamation notification");
                                shared.trigger_watch(watch);
                            }
                            Err(_) => break,
                        },
                    }
                }
            })
            .map_err(|error| CleanupError::ThreadSpawn {
                thread: name.to_string(),
                reason: error.to_string(),
            })?;

        Ok(Self {
            stop: Some(stop_sender),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Drain queued notifications, then stop and join the loop.
    ///
    /// Called on the watcher thread itself, only signals the stop.
    pub fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Released from inside a cleanup action; the loop exits on its own
            // once that action returns and it sees the stop signal.
            tracing::debug!("reclamation watcher stopped from its own thread");
            return;
        }
        if handle.join().is_err() {
            tracing::error!("reclamation watcher panicked");
        }
    }
}

impl Drop for ReclamationWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
