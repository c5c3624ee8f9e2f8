//! Registry configuration

use std::time::Duration;

/// Default interval between reclamation passes of the built-in facility
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for a [`CleanupRegistry`](crate::CleanupRegistry).
///
/// # Examples
///
/// ```
/// use reclaim::RegistryConfig;
/// use std::time::Duration;
///
/// let config = RegistryConfig::default()
///     .with_sweep_interval(Some(Duration::from_millis(5)))
///     .with_watch_capacity(Some(1024))
///     .with_watcher(false);
///
/// assert_eq!(config.watch_capacity, Some(1024));
/// assert!(!config.start_watcher);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Name of the reclamation watcher thread
    pub watcher_thread_name: String,
    /// Start the watcher thread with the registry. When false, notifications
    /// are processed only by `drain_pending`.
    pub start_watcher: bool,
    /// Interval of the built-in facility's sweeper; `None` disables it
    pub sweep_interval: Option<Duration>,
    /// Maximum live watches of the built-in facility
    pub watch_capacity: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            watcher_thread_name: "reclamation-watcher".to_string(),
            start_watcher: true,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            watch_capacity: None,
        }
    }
}

impl RegistryConfig {
    pub fn with_watcher_thread_name(mut self, name: impl Into<String>) -> Self {
        self.watcher_thread_name = name.into();
        self
    }

    pub fn with_watcher(mut self, start: bool) -> Self {
        self.start_watcher = start;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_watch_capacity(mut self, capacity: Option<usize>) -> Self {
        self.watch_capacity = capacity;
        self
    }

    /// Defaults overridden by `RECLAIM_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`.
    ///
    /// Recognized keys: `RECLAIM_SWEEP_INTERVAL_MS` (0 disables the sweeper),
    /// `RECLAIM_WATCH_CAPACITY`, `RECLAIM_START_WATCHER`. Unparseable values
    /// are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("RECLAIM_SWEEP_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.sweep_interval = None,
                Ok(ms) => config.sweep_interval = Some(Duration::from_millis(ms)),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid RECLAIM_SWEEP_INTERVAL_MS"),
            }
        }

        if let Some(raw) = lookup("RECLAIM_WATCH_CAPACITY") {
            match raw.trim().parse::<usize>() {
                Ok(capacity) => config.watch_capacity = Some(capacity),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid RECLAIM_WATCH_CAPACITY"),
            }
        }

        if let Some(raw) = lookup("RECLAIM_START_WATCHER") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.start_watcher = true,
                "0" | "false" | "no" | "off" => config.start_watcher = false,
                _ => tracing::warn!(value = %raw, "ignoring invalid RECLAIM_START_WATCHER"),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.watcher_thread_name, "reclamation-watcher");
        assert!(config.start_watcher);
        assert_eq!(config.sweep_interval, Some(DEFAULT_SWEEP_INTERVAL));
        assert_eq!(config.watch_capacity, None);
    }

    #[test]
    fn test_lookup_overrides() {
        let config = RegistryConfig::from_lookup(lookup(&[
            ("RECLAIM_SWEEP_INTERVAL_MS", "0"),
            ("RECLAIM_WATCH_CAPACITY", "64"),
            ("RECLAIM_START_WATCHER", "off"),
        ]));

        assert_eq!(config.sweep_interval, None);
        assert_eq!(config.watch_capacity, Some(64));
        assert!(!config.start_watcher);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = RegistryConfig::from_lookup(lookup(&[
            ("RECLAIM_SWEEP_INTERVAL_MS", "soon"),
            ("RECLAIM_WATCH_CAPACITY", "-1"),
            ("RECLAIM_START_WATCHER", "maybe"),
        ]));

        assert_eq!(config, RegistryConfig::default());
    }
}
