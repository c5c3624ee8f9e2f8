//! Process-wide registry
//!
//! The registry is created once, either explicitly through [`init`] or lazily
//! with the default configuration on first access. Access after initialization
//! takes no lock.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::cleanup::CleanupRegistry;
use crate::config::RegistryConfig;
use crate::error::{CleanupError, CleanupResult};

static GLOBAL_REGISTRY: OnceCell<Arc<CleanupRegistry>> = OnceCell::new();

/// Install the process-wide registry.
///
/// Fails with `AlreadyInitialized` if a registry was already installed, by an
/// earlier `init` or by lazy initialization.
pub fn init(config: RegistryConfig) -> CleanupResult<&'static Arc<CleanupRegistry>> {
    let mut installed = false;
    let registry = GLOBAL_REGISTRY.get_or_try_init(|| {
        installed = true;
        CleanupRegistry::new(config).map(Arc::new)
    })?;

    if installed {
        tracing::debug!("process-wide cleanup registry installed");
        Ok(registry)
    } else {
        Err(CleanupError::AlreadyInitialized)
    }
}

/// The process-wide registry, initialized with `RegistryConfig::from_env()`
/// on first use.
pub fn registry() -> CleanupResult<&'static Arc<CleanupRegistry>> {
    GLOBAL_REGISTRY.get_or_try_init(|| CleanupRegistry::new(RegistryConfig::from_env()).map(Arc::new))
}

/// The process-wide registry, if one has been installed
pub fn try_registry() -> Option<&'static Arc<CleanupRegistry>> {
    GLOBAL_REGISTRY.get()
}
