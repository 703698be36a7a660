use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use pf_core::types::Platform;
use tracing::{info, warn};

use crate::adapter::Adapter;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two adapters claimed the same platform at startup.
    #[error("platform `{platform}` already served by adapter `{existing}`")]
    DuplicatePlatform { platform: String, existing: String },
    #[error("adapter `{0}` declares no platforms")]
    NoPlatforms(String),
}

// ---------------------------------------------------------------------------
// AdapterRegistry
// ---------------------------------------------------------------------------

/// Process-level adapter registry, built once at startup and shared.
///
/// Resolution is by platform id; at most one enabled adapter serves a
/// platform. Disabling (the `AuthExpired` path) is runtime state and does
/// not unregister the adapter, so re-enabling after credential repair needs
/// no restart.
pub struct AdapterRegistry {
    by_platform: HashMap<Platform, Arc<dyn Adapter>>,
    disabled: RwLock<HashSet<Platform>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            by_platform: HashMap::new(),
            disabled: RwLock::new(HashSet::new()),
        }
    }

    /// Register an adapter for every platform it declares. Collisions are
    /// startup errors.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> Result<(), RegistryError> {
        let platforms = adapter.platforms();
        if platforms.is_empty() {
            return Err(RegistryError::NoPlatforms(adapter.id().to_string()));
        }
        for platform in &platforms {
            if let Some(existing) = self.by_platform.get(platform) {
                return Err(RegistryError::DuplicatePlatform {
                    platform: platform.clone(),
                    existing: existing.id().to_string(),
                });
            }
        }
        for platform in platforms {
            info!(adapter = adapter.id(), platform = %platform, "adapter registered");
            self.by_platform.insert(platform, Arc::clone(&adapter));
        }
        Ok(())
    }

    /// Resolve the enabled adapter for a platform.
    pub fn get(&self, platform: &str) -> Option<Arc<dyn Adapter>> {
        if self.is_disabled(platform) {
            return None;
        }
        self.by_platform.get(platform).cloned()
    }

    /// Resolve even when disabled (operator tooling).
    pub fn get_any(&self, platform: &str) -> Option<Arc<dyn Adapter>> {
        self.by_platform.get(platform).cloned()
    }

    /// Disable a platform's adapter, preserving queue state. Used when an
    /// adapter reports expired credentials.
    pub fn disable(&self, platform: &str) {
        warn!(platform, "adapter disabled");
        self.disabled
            .write()
            .expect("registry lock poisoned")
            .insert(platform.to_string());
    }

    /// Re-enable after credential repair.
    pub fn enable(&self, platform: &str) {
        info!(platform, "adapter re-enabled");
        self.disabled
            .write()
            .expect("registry lock poisoned")
            .remove(platform);
    }

    pub fn is_disabled(&self, platform: &str) -> bool {
        self.disabled
            .read()
            .expect("registry lock poisoned")
            .contains(platform)
    }

    /// All registered platform ids, sorted.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.by_platform.keys().cloned().collect();
        platforms.sort();
        platforms
    }

    pub fn len(&self) -> usize {
        self.by_platform.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_platform.is_empty()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
