//! Name-keyed registries of item managers with bulk lifecycle and
//! mutation-safe snapshots.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use dh_domain::config::ConfigManager;
use dh_domain::{Error, Result};

use crate::sessions::{
    community_session_manager, factory_manager, CorePlusSessionFactoryManager,
    SessionManager,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase + snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Progress of a registry's (possibly asynchronous) initialization.
///
/// Transitions are monotonic: NOT_STARTED → SIMPLE → LOADING →
/// (COMPLETED | PARTIAL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationPhase {
    NotStarted,
    /// Synchronously loaded entries are ready; no async discovery runs.
    Simple,
    /// Background enterprise discovery is still in flight.
    Loading,
    /// Discovery finished with at least one per-source error.
    Partial,
    Completed,
}

impl InitializationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitializationPhase::NotStarted => "NOT_STARTED",
            InitializationPhase::Simple => "SIMPLE",
            InitializationPhase::Loading => "LOADING",
            InitializationPhase::Partial => "PARTIAL",
            InitializationPhase::Completed => "COMPLETED",
        }
    }
}

/// Immutable copy of a registry's contents at one instant: the item map,
/// the initialization phase, and any per-source initialization errors.
///
/// The maps are owned copies; mutating them never affects the registry.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot<T> {
    pub items: HashMap<String, T>,
    pub initialization_phase: InitializationPhase,
    pub initialization_errors: HashMap<String, String>,
}

impl<T> RegistrySnapshot<T> {
    /// Snapshot of a registry with no asynchronous discovery.
    pub fn simple(items: HashMap<String, T>) -> Self {
        Self {
            items,
            initialization_phase: InitializationPhase::Simple,
            initialization_errors: HashMap::new(),
        }
    }

    pub fn with_initialization(
        items: HashMap<String, T>,
        phase: InitializationPhase,
        errors: HashMap<String, String>,
    ) -> Self {
        Self {
            items,
            initialization_phase: phase,
            initialization_errors: errors,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generic registry state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RegistryState<T> {
    items: HashMap<String, T>,
    initialized: bool,
}

/// Shared registry machinery: an item map plus an initialization flag
/// behind one async lock. `get`, `get_all`, and `close` fail with the
/// *not-initialized* error until items are installed.
pub struct BaseRegistry<T: Clone> {
    name: &'static str,
    state: Mutex<RegistryState<T>>,
}

impl<T: Clone> BaseRegistry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(RegistryState {
                items: HashMap::new(),
                initialized: false,
            }),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// Install loaded items, marking the registry initialized. A second
    /// install is ignored, which makes concrete `initialize` calls
    /// idempotent.
    pub async fn install(&self, items: HashMap<String, T>) {
        let mut state = self.state.lock().await;
        if state.initialized {
            tracing::debug!(registry = self.name, "already initialized; skipping");
            return;
        }
        tracing::info!(registry = self.name, count = items.len(), "registry initialized");
        state.items = items;
        state.initialized = true;
    }

    pub async fn get(&self, name: &str) -> Result<T> {
        let state = self.state.lock().await;
        if !state.initialized {
            return Err(Error::NotInitialized(self.name.to_string()));
        }
        state.items.get(name).cloned().ok_or_else(|| {
            Error::NotFound(format!(
                "No item with name '{name}' found in {}",
                self.name
            ))
        })
    }

    pub async fn get_all(&self) -> Result<RegistrySnapshot<T>> {
        let state = self.state.lock().await;
        if !state.initialized {
            return Err(Error::NotInitialized(self.name.to_string()));
        }
        Ok(RegistrySnapshot::simple(state.items.clone()))
    }

    /// Drain every item through `close_item`, clear the map, and reset to
    /// uninitialized so a later `initialize` is allowed.
    pub async fn close_with<F, Fut>(&self, close_item: F) -> Result<()>
    where
        F: Fn(String, T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(Error::NotInitialized(self.name.to_string()));
        }
        let items: Vec<(String, T)> = state.items.drain().collect();
        for (name, item) in items {
            close_item(name, item).await;
        }
        state.initialized = false;
        tracing::info!(registry = self.name, "registry closed and reset");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CommunitySessionRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One community session manager per `community.sessions` entry.
pub struct CommunitySessionRegistry {
    base: BaseRegistry<Arc<SessionManager>>,
}

impl CommunitySessionRegistry {
    pub fn new() -> Self {
        Self {
            base: BaseRegistry::new("CommunitySessionRegistry"),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.base.is_initialized().await
    }

    pub async fn initialize(&self, config_manager: &ConfigManager) -> Result<()> {
        if self.base.is_initialized().await {
            return Ok(());
        }
        let config = config_manager.get_config().await?;
        let mut items: HashMap<String, Arc<SessionManager>> = HashMap::new();
        if let Some(community) = &config.community {
            for (name, session_config) in &community.sessions {
                items.insert(
                    name.clone(),
                    Arc::new(community_session_manager(name, session_config)),
                );
            }
        }
        self.base.install(items).await;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<SessionManager>> {
        self.base.get(name).await
    }

    pub async fn get_all(&self) -> Result<RegistrySnapshot<Arc<SessionManager>>> {
        self.base.get_all().await
    }

    pub async fn close(&self) -> Result<()> {
        self.base
            .close_with(|name, manager: Arc<SessionManager>| async move {
                if let Err(e) = manager.close().await {
                    tracing::warn!(session = %name, error = %e, "error closing session manager");
                }
            })
            .await
    }
}

impl Default for CommunitySessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CorePlusSessionFactoryRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One factory manager per `enterprise.systems` entry.
pub struct CorePlusSessionFactoryRegistry {
    base: BaseRegistry<Arc<CorePlusSessionFactoryManager>>,
}

impl CorePlusSessionFactoryRegistry {
    pub fn new() -> Self {
        Self {
            base: BaseRegistry::new("CorePlusSessionFactoryRegistry"),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.base.is_initialized().await
    }

    pub async fn initialize(&self, config_manager: &ConfigManager) -> Result<()> {
        if self.base.is_initialized().await {
            return Ok(());
        }
        let config = config_manager.get_config().await?;
        let systems = config
            .enterprise
            .as_ref()
            .map(|e| &e.systems)
            .filter(|s| !s.is_empty());

        let mut items: HashMap<String, Arc<CorePlusSessionFactoryManager>> = HashMap::new();
        if let Some(systems) = systems {
            if !dh_client::ENTERPRISE_AVAILABLE {
                return Err(Error::Config(
                    "Enterprise factory configurations found, but this build has no \
                     enterprise (Core+) support; rebuild with the 'coreplus' feature \
                     enabled to use enterprise systems"
                        .to_string(),
                ));
            }
            for (name, system_config) in systems {
                items.insert(name.clone(), Arc::new(factory_manager(name, system_config)));
            }
        }
        self.base.install(items).await;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Arc<CorePlusSessionFactoryManager>> {
        self.base.get(name).await
    }

    pub async fn get_all(
        &self,
    ) -> Result<RegistrySnapshot<Arc<CorePlusSessionFactoryManager>>> {
        self.base.get_all().await
    }

    pub async fn close(&self) -> Result<()> {
        self.base
            .close_with(|name, manager: Arc<CorePlusSessionFactoryManager>| async move {
                if let Err(e) = manager.close().await {
                    tracing::warn!(factory = %name, error = %e, "error closing factory manager");
                }
            })
            .await
    }
}

impl Default for CorePlusSessionFactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
