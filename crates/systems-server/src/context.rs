//! Shared per-call context for tool handlers.

use std::sync::Arc;

use tokio::sync::Mutex;

use dh_domain::config::ConfigManager;
use dh_resource_manager::{CombinedSessionRegistry, InstanceTracker};

/// Everything a tool handler may read: the config store, the combined
/// session registry, and (when registration succeeded) the instance
/// tracker. This is the dependency-injection seam — no tool state lives in
/// module globals, so multiple isolated servers can share one process.
#[derive(Clone)]
pub struct ToolContext {
    pub config_manager: Arc<ConfigManager>,
    pub session_registry: Arc<CombinedSessionRegistry>,
    pub instance_tracker: Option<Arc<InstanceTracker>>,
    /// Serializes full `refresh` reloads; concurrent reads proceed.
    pub refresh_lock: Arc<Mutex<()>>,
}

impl ToolContext {
    pub fn new(
        config_manager: Arc<ConfigManager>,
        session_registry: Arc<CombinedSessionRegistry>,
        instance_tracker: Option<Arc<InstanceTracker>>,
    ) -> Self {
        Self {
            config_manager,
            session_registry,
            instance_tracker,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }
}
