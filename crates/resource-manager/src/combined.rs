//! The combined session registry: one namespace over community sessions,
//! dynamically registered sessions, and enterprise sessions discovered
//! behind factories.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use dh_client::BaseSession;
use dh_domain::config::ConfigManager;
use dh_domain::{Error, Result};

use crate::instance_tracker::InstanceTracker;
use crate::registry::{
    CommunitySessionRegistry, CorePlusSessionFactoryRegistry, InitializationPhase,
    RegistrySnapshot,
};
use crate::sessions::{
    enterprise_session_manager, CorePlusSessionFactoryManager, SessionCreationFn,
    SessionHandle, SessionManager,
};

const REGISTRY_NAME: &str = "CombinedSessionRegistry";

/// Creation function that connects to an existing enterprise session
/// through its (lazily constructed) factory.
pub fn factory_bound_creation(mgr: Arc<CorePlusSessionFactoryManager>) -> SessionCreationFn {
    Arc::new(move |_source, name| {
        let mgr = mgr.clone();
        Box::pin(async move {
            let factory = mgr.get().await?;
            let session = factory.connect_to_session(&name).await?;
            Ok(Arc::new(session) as Arc<dyn BaseSession>)
        })
    })
}

struct CombinedState {
    initialized: bool,
    phase: InitializationPhase,
    errors: HashMap<String, String>,
    /// Enterprise sessions discovered behind factories, keyed by fqname.
    enterprise_sessions: HashMap<String, SessionHandle>,
    /// Sessions registered through `add_session`, keyed by fqname.
    added_sessions: HashMap<String, SessionHandle>,
    pending_factories: usize,
    discovery_tasks: Vec<JoinHandle<()>>,
}

/// Fuses the community and enterprise-factory registries into a single
/// namespace keyed by fully qualified names, drives asynchronous enterprise
/// session discovery, and tracks dynamically registered sessions.
pub struct CombinedSessionRegistry {
    community: CommunitySessionRegistry,
    factories: CorePlusSessionFactoryRegistry,
    state: Mutex<CombinedState>,
    tracker: Option<Arc<InstanceTracker>>,
}

impl CombinedSessionRegistry {
    pub fn new(tracker: Option<Arc<InstanceTracker>>) -> Self {
        Self {
            community: CommunitySessionRegistry::new(),
            factories: CorePlusSessionFactoryRegistry::new(),
            state: Mutex::new(CombinedState {
                initialized: false,
                phase: InitializationPhase::NotStarted,
                errors: HashMap::new(),
                enterprise_sessions: HashMap::new(),
                added_sessions: HashMap::new(),
                pending_factories: 0,
                discovery_tasks: Vec::new(),
            }),
            tracker,
        }
    }

    pub fn instance_tracker(&self) -> Option<&Arc<InstanceTracker>> {
        self.tracker.as_ref()
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if !self.state.lock().await.initialized {
            return Err(Error::NotInitialized(REGISTRY_NAME.to_string()));
        }
        Ok(())
    }

    /// Three-phase initialization.
    ///
    /// The community and factory leaves load synchronously (SIMPLE); one
    /// background task per factory then probes it and enumerates its
    /// pre-existing sessions (LOADING). Per-factory failures land in the
    /// snapshot's `initialization_errors` and never fail the registry;
    /// discovery finishes in COMPLETED, or PARTIAL when any factory
    /// errored.
    pub async fn initialize(
        self: &Arc<Self>,
        config_manager: &ConfigManager,
    ) -> Result<()> {
        if self.state.lock().await.initialized {
            tracing::debug!(registry = REGISTRY_NAME, "already initialized; skipping");
            return Ok(());
        }

        self.community.initialize(config_manager).await?;
        self.factories.initialize(config_manager).await?;
        let factory_snapshot = self.factories.get_all().await?;

        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }
        state.initialized = true;
        state.phase = InitializationPhase::Simple;

        if factory_snapshot.items.is_empty() {
            tracing::info!(registry = REGISTRY_NAME, "initialized; no enterprise factories");
            return Ok(());
        }

        state.phase = InitializationPhase::Loading;
        state.pending_factories = factory_snapshot.items.len();
        tracing::info!(
            registry = REGISTRY_NAME,
            factories = state.pending_factories,
            "initialized; enterprise discovery running in background"
        );
        for (source, manager) in factory_snapshot.items {
            let registry = self.clone();
            state.discovery_tasks.push(tokio::spawn(async move {
                registry.discover_factory(source, manager).await;
            }));
        }
        Ok(())
    }

    async fn discover_factory(
        self: Arc<Self>,
        source: String,
        manager: Arc<CorePlusSessionFactoryManager>,
    ) {
        let discovered = async {
            let factory = manager.get().await?;
            if !factory.ping().await? {
                return Err(Error::Connection(format!(
                    "enterprise system '{source}' did not answer ping"
                )));
            }
            factory.session_names().await
        }
        .await;

        let mut state = self.state.lock().await;
        if !state.initialized {
            // Registry closed while we were probing.
            return;
        }

        match discovered {
            Ok(session_names) => {
                tracing::info!(
                    system = %source,
                    sessions = session_names.len(),
                    "enterprise factory discovery complete"
                );
                for name in session_names {
                    let fq_name = SessionManager::make_full_name(
                        crate::manager::SystemType::Enterprise,
                        &source,
                        &name,
                    );
                    if state.enterprise_sessions.contains_key(&fq_name)
                        || state.added_sessions.contains_key(&fq_name)
                    {
                        continue;
                    }
                    let session_manager = enterprise_session_manager(
                        &source,
                        &name,
                        factory_bound_creation(manager.clone()),
                    );
                    state
                        .enterprise_sessions
                        .insert(fq_name, SessionHandle::Configured(Arc::new(session_manager)));
                }
            }
            Err(e) => {
                tracing::warn!(system = %source, error = %e, "enterprise factory discovery failed");
                state.errors.insert(source.clone(), e.to_string());
            }
        }

        state.pending_factories = state.pending_factories.saturating_sub(1);
        if state.pending_factories == 0 {
            state.phase = if state.errors.is_empty() {
                InitializationPhase::Completed
            } else {
                InitializationPhase::Partial
            };
            tracing::info!(
                registry = REGISTRY_NAME,
                phase = state.phase.as_str(),
                "enterprise discovery finished"
            );
        }
    }

    /// Resolve a fully qualified session id: community entries by their
    /// simple name, then dynamically added entries, then discovered
    /// enterprise entries.
    pub async fn get(&self, session_id: &str) -> Result<SessionHandle> {
        self.ensure_initialized().await?;

        let parts: Vec<&str> = session_id.splitn(3, ':').collect();
        let [system_type, source, name] = parts.as_slice() else {
            return Err(Error::NotFound(format!(
                "Session '{session_id}' not found (expected '{{type}}:{{source}}:{{name}}')"
            )));
        };

        if *system_type == "community" && *source == "community" {
            return match self.community.get(name).await {
                Ok(manager) => Ok(SessionHandle::Configured(manager)),
                Err(_) => Err(Error::NotFound(format!("Session '{session_id}' not found"))),
            };
        }

        let state = self.state.lock().await;
        state
            .added_sessions
            .get(session_id)
            .or_else(|| state.enterprise_sessions.get(session_id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Session '{session_id}' not found")))
    }

    /// Snapshot of every session handle keyed by fqname, plus the discovery
    /// phase and per-source errors captured so far.
    pub async fn get_all(&self) -> Result<RegistrySnapshot<SessionHandle>> {
        self.ensure_initialized().await?;

        let community = self.community.get_all().await?;
        let state = self.state.lock().await;

        let mut items: HashMap<String, SessionHandle> = HashMap::new();
        for manager in community.items.into_values() {
            items.insert(manager.full_name(), SessionHandle::Configured(manager));
        }
        for (fq_name, handle) in &state.added_sessions {
            items.insert(fq_name.clone(), handle.clone());
        }
        for (fq_name, handle) in &state.enterprise_sessions {
            items.insert(fq_name.clone(), handle.clone());
        }

        Ok(RegistrySnapshot::with_initialization(
            items,
            state.phase,
            state.errors.clone(),
        ))
    }

    /// Register a dynamically created session. Fails when the fully
    /// qualified name is already present anywhere in the namespace.
    pub async fn add_session(&self, handle: SessionHandle) -> Result<()> {
        self.ensure_initialized().await?;
        let fq_name = handle.full_name();
        if self.get(&fq_name).await.is_ok() {
            return Err(Error::SessionCreation(format!(
                "session '{fq_name}' already exists"
            )));
        }
        let mut state = self.state.lock().await;
        state.added_sessions.insert(fq_name.clone(), handle);
        tracing::info!(session = %fq_name, "session registered");
        Ok(())
    }

    /// Remove a session by fqname, handing ownership back to the caller
    /// (which is responsible for closing it). No-op when absent.
    pub async fn remove_session(&self, fq_name: &str) -> Result<Option<SessionHandle>> {
        self.ensure_initialized().await?;
        let mut state = self.state.lock().await;
        let removed = state
            .added_sessions
            .remove(fq_name)
            .or_else(|| state.enterprise_sessions.remove(fq_name));
        if removed.is_some() {
            tracing::info!(session = %fq_name, "session removed from registry");
        }
        Ok(removed)
    }

    /// Number of sessions currently registered via `add_session`.
    /// Configured leaves and factory-discovered sessions never count.
    pub async fn count_added_sessions(&self) -> Result<usize> {
        self.ensure_initialized().await?;
        Ok(self.state.lock().await.added_sessions.len())
    }

    /// Number of added sessions belonging to one source (used for the
    /// per-system concurrency cap).
    pub async fn count_added_sessions_for_source(&self, source: &str) -> Result<usize> {
        self.ensure_initialized().await?;
        let state = self.state.lock().await;
        Ok(state
            .added_sessions
            .values()
            .filter(|handle| handle.source() == source)
            .count())
    }

    pub async fn factory(&self, name: &str) -> Result<Arc<CorePlusSessionFactoryManager>> {
        self.ensure_initialized().await?;
        self.factories.get(name).await
    }

    pub async fn factories(
        &self,
    ) -> Result<RegistrySnapshot<Arc<CorePlusSessionFactoryManager>>> {
        self.ensure_initialized().await?;
        self.factories.get_all().await
    }

    /// The current discovery phase and captured per-source errors.
    pub async fn initialization_status(
        &self,
    ) -> Result<(InitializationPhase, HashMap<String, String>)> {
        self.ensure_initialized().await?;
        let state = self.state.lock().await;
        Ok((state.phase, state.errors.clone()))
    }

    /// Close every session and both leaf registries, then reset to the
    /// uninitialized state so a later `initialize` is allowed.
    pub async fn close(&self) -> Result<()> {
        let (added, enterprise) = {
            let mut state = self.state.lock().await;
            if !state.initialized {
                return Err(Error::NotInitialized(REGISTRY_NAME.to_string()));
            }
            for task in state.discovery_tasks.drain(..) {
                task.abort();
            }
            state.initialized = false;
            state.phase = InitializationPhase::NotStarted;
            state.errors.clear();
            state.pending_factories = 0;
            (
                std::mem::take(&mut state.added_sessions),
                std::mem::take(&mut state.enterprise_sessions),
            )
        };

        for (fq_name, handle) in added.into_iter().chain(enterprise) {
            if let Err(e) = handle.close().await {
                tracing::warn!(session = %fq_name, error = %e, "error closing session");
            }
        }
        if let Err(e) = self.community.close().await {
            tracing::warn!(error = %e, "error closing community session registry");
        }
        if let Err(e) = self.factories.close().await {
            tracing::warn!(error = %e, "error closing factory registry");
        }
        tracing::info!(registry = REGISTRY_NAME, "closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::sessions::community_session_manager;

    fn config_manager(json: &str) -> (ConfigManager, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();
        (ConfigManager::with_config_path(file.path()), file)
    }

    const COMMUNITY_ONLY: &str = r#"{
        "community": {"sessions": {"local": {"host": "localhost", "port": 10000}}}
    }"#;

    fn dynamic_style_handle(name: &str) -> SessionHandle {
        // A configured manager parked under the dynamic source, standing in
        // for a launched session without any subprocess.
        let create: crate::manager::ItemCreator<dyn BaseSession> = Arc::new(|| {
            Box::pin(async move {
                Err::<Arc<dyn BaseSession>, _>(Error::SessionCreation(
                    "test handle never connects".into(),
                ))
            })
        });
        let probe: crate::manager::LivenessProber<dyn BaseSession> =
            Arc::new(|_session| Box::pin(async move { Ok(true) }));
        let release: crate::manager::ItemCloser<dyn BaseSession> =
            Arc::new(|_session| Box::pin(async move { Ok(()) }));
        let manager = crate::manager::ItemManager::new(
            crate::manager::SystemType::Community,
            "dynamic",
            name,
            create,
            probe,
            release,
        );
        SessionHandle::Configured(Arc::new(manager))
    }

    #[tokio::test]
    async fn methods_gate_on_initialize() {
        let registry = Arc::new(CombinedSessionRegistry::new(None));
        assert!(matches!(
            registry.get("community:community:local").await.unwrap_err(),
            Error::NotInitialized(_)
        ));
        assert!(matches!(
            registry.get_all().await.unwrap_err(),
            Error::NotInitialized(_)
        ));
        assert!(matches!(
            registry.close().await.unwrap_err(),
            Error::NotInitialized(_)
        ));
        assert!(matches!(
            registry.count_added_sessions().await.unwrap_err(),
            Error::NotInitialized(_)
        ));
    }

    #[tokio::test]
    async fn community_only_initializes_simple() {
        let (config, _file) = config_manager(COMMUNITY_ONLY);
        let registry = Arc::new(CombinedSessionRegistry::new(None));
        registry.initialize(&config).await.unwrap();

        let snapshot = registry.get_all().await.unwrap();
        assert_eq!(snapshot.initialization_phase, InitializationPhase::Simple);
        assert!(snapshot.initialization_errors.is_empty());
        assert_eq!(snapshot.items.len(), 1);
        assert!(snapshot.items.contains_key("community:community:local"));

        // Every surfaced name resolves via get().
        for fq_name in snapshot.items.keys() {
            registry.get(fq_name).await.unwrap();
        }
    }

    #[tokio::test]
    async fn get_rejects_unknown_and_malformed_names() {
        let (config, _file) = config_manager(COMMUNITY_ONLY);
        let registry = Arc::new(CombinedSessionRegistry::new(None));
        registry.initialize(&config).await.unwrap();

        let err = registry.get("community:community:ghost").await.unwrap_err();
        assert!(err.to_string().contains("'community:community:ghost' not found"));

        let err = registry.get("just-a-name").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn add_remove_and_count_sessions() {
        let (config, _file) = config_manager(COMMUNITY_ONLY);
        let registry = Arc::new(CombinedSessionRegistry::new(None));
        registry.initialize(&config).await.unwrap();

        assert_eq!(registry.count_added_sessions().await.unwrap(), 0);

        registry.add_session(dynamic_style_handle("s1")).await.unwrap();
        registry.add_session(dynamic_style_handle("s2")).await.unwrap();
        assert_eq!(registry.count_added_sessions().await.unwrap(), 2);
        assert_eq!(
            registry
                .count_added_sessions_for_source("dynamic")
                .await
                .unwrap(),
            2
        );

        // Configured leaves never count.
        let snapshot = registry.get_all().await.unwrap();
        assert_eq!(snapshot.items.len(), 3);

        // Duplicate names are rejected.
        let err = registry
            .add_session(dynamic_style_handle("s1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // Removal hands the handle back; removing again is a no-op.
        let removed = registry
            .remove_session("community:dynamic:s1")
            .await
            .unwrap();
        assert!(removed.is_some());
        assert!(registry
            .remove_session("community:dynamic:s1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(registry.count_added_sessions().await.unwrap(), 1);
        assert!(registry.get("community:dynamic:s1").await.is_err());
    }

    #[tokio::test]
    async fn snapshot_mutation_does_not_leak_back() {
        let (config, _file) = config_manager(COMMUNITY_ONLY);
        let registry = Arc::new(CombinedSessionRegistry::new(None));
        registry.initialize(&config).await.unwrap();

        let mut snapshot = registry.get_all().await.unwrap();
        snapshot.items.insert(
            "community:community:phantom".into(),
            SessionHandle::Configured(Arc::new(community_session_manager(
                "phantom",
                &Default::default(),
            ))),
        );

        let fresh = registry.get_all().await.unwrap();
        assert!(!fresh.items.contains_key("community:community:phantom"));
    }

    #[tokio::test]
    async fn unreachable_factory_lands_in_initialization_errors() {
        let (config, _file) = config_manager(
            r#"{
                "community": {"sessions": {"local": {"host": "localhost"}}},
                "enterprise": {"systems": {
                    "prod": {"url": "http://127.0.0.1:1", "auth_type": "interactive"}
                }}
            }"#,
        );
        let registry = Arc::new(CombinedSessionRegistry::new(None));
        registry.initialize(&config).await.unwrap();

        // Discovery runs in the background; the registry is usable while
        // LOADING and the phase settles to PARTIAL once the probe fails.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let (phase, errors) = registry.initialization_status().await.unwrap();
            match phase {
                InitializationPhase::Loading => {
                    registry.get("community:community:local").await.unwrap();
                    assert!(tokio::time::Instant::now() < deadline, "discovery stuck");
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                InitializationPhase::Partial => {
                    assert!(errors.contains_key("prod"), "errors keyed by source: {errors:?}");
                    break;
                }
                other => panic!("unexpected phase {other:?}"),
            }
        }

        let snapshot = registry.get_all().await.unwrap();
        assert_eq!(
            snapshot.initialization_phase,
            InitializationPhase::Partial
        );
        assert!(snapshot.initialization_errors.contains_key("prod"));
    }

    #[tokio::test]
    async fn close_resets_and_allows_reinitialize() {
        let (config, _file) = config_manager(COMMUNITY_ONLY);
        let registry = Arc::new(CombinedSessionRegistry::new(None));
        registry.initialize(&config).await.unwrap();
        registry.add_session(dynamic_style_handle("s1")).await.unwrap();

        registry.close().await.unwrap();
        assert!(matches!(
            registry.get_all().await.unwrap_err(),
            Error::NotInitialized(_)
        ));

        registry.initialize(&config).await.unwrap();
        let snapshot = registry.get_all().await.unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(registry.count_added_sessions().await.unwrap(), 0);
    }
}
