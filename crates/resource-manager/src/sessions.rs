//! Session-manager variants over the generic [`ItemManager`] machinery.
//!
//! Each variant binds a typed creation strategy and liveness probe:
//! community managers build sessions from validated config, enterprise
//! managers run a caller-supplied creation function, factory managers mint
//! enterprise factories, and dynamic community managers additionally own
//! the launched subprocess backing their session.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use dh_client::{BaseSession, CorePlusSessionFactory, CoreSession};
use dh_domain::config::{CommunitySessionConfig, EnterpriseSystemConfig};
use dh_domain::{Error, Result};

use crate::instance_tracker::InstanceTracker;
use crate::launcher::LaunchedWorker;
use crate::manager::{
    ItemCloser, ItemCreator, ItemManager, LivenessProber, ResourceLivenessStatus,
    SystemType,
};

/// A manager holding one worker session.
pub type SessionManager = ItemManager<dyn BaseSession>;

/// A manager holding one enterprise session factory.
pub type CorePlusSessionFactoryManager = ItemManager<CorePlusSessionFactory>;

/// `(source, name) -> session` strategy used by enterprise session
/// managers, typically bound by a factory manager.
pub type SessionCreationFn = Arc<
    dyn Fn(String, String) -> BoxFuture<'static, Result<Arc<dyn BaseSession>>>
        + Send
        + Sync,
>;

fn session_prober() -> LivenessProber<dyn BaseSession> {
    Arc::new(|session| Box::pin(async move { Ok(session.is_alive().await) }))
}

fn session_closer() -> ItemCloser<dyn BaseSession> {
    Arc::new(|session| Box::pin(async move { session.close().await }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Variant constructors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn community_manager_with_source(
    source: &str,
    name: &str,
    config: &CommunitySessionConfig,
) -> SessionManager {
    let session_name = name.to_string();
    let session_config = config.clone();
    let create: ItemCreator<dyn BaseSession> = Arc::new(move || {
        let session_name = session_name.clone();
        let session_config = session_config.clone();
        Box::pin(async move {
            let session = CoreSession::from_config(&session_name, &session_config).await?;
            Ok(Arc::new(session) as Arc<dyn BaseSession>)
        })
    });
    ItemManager::new(
        SystemType::Community,
        source,
        name,
        create,
        session_prober(),
        session_closer(),
    )
}

/// Manager for a configured community session.
pub fn community_session_manager(
    name: &str,
    config: &CommunitySessionConfig,
) -> SessionManager {
    community_manager_with_source("community", name, config)
}

/// Manager for an enterprise session reached through a creation function.
///
/// Exists so a session can be registered into the combined registry before
/// any factory RPC has been issued for it.
pub fn enterprise_session_manager(
    source: &str,
    name: &str,
    creation: SessionCreationFn,
) -> SessionManager {
    let creation_source = source.to_string();
    let creation_name = name.to_string();
    let create: ItemCreator<dyn BaseSession> = Arc::new(move || {
        let creation = creation.clone();
        let source = creation_source.clone();
        let name = creation_name.clone();
        Box::pin(async move {
            creation(source, name.clone()).await.map_err(|e| {
                Error::SessionCreation(format!(
                    "failed to create enterprise session for {name}: {e}"
                ))
            })
        })
    });
    ItemManager::new(
        SystemType::Enterprise,
        source,
        name,
        create,
        session_prober(),
        session_closer(),
    )
}

/// Manager for an enterprise session factory; liveness is the factory ping.
pub fn factory_manager(
    name: &str,
    config: &EnterpriseSystemConfig,
) -> CorePlusSessionFactoryManager {
    let system_name = name.to_string();
    let system_config = config.clone();
    let create: ItemCreator<CorePlusSessionFactory> = Arc::new(move || {
        let system_name = system_name.clone();
        let system_config = system_config.clone();
        Box::pin(async move {
            let factory = CorePlusSessionFactory::from_config(&system_name, &system_config)
                .await
                .map_err(|e| {
                    Error::SessionCreation(format!(
                        "failed to create session factory for system '{system_name}': {e}"
                    ))
                })?;
            Ok(Arc::new(factory))
        })
    });
    let probe: LivenessProber<CorePlusSessionFactory> =
        Arc::new(|factory| Box::pin(async move { factory.ping().await }));
    let release: ItemCloser<CorePlusSessionFactory> =
        Arc::new(|factory| Box::pin(async move { factory.close().await }));
    ItemManager::new(
        SystemType::Enterprise,
        "factory",
        name,
        create,
        probe,
        release,
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DynamicCommunitySessionManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A community session manager that exclusively owns the launched
/// subprocess its worker runs in.
///
/// Closing order is strict: session-level close first, then subprocess
/// stop (best-effort), then the child is untracked from the instance
/// record.
#[derive(Debug)]
pub struct DynamicCommunitySessionManager {
    inner: SessionManager,
    worker: Arc<LaunchedWorker>,
    tracker: Option<Arc<InstanceTracker>>,
}

impl DynamicCommunitySessionManager {
    pub fn new(
        name: &str,
        config: &CommunitySessionConfig,
        worker: Arc<LaunchedWorker>,
        tracker: Option<Arc<InstanceTracker>>,
    ) -> Self {
        Self {
            inner: community_manager_with_source("dynamic", name, config),
            worker,
            tracker,
        }
    }

    pub fn system_type(&self) -> SystemType {
        self.inner.system_type()
    }

    pub fn source(&self) -> &str {
        self.inner.source()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn full_name(&self) -> String {
        self.inner.full_name()
    }

    pub fn worker(&self) -> &LaunchedWorker {
        &self.worker
    }

    pub async fn get(&self) -> Result<Arc<dyn BaseSession>> {
        self.inner.get().await
    }

    pub async fn is_alive(&self) -> bool {
        self.inner.is_alive().await
    }

    pub async fn liveness_status(
        &self,
        ensure_item: bool,
    ) -> (ResourceLivenessStatus, Option<String>) {
        self.inner.liveness_status(ensure_item).await
    }

    /// Close the session, stop the owned subprocess, untrack the child.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await?;
        self.worker.stop().await;
        if let Some(tracker) = &self.tracker {
            tracker.untrack_child(self.name()).await;
        }
        Ok(())
    }

    /// View fields for `session_details` and the credentials tool.
    pub fn to_value(&self) -> Value {
        let worker = &self.worker;
        let mut value = json!({
            "launch_method": worker.launch_method().as_str(),
            "port": worker.port(),
            "connection_url": worker.connection_url(),
            "connection_url_with_auth": worker.connection_url_with_auth(),
            "auth_type": worker.auth_type(),
        });
        let map = value.as_object_mut().unwrap();
        if !worker.auth_token().is_empty() {
            map.insert("auth_token".into(), json!(worker.auth_token()));
        }
        if let Some(container_id) = worker.container_id() {
            map.insert("container_id".into(), json!(container_id));
        }
        if let Some(pid) = worker.pid() {
            map.insert("process_id".into(), json!(pid));
        }
        value
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionHandle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Uniform handle over the session-manager variants, as stored by the
/// combined registry.
#[derive(Debug, Clone)]
pub enum SessionHandle {
    Configured(Arc<SessionManager>),
    Dynamic(Arc<DynamicCommunitySessionManager>),
}

impl SessionHandle {
    pub fn system_type(&self) -> SystemType {
        match self {
            SessionHandle::Configured(m) => m.system_type(),
            SessionHandle::Dynamic(m) => m.system_type(),
        }
    }

    pub fn source(&self) -> String {
        match self {
            SessionHandle::Configured(m) => m.source().to_string(),
            SessionHandle::Dynamic(m) => m.source().to_string(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            SessionHandle::Configured(m) => m.name().to_string(),
            SessionHandle::Dynamic(m) => m.name().to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        match self {
            SessionHandle::Configured(m) => m.full_name(),
            SessionHandle::Dynamic(m) => m.full_name(),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn BaseSession>> {
        match self {
            SessionHandle::Configured(m) => m.get().await,
            SessionHandle::Dynamic(m) => m.get().await,
        }
    }

    pub async fn is_alive(&self) -> bool {
        match self {
            SessionHandle::Configured(m) => m.is_alive().await,
            SessionHandle::Dynamic(m) => m.is_alive().await,
        }
    }

    pub async fn liveness_status(
        &self,
        ensure_item: bool,
    ) -> (ResourceLivenessStatus, Option<String>) {
        match self {
            SessionHandle::Configured(m) => m.liveness_status(ensure_item).await,
            SessionHandle::Dynamic(m) => m.liveness_status(ensure_item).await,
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            SessionHandle::Configured(m) => m.close().await,
            SessionHandle::Dynamic(m) => m.close().await,
        }
    }

    /// Extra view fields for dynamically launched sessions; `None` for
    /// configured ones.
    pub fn dynamic_info(&self) -> Option<Value> {
        match self {
            SessionHandle::Configured(_) => None,
            SessionHandle::Dynamic(m) => Some(m.to_value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn community_manager_identity() {
        let manager =
            community_session_manager("local", &CommunitySessionConfig::default());
        assert_eq!(manager.system_type(), SystemType::Community);
        assert_eq!(manager.source(), "community");
        assert_eq!(manager.name(), "local");
        assert_eq!(manager.full_name(), "community:community:local");
    }

    #[tokio::test]
    async fn enterprise_manager_runs_creation_function() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let call_count = calls.clone();
        let creation: SessionCreationFn = Arc::new(move |source, name| {
            let call_count = call_count.clone();
            Box::pin(async move {
                call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                assert_eq!(source, "prod");
                assert_eq!(name, "analytics");
                Err(Error::Connection("factory offline".into()))
            })
        });

        let manager = enterprise_session_manager("prod", "analytics", creation);
        assert_eq!(manager.full_name(), "enterprise:prod:analytics");

        let err = manager.get().await.unwrap_err();
        assert!(matches!(err, Error::SessionCreation(_)));
        assert!(err
            .to_string()
            .contains("failed to create enterprise session for analytics"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn factory_manager_identity() {
        let config = EnterpriseSystemConfig {
            url: "https://prod.example.com/iris".into(),
            auth_type: dh_domain::config::EnterpriseAuthKind::Interactive,
            api_key_env_var: None,
            username: None,
            password_env_var: None,
            private_key_path: None,
            session_creation: None,
        };
        let manager = factory_manager("prod", &config);
        assert_eq!(manager.system_type(), SystemType::Enterprise);
        assert_eq!(manager.source(), "factory");
        assert_eq!(manager.full_name(), "enterprise:factory:prod");
    }

    /// Full lifecycle of a locally launched dynamic session: the child pid
    /// stays tracked in the instance record until close, and close stops
    /// the subprocess after the session teardown.
    #[tokio::test]
    async fn dynamic_manager_close_stops_worker_and_untracks() {
        use std::os::unix::fs::PermissionsExt;

        use crate::instance_tracker::{is_process_running, InstanceTracker};
        use crate::launcher::{find_available_port, LaunchOptions, PythonLaunchOptions};

        // Stub runtime executable standing in for the worker host.
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let stub = bin_dir.join("deephaven");
        std::fs::write(&stub, "#!/bin/sh\nexec sleep 300\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let instances_dir = dir.path().join("instances");
        let tracker = Arc::new(
            InstanceTracker::create_and_register_in(instances_dir.clone())
                .await
                .unwrap(),
        );
        let record_path = instances_dir.join(format!("{}.json", tracker.instance_id()));

        let port = find_available_port().unwrap();
        let worker = Arc::new(
            crate::launcher::LaunchedWorker::launch_python(
                LaunchOptions {
                    session_name: "dyn1".into(),
                    port,
                    auth_type: "PSK".into(),
                    auth_token: "tok-dyn".into(),
                    heap_size_gb: 1,
                    extra_jvm_args: Vec::new(),
                    environment_vars: Default::default(),
                    instance_id: Some(tracker.instance_id().to_string()),
                },
                PythonLaunchOptions {
                    venv_path: Some(dir.path().to_path_buf()),
                },
            )
            .await
            .unwrap(),
        );
        let pid = worker.pid().unwrap();
        tracker.track_child("dyn1", pid).await.unwrap();
        assert!(is_process_running(pid));
        let record: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&record_path).unwrap()).unwrap();
        assert_eq!(record["python_processes"]["dyn1"], pid);

        let manager = DynamicCommunitySessionManager::new(
            "dyn1",
            &CommunitySessionConfig {
                host: Some("localhost".into()),
                port: Some(port),
                ..Default::default()
            },
            worker.clone(),
            Some(tracker.clone()),
        );
        assert_eq!(manager.full_name(), "community:dynamic:dyn1");

        let view = manager.to_value();
        assert_eq!(view["launch_method"], "python");
        assert_eq!(view["process_id"], pid);
        assert_eq!(view["auth_token"], "tok-dyn");
        assert_eq!(
            view["connection_url_with_auth"],
            format!("http://localhost:{port}?authToken=tok-dyn")
        );
        assert!(view.get("container_id").is_none());

        manager.close().await.unwrap();
        assert!(!is_process_running(pid), "worker subprocess must be stopped");
        let record: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&record_path).unwrap()).unwrap();
        assert!(record["python_processes"]
            .as_object()
            .unwrap()
            .is_empty());

        // Repeat close / stop are no-ops.
        manager.close().await.unwrap();
        worker.stop().await;
    }
}
