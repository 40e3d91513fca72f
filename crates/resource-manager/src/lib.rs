//! The session-and-resource control plane.
//!
//! Layered leaves-first: the generic lock-guarded [`ItemManager`], the
//! session-manager variants over it, name-keyed registries with snapshots,
//! the [`CombinedSessionRegistry`] fusing community and enterprise
//! namespaces, the [`InstanceTracker`] with cross-restart orphan
//! reclamation, and the subprocess launchers for dynamic sessions.

pub mod combined;
pub mod instance_tracker;
pub mod launcher;
pub mod manager;
pub mod registry;
pub mod sessions;

pub use combined::CombinedSessionRegistry;
pub use instance_tracker::{
    cleanup_orphaned_resources, is_process_running, InstanceTracker,
    CONTAINER_INSTANCE_LABEL,
};
pub use launcher::{
    find_available_port, DockerLaunchOptions, LaunchOptions, LaunchedWorker,
    PythonLaunchOptions,
};
pub use manager::{
    ItemCloser, ItemCreator, ItemManager, LivenessProber, ResourceLivenessStatus,
    SystemType,
};
pub use registry::{
    CommunitySessionRegistry, CorePlusSessionFactoryRegistry, InitializationPhase,
    RegistrySnapshot,
};
pub use sessions::{
    community_session_manager, enterprise_session_manager, factory_manager,
    CorePlusSessionFactoryManager, DynamicCommunitySessionManager, SessionCreationFn,
    SessionHandle, SessionManager,
};
