//! Generic single-slot resource manager.
//!
//! An [`ItemManager`] lazily constructs one item, verifies it with a
//! liveness probe on every access, and recreates it when it dies. All slot
//! access is lock-guarded so concurrent callers observe at most one
//! construction.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use dh_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemType {
    Community,
    Enterprise,
}

impl SystemType {
    /// Lowercase tag used in fully qualified names.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::Community => "community",
            SystemType::Enterprise => "enterprise",
        }
    }

    /// Uppercase form surfaced in tool responses.
    pub fn display_name(&self) -> &'static str {
        match self {
            SystemType::Community => "COMMUNITY",
            SystemType::Enterprise => "ENTERPRISE",
        }
    }
}

impl std::fmt::Display for SystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a managed resource's health, surfaced by
/// `session_details` and `enterprise_systems_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLivenessStatus {
    Online,
    Offline,
    /// Construction failed because of a configuration problem rather than
    /// the resource itself.
    Misconfigured,
    Unknown,
}

impl ResourceLivenessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceLivenessStatus::Online => "ONLINE",
            ResourceLivenessStatus::Offline => "OFFLINE",
            ResourceLivenessStatus::Misconfigured => "MISCONFIGURED",
            ResourceLivenessStatus::Unknown => "UNKNOWN",
        }
    }
}

/// Builds a fresh item. Failures surface as *creation* errors to `get()`
/// callers and leave the cache slot empty.
pub type ItemCreator<I> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<I>>> + Send + Sync>;

/// Probes a cached item. Probe errors never escape the manager; they read
/// as "not alive".
pub type LivenessProber<I> =
    Arc<dyn Fn(Arc<I>) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Releases an item. The release is asynchronous by construction.
pub type ItemCloser<I> =
    Arc<dyn Fn(Arc<I>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ItemManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lock-guarded, lazily constructed, liveness-verified holder of a single
/// resource.
///
/// Parameterized on the item type and on the creator / prober / closer
/// behaviour rather than on inheritance; the session-manager variants are
/// constructors that bind these three.
pub struct ItemManager<I: ?Sized + Send + Sync + 'static> {
    system_type: SystemType,
    source: String,
    name: String,
    slot: RwLock<Option<Arc<I>>>,
    create: ItemCreator<I>,
    probe: LivenessProber<I>,
    release: ItemCloser<I>,
}

impl<I: ?Sized + Send + Sync + 'static> std::fmt::Debug for ItemManager<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemManager")
            .field("full_name", &self.full_name())
            .finish()
    }
}

impl<I: ?Sized + Send + Sync + 'static> ItemManager<I> {
    pub fn new(
        system_type: SystemType,
        source: impl Into<String>,
        name: impl Into<String>,
        create: ItemCreator<I>,
        probe: LivenessProber<I>,
        release: ItemCloser<I>,
    ) -> Self {
        Self {
            system_type,
            source: source.into(),
            name: name.into(),
            slot: RwLock::new(None),
            create,
            probe,
            release,
        }
    }

    pub fn system_type(&self) -> SystemType {
        self.system_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical `"{system-type}:{source}:{name}"` identifier.
    pub fn full_name(&self) -> String {
        Self::make_full_name(self.system_type, &self.source, &self.name)
    }

    pub fn make_full_name(system_type: SystemType, source: &str, name: &str) -> String {
        format!("{}:{source}:{name}", system_type.as_str())
    }

    async fn probe_quiet(&self, item: Arc<I>) -> bool {
        match (self.probe)(item).await {
            Ok(alive) => alive,
            Err(e) => {
                tracing::debug!(
                    manager = %self.full_name(),
                    error = %e,
                    "liveness probe raised; treating item as not alive"
                );
                false
            }
        }
    }

    /// Return the cached item when it is alive; otherwise (re)create it.
    ///
    /// Creation runs under the write lock, so any number of concurrent
    /// callers trigger at most one construction and all observe the same
    /// item.
    pub async fn get(&self) -> Result<Arc<I>> {
        {
            let slot = self.slot.read().await;
            if let Some(item) = slot.as_ref() {
                if self.probe_quiet(item.clone()).await {
                    tracing::debug!(manager = %self.full_name(), "returning cached item");
                    return Ok(item.clone());
                }
            }
        }

        let mut slot = self.slot.write().await;
        // Re-check under the write lock: another caller may have created a
        // live item while we waited.
        if let Some(item) = slot.as_ref() {
            if self.probe_quiet(item.clone()).await {
                return Ok(item.clone());
            }
            tracing::info!(
                manager = %self.full_name(),
                "cached item is no longer alive; recreating"
            );
            *slot = None;
        }

        let item = (self.create)().await?;
        if !self.probe_quiet(item.clone()).await {
            tracing::warn!(
                manager = %self.full_name(),
                "freshly created item failed its liveness probe"
            );
        }
        *slot = Some(item.clone());
        tracing::info!(manager = %self.full_name(), "item created and cached");
        Ok(item)
    }

    /// Whether a cached item exists and its probe reports alive. Never
    /// constructs an item.
    pub async fn is_alive(&self) -> bool {
        let item = { self.slot.read().await.clone() };
        match item {
            Some(item) => self.probe_quiet(item).await,
            None => false,
        }
    }

    /// Health classification plus a human-readable detail.
    ///
    /// With `ensure_item` a cold manager first attempts construction;
    /// without it, a cold manager reads as OFFLINE.
    pub async fn liveness_status(
        &self,
        ensure_item: bool,
    ) -> (ResourceLivenessStatus, Option<String>) {
        if ensure_item {
            if let Err(e) = self.get().await {
                let status = match &e {
                    dh_domain::Error::Config(_) => ResourceLivenessStatus::Misconfigured,
                    _ => ResourceLivenessStatus::Offline,
                };
                return (status, Some(e.to_string()));
            }
        }

        let item = { self.slot.read().await.clone() };
        let Some(item) = item else {
            return (
                ResourceLivenessStatus::Offline,
                Some("no item is currently cached".to_string()),
            );
        };

        match (self.probe)(item).await {
            Ok(true) => (ResourceLivenessStatus::Online, None),
            Ok(false) => (
                ResourceLivenessStatus::Offline,
                Some("liveness probe reported not alive".to_string()),
            ),
            Err(e) => (ResourceLivenessStatus::Unknown, Some(e.to_string())),
        }
    }

    /// Release the cached item and empty the slot. Idempotent; a dead item
    /// is dropped without a release call.
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.slot.write().await;
        let Some(item) = slot.take() else {
            tracing::debug!(manager = %self.full_name(), "close on empty manager");
            return Ok(());
        };

        if self.probe_quiet(item.clone()).await {
            if let Err(e) = (self.release)(item).await {
                tracing::warn!(
                    manager = %self.full_name(),
                    error = %e,
                    "error closing item; slot cleared anyway"
                );
            }
        } else {
            tracing::debug!(
                manager = %self.full_name(),
                "cached item already dead; dropping without close"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    struct MockItem {
        alive: AtomicBool,
        closes: AtomicUsize,
    }

    impl MockItem {
        fn new() -> Self {
            Self {
                alive: AtomicBool::new(true),
                closes: AtomicUsize::new(0),
            }
        }
    }

    struct Harness {
        manager: Arc<ItemManager<MockItem>>,
        creations: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let creations = Arc::new(AtomicUsize::new(0));
        let create_count = creations.clone();
        let create: ItemCreator<MockItem> = Arc::new(move || {
            let create_count = create_count.clone();
            Box::pin(async move {
                create_count.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockItem::new()))
            })
        });
        let probe: LivenessProber<MockItem> =
            Arc::new(|item| Box::pin(async move { Ok(item.alive.load(Ordering::SeqCst)) }));
        let release: ItemCloser<MockItem> = Arc::new(|item| {
            Box::pin(async move {
                item.closes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        Harness {
            manager: Arc::new(ItemManager::new(
                SystemType::Community,
                "test-source",
                "test",
                create,
                probe,
                release,
            )),
            creations,
        }
    }

    #[test]
    fn full_name_formatting() {
        let h = harness();
        assert_eq!(h.manager.full_name(), "community:test-source:test");
        assert_eq!(
            ItemManager::<MockItem>::make_full_name(SystemType::Enterprise, "factoryA", "sess42"),
            "enterprise:factoryA:sess42"
        );
    }

    #[tokio::test]
    async fn get_is_lazy_and_caches() {
        let h = harness();
        assert_eq!(h.creations.load(Ordering::SeqCst), 0);

        let first = h.manager.get().await.unwrap();
        assert_eq!(h.creations.load(Ordering::SeqCst), 1);

        let second = h.manager.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_get_creates_once() {
        let h = harness();
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let manager = h.manager.clone();
                tokio::spawn(async move { manager.get().await.unwrap() })
            })
            .collect();

        let mut items = Vec::new();
        for task in tasks {
            items.push(task.await.unwrap());
        }

        assert_eq!(h.creations.load(Ordering::SeqCst), 1);
        for item in &items[1..] {
            assert!(Arc::ptr_eq(&items[0], item));
        }
    }

    #[tokio::test]
    async fn dead_item_is_recreated() {
        let h = harness();
        let first = h.manager.get().await.unwrap();
        first.alive.store(false, Ordering::SeqCst);

        let second = h.manager.get().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(h.creations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn is_alive_reflects_probe() {
        let h = harness();
        assert!(!h.manager.is_alive().await);

        let item = h.manager.get().await.unwrap();
        assert!(h.manager.is_alive().await);

        item.alive.store(false, Ordering::SeqCst);
        assert!(!h.manager.is_alive().await);
    }

    #[tokio::test]
    async fn probe_errors_read_as_not_alive() {
        let creations = Arc::new(AtomicUsize::new(0));
        let create_count = creations.clone();
        let create: ItemCreator<MockItem> = Arc::new(move || {
            let create_count = create_count.clone();
            Box::pin(async move {
                create_count.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockItem::new()))
            })
        });
        let probe: LivenessProber<MockItem> = Arc::new(|_| {
            Box::pin(async move { Err(dh_domain::Error::Connection("probe blew up".into())) })
        });
        let release: ItemCloser<MockItem> = Arc::new(|_| Box::pin(async move { Ok(()) }));
        let manager =
            ItemManager::new(SystemType::Community, "src", "probe", create, probe, release);

        manager.get().await.unwrap();
        assert!(!manager.is_alive().await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let h = harness();
        let item = h.manager.get().await.unwrap();

        h.manager.close().await.unwrap();
        assert_eq!(item.closes.load(Ordering::SeqCst), 1);
        assert!(!h.manager.is_alive().await);

        h.manager.close().await.unwrap();
        assert_eq!(item.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_skips_dead_item() {
        let h = harness();
        let item = h.manager.get().await.unwrap();
        item.alive.store(false, Ordering::SeqCst);

        h.manager.close().await.unwrap();
        assert_eq!(item.closes.load(Ordering::SeqCst), 0);
        assert!(!h.manager.is_alive().await);
    }

    #[tokio::test]
    async fn creation_failure_leaves_slot_empty() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempt_count = attempts.clone();
        let create: ItemCreator<MockItem> = Arc::new(move || {
            let attempt_count = attempt_count.clone();
            Box::pin(async move {
                attempt_count.fetch_add(1, Ordering::SeqCst);
                Err(dh_domain::Error::SessionCreation("connect refused".into()))
            })
        });
        let probe: LivenessProber<MockItem> =
            Arc::new(|_| Box::pin(async move { Ok(true) }));
        let release: ItemCloser<MockItem> = Arc::new(|_| Box::pin(async move { Ok(()) }));
        let manager =
            ItemManager::new(SystemType::Community, "src", "failing", create, probe, release);

        assert!(manager.get().await.is_err());
        assert!(!manager.is_alive().await);

        // The next call retries creation.
        assert!(manager.get().await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn liveness_status_cold_and_warm() {
        let h = harness();

        let (status, detail) = h.manager.liveness_status(false).await;
        assert_eq!(status, ResourceLivenessStatus::Offline);
        assert!(detail.is_some());
        assert_eq!(h.creations.load(Ordering::SeqCst), 0);

        let (status, detail) = h.manager.liveness_status(true).await;
        assert_eq!(status, ResourceLivenessStatus::Online);
        assert!(detail.is_none());
        assert_eq!(h.creations.load(Ordering::SeqCst), 1);
    }
}
