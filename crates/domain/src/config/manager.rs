//! Async config store: lazy load, strict validation, atomic invalidation.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::McpConfig;
use crate::error::{Error, Result};

/// Environment variable naming the path of the configuration document.
pub const CONFIG_ENV_VAR: &str = "DH_MCP_CONFIG_FILE";

/// Single authoritative copy of the configuration document.
///
/// The first `get_config` call (and the first after `clear_config_cache`)
/// reads, parses, and validates the file; subsequent calls return the cached
/// `Arc`. One async lock serializes (re)load and cache replacement, so
/// concurrent callers observe at most one load.
pub struct ConfigManager {
    cache: Mutex<Option<Arc<McpConfig>>>,
    /// Explicit path override (e.g. a `--config` flag); when `None` the path
    /// comes from [`CONFIG_ENV_VAR`].
    path_override: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
            path_override: None,
        }
    }

    /// Build a manager that reads a fixed path instead of the environment.
    pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            cache: Mutex::new(None),
            path_override: Some(path.into()),
        }
    }

    fn config_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path_override {
            return Ok(path.clone());
        }
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Err(Error::Config(format!(
                "environment variable {CONFIG_ENV_VAR} must be set to the path of \
                 the configuration file"
            ))),
        }
    }

    /// Return the cached configuration, loading and validating it on the
    /// first call after construction or cache invalidation.
    pub async fn get_config(&self) -> Result<Arc<McpConfig>> {
        let mut cache = self.cache.lock().await;
        if let Some(config) = cache.as_ref() {
            tracing::debug!("using cached configuration");
            return Ok(config.clone());
        }

        let path = self.config_path()?;
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to read configuration file");
            Error::Config(format!(
                "failed to read configuration file {}: {e}",
                path.display()
            ))
        })?;

        let config: McpConfig = serde_json::from_str(&raw).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to parse configuration file");
            Error::Config(format!(
                "failed to parse configuration file {}: {e}",
                path.display()
            ))
        })?;

        config.validate().map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "configuration file failed validation");
            e
        })?;

        tracing::info!(path = %path.display(), "configuration loaded");
        let config = Arc::new(config);
        *cache = Some(config.clone());
        Ok(config)
    }

    /// Drop the cached document; the next `get_config` re-reads the file.
    pub async fn clear_config_cache(&self) {
        let mut cache = self.cache.lock().await;
        *cache = None;
        tracing::info!("configuration cache cleared");
    }

    pub async fn get_community_session_config(
        &self,
        name: &str,
    ) -> Result<super::CommunitySessionConfig> {
        let config = self.get_config().await?;
        config.community_session(name).cloned()
    }

    pub async fn get_community_session_names(&self) -> Result<Vec<String>> {
        Ok(self.get_config().await?.community_session_names())
    }

    pub async fn get_enterprise_system_config(
        &self,
        name: &str,
    ) -> Result<super::EnterpriseSystemConfig> {
        let config = self.get_config().await?;
        config.enterprise_system(name).cloned()
    }

    pub async fn get_all_enterprise_system_names(&self) -> Result<Vec<String>> {
        Ok(self.get_config().await?.enterprise_system_names())
    }

    /// The configured default worker name, if any.
    pub async fn get_worker_name_default(&self) -> Result<Option<String>> {
        Ok(self.get_config().await?.default_worker.clone())
    }

    /// Resolve the effective worker name: the explicit argument when given,
    /// otherwise the configured default.
    pub async fn resolve_worker_name(&self, worker_name: Option<&str>) -> Result<String> {
        if let Some(name) = worker_name {
            return Ok(name.to_string());
        }
        match self.get_config().await?.default_worker.clone() {
            Some(name) => Ok(name),
            None => Err(Error::Config(
                "no worker name specified and no default_worker configured".to_string(),
            )),
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn loads_and_caches_from_path() {
        let file = write_config(
            r#"{"community": {"sessions": {"local": {"host": "localhost", "port": 10000}}},
                "default_worker": "local"}"#,
        );
        let manager = ConfigManager::with_config_path(file.path());

        let first = manager.get_config().await.unwrap();
        assert_eq!(first.community_session_names(), vec!["local".to_string()]);

        // Rewriting the file does not affect the cached copy.
        std::fs::write(file.path(), r#"{"default_worker": "other"}"#).unwrap();
        let second = manager.get_config().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn clear_cache_forces_reload() {
        let file = write_config(
            r#"{"community": {"sessions": {"a": {"host": "localhost"}}}}"#,
        );
        let manager = ConfigManager::with_config_path(file.path());
        manager.get_config().await.unwrap();

        std::fs::write(
            file.path(),
            r#"{"community": {"sessions": {"b": {"host": "localhost"}}}}"#,
        )
        .unwrap();
        manager.clear_config_cache().await;

        let reloaded = manager.get_config().await.unwrap();
        assert_eq!(reloaded.community_session_names(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn missing_file_is_config_error() {
        let manager = ConfigManager::with_config_path("/nonexistent/config.json");
        let err = manager.get_config().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn invalid_document_is_config_error() {
        let file = write_config("{not json");
        let manager = ConfigManager::with_config_path(file.path());
        let err = manager.get_config().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn validation_failure_surfaces_key() {
        let file = write_config(
            r#"{"community": {"sessions": {"w": {"auth_token": "a", "auth_token_env_var": "B"}}}}"#,
        );
        let manager = ConfigManager::with_config_path(file.path());
        let err = manager.get_config().await.unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn env_var_unset_is_config_error() {
        std::env::remove_var(CONFIG_ENV_VAR);
        let manager = ConfigManager::new();
        let err = manager.get_config().await.unwrap_err();
        assert!(err.to_string().contains(CONFIG_ENV_VAR));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn env_var_path_is_honoured() {
        let file = write_config(
            r#"{"community": {"sessions": {"local": {"host": "localhost"}}}}"#,
        );
        std::env::set_var(CONFIG_ENV_VAR, file.path());
        let manager = ConfigManager::new();
        let config = manager.get_config().await.unwrap();
        assert_eq!(config.community_session_names(), vec!["local".to_string()]);
        std::env::remove_var(CONFIG_ENV_VAR);
    }

    #[tokio::test]
    async fn resolve_worker_name_prefers_argument() {
        let file = write_config(
            r#"{"community": {"sessions": {"local": {"host": "localhost"}}},
                "default_worker": "local"}"#,
        );
        let manager = ConfigManager::with_config_path(file.path());
        assert_eq!(
            manager.resolve_worker_name(Some("other")).await.unwrap(),
            "other"
        );
        assert_eq!(manager.resolve_worker_name(None).await.unwrap(), "local");
    }

    #[tokio::test]
    async fn resolve_worker_name_without_default_fails() {
        let file = write_config("{}");
        let manager = ConfigManager::with_config_path(file.path());
        let err = manager.resolve_worker_name(None).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn missing_entity_lookups_name_the_entity() {
        let file = write_config(
            r#"{"community": {"sessions": {"local": {"host": "localhost"}}}}"#,
        );
        let manager = ConfigManager::with_config_path(file.path());

        let err = manager
            .get_community_session_config("ghost")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'ghost'"));

        let err = manager
            .get_enterprise_system_config("ghost")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'ghost'"));
    }
}
