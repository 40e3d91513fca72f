//! Worker sessions.
//!
//! [`BaseSession`] is the seam the resource managers and tool handlers
//! consume; [`CoreSession`] is the community (Core) implementation over the
//! worker's HTTP JSON API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use dh_domain::config::{redact_community_session_config, CommunitySessionConfig};
use dh_domain::{Error, Result};

use crate::coreplus::CorePlusSession;
use crate::table::{TableInfo, TableSnapshot};

/// Default request timeout for worker RPCs; disabled for sessions
/// configured with `never_timeout`.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BaseSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The opaque RPC surface of one remote worker session.
#[async_trait]
pub trait BaseSession: Send + Sync {
    /// Session name this connection was built for.
    fn name(&self) -> &str;

    /// Programming language the worker executes ("python", "groovy").
    fn programming_language(&self) -> &str;

    /// Whether the worker still answers its liveness endpoint. Transport
    /// failures count as "not alive"; this never errors.
    async fn is_alive(&self) -> bool;

    /// Execute a script in the worker's language environment.
    async fn run_script(&self, script: &str) -> Result<()>;

    /// Names of the tables currently bound in the worker.
    async fn tables(&self) -> Result<Vec<String>>;

    /// Size and column shape of a table, without row data.
    async fn table_info(&self, table: &str) -> Result<TableInfo>;

    /// Snapshot up to `max_rows` rows (all rows when `None`) from the head
    /// or tail of a table.
    async fn table_data(
        &self,
        table: &str,
        max_rows: Option<u64>,
        head: bool,
    ) -> Result<TableSnapshot>;

    /// The meta table describing a table's columns.
    async fn meta_table(&self, table: &str) -> Result<TableSnapshot>;

    /// Release the server-side session. Must be async and idempotent.
    async fn close(&self) -> Result<()>;

    /// Enterprise (Core+) view of this session, when it has one.
    fn as_enterprise(&self) -> Option<&CorePlusSession> {
        None
    }
}

impl std::fmt::Debug for dyn BaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn BaseSession")
            .field("name", &self.name())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CoreSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A connection to a community (Core) worker.
#[derive(Debug)]
pub struct CoreSession {
    name: String,
    base_url: String,
    auth_header: Option<String>,
    auth_type: String,
    session_type: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TablesResponse {
    tables: Vec<String>,
}

impl CoreSession {
    /// Build a session from a validated community session config.
    ///
    /// The auth token is resolved here (inline value, or environment
    /// variable indirection falling back to an empty token with a warning)
    /// and TLS material is loaded from disk. No network traffic happens
    /// until the first RPC.
    pub async fn from_config(name: &str, config: &CommunitySessionConfig) -> Result<Self> {
        let log_config = redact_community_session_config(config);
        tracing::info!(session = %name, config = %log_config, "creating community session");

        let host = config.host.as_deref().unwrap_or("localhost");
        let port = config.port.unwrap_or(10000);
        let use_tls = config.use_tls.unwrap_or(false);
        let scheme = if use_tls { "https" } else { "http" };
        let base_url = format!("{scheme}://{host}:{port}");

        let auth_type = config.auth_type.clone().unwrap_or_else(|| "Anonymous".into());
        let auth_token = resolve_auth_token(config);

        let mut builder = reqwest::Client::builder();
        if !config.never_timeout.unwrap_or(false) {
            builder = builder.timeout(REQUEST_TIMEOUT);
        }

        if use_tls {
            if let Some(path) = &config.tls_root_certs {
                let pem = tokio::fs::read(path).await.map_err(|e| {
                    Error::SessionCreation(format!(
                        "failed to load TLS root certs for session '{name}' from {path}: {e}"
                    ))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    Error::SessionCreation(format!(
                        "invalid TLS root certs for session '{name}': {e}"
                    ))
                })?;
                builder = builder.add_root_certificate(cert);
            }

            if let (Some(chain), Some(key)) =
                (&config.client_cert_chain, &config.client_private_key)
            {
                let mut pem = tokio::fs::read(chain).await.map_err(|e| {
                    Error::SessionCreation(format!(
                        "failed to load client cert chain for session '{name}' from {chain}: {e}"
                    ))
                })?;
                let key_bytes = tokio::fs::read(key).await.map_err(|e| {
                    Error::SessionCreation(format!(
                        "failed to load client private key for session '{name}' from {key}: {e}"
                    ))
                })?;
                pem.extend_from_slice(&key_bytes);
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                    Error::SessionCreation(format!(
                        "invalid client identity for session '{name}': {e}"
                    ))
                })?;
                builder = builder.identity(identity);
            }
        }

        let client = builder.build().map_err(|e| {
            Error::SessionCreation(format!(
                "failed to build HTTP client for session '{name}': {e}"
            ))
        })?;

        let auth_header = if auth_token.is_empty() {
            None
        } else {
            Some(format!("{auth_type} {auth_token}"))
        };

        Ok(Self {
            name: name.to_string(),
            base_url,
            auth_header,
            auth_type,
            session_type: config.session_type.clone().unwrap_or_else(|| "python".into()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth_type(&self) -> &str {
        &self.auth_type
    }

    // ── Internal: request plumbing ─────────────────────────────────

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, format!("{}{path}", self.base_url));
        if let Some(header) = &self.auth_header {
            builder = builder.header("Authorization", header);
        }
        builder
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            Error::Connection(format!(
                "worker '{}' unreachable while {what}: {e}",
                self.name
            ))
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Query(format!("{what}: not found")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Query(format!("{what} failed ({status}): {body}")));
        }
        Ok(response)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let response = self.send(self.request(reqwest::Method::GET, path), what).await?;
        response.json().await.map_err(|e| {
            Error::Query(format!("{what}: malformed worker response: {e}"))
        })
    }
}

fn resolve_auth_token(config: &CommunitySessionConfig) -> String {
    if let Some(var) = &config.auth_token_env_var {
        match std::env::var(var) {
            Ok(token) => {
                tracing::info!(var = %var, "auth token read from environment variable");
                token
            }
            Err(_) => {
                tracing::warn!(
                    var = %var,
                    "auth_token_env_var is configured but the variable is unset; using empty token"
                );
                String::new()
            }
        }
    } else {
        config.auth_token.clone().unwrap_or_default()
    }
}

#[async_trait]
impl BaseSession for CoreSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn programming_language(&self) -> &str {
        &self.session_type
    }

    async fn is_alive(&self) -> bool {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(session = %self.name, error = %e, "liveness probe failed");
                false
            }
        }
    }

    async fn run_script(&self, script: &str) -> Result<()> {
        let builder = self
            .request(reqwest::Method::POST, "/script")
            .json(&json!({ "script": script }));
        self.send(builder, "script execution").await?;
        Ok(())
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let response: TablesResponse = self.get_json("/tables", "table enumeration").await?;
        Ok(response.tables)
    }

    async fn table_info(&self, table: &str) -> Result<TableInfo> {
        self.get_json(&format!("/tables/{table}"), &format!("table '{table}' info"))
            .await
    }

    async fn table_data(
        &self,
        table: &str,
        max_rows: Option<u64>,
        head: bool,
    ) -> Result<TableSnapshot> {
        let mut path = format!("/tables/{table}/data?head={head}");
        if let Some(max) = max_rows {
            path.push_str(&format!("&max_rows={max}"));
        }
        self.get_json(&path, &format!("table '{table}' data")).await
    }

    async fn meta_table(&self, table: &str) -> Result<TableSnapshot> {
        self.get_json(
            &format!("/tables/{table}/meta"),
            &format!("table '{table}' meta table"),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        // Best-effort server-side release; dropping the HTTP client frees
        // local resources either way.
        if let Err(e) = self
            .request(reqwest::Method::POST, "/session/close")
            .send()
            .await
        {
            tracing::debug!(session = %self.name, error = %e, "session close notification failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn from_config_applies_defaults() {
        let session = CoreSession::from_config("local", &CommunitySessionConfig::default())
            .await
            .unwrap();
        assert_eq!(session.base_url(), "http://localhost:10000");
        assert_eq!(session.programming_language(), "python");
        assert_eq!(session.auth_type(), "Anonymous");
        assert!(session.auth_header.is_none());
    }

    #[tokio::test]
    async fn inline_auth_token_builds_header() {
        let config = CommunitySessionConfig {
            auth_type: Some("PSK".into()),
            auth_token: Some("tok-123".into()),
            ..Default::default()
        };
        let session = CoreSession::from_config("local", &config).await.unwrap();
        assert_eq!(session.auth_header.as_deref(), Some("PSK tok-123"));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn env_var_auth_token_is_resolved() {
        std::env::set_var("DH_TEST_SESSION_TOKEN", "from-env");
        let config = CommunitySessionConfig {
            auth_type: Some("PSK".into()),
            auth_token_env_var: Some("DH_TEST_SESSION_TOKEN".into()),
            ..Default::default()
        };
        let session = CoreSession::from_config("local", &config).await.unwrap();
        assert_eq!(session.auth_header.as_deref(), Some("PSK from-env"));
        std::env::remove_var("DH_TEST_SESSION_TOKEN");
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn unset_env_var_falls_back_to_empty_token() {
        std::env::remove_var("DH_TEST_SESSION_TOKEN_MISSING");
        let config = CommunitySessionConfig {
            auth_token_env_var: Some("DH_TEST_SESSION_TOKEN_MISSING".into()),
            ..Default::default()
        };
        let session = CoreSession::from_config("local", &config).await.unwrap();
        assert!(session.auth_header.is_none());
    }

    #[tokio::test]
    async fn missing_tls_files_fail_creation() {
        let config = CommunitySessionConfig {
            use_tls: Some(true),
            tls_root_certs: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        let err = CoreSession::from_config("local", &config).await.unwrap_err();
        assert!(matches!(err, Error::SessionCreation(_)));
    }

    #[tokio::test]
    async fn is_alive_false_when_unreachable() {
        let config = CommunitySessionConfig {
            host: Some("127.0.0.1".into()),
            port: Some(1),
            ..Default::default()
        };
        let session = CoreSession::from_config("dead", &config).await.unwrap();
        assert!(!session.is_alive().await);
    }
}
