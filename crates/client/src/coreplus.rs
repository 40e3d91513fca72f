//! Enterprise (Core+) sessions and the session factory that mints them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use dh_domain::config::{
    CommunitySessionConfig, EnterpriseAuthKind, EnterpriseSystemConfig,
};
use dh_domain::{Error, Result};

use crate::session::{BaseSession, CoreSession};
use crate::table::{TableInfo, TableSnapshot};

const FACTORY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CorePlusSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An enterprise worker session.
///
/// The wire surface is the community one plus catalog access; the extra
/// capability is reachable through [`BaseSession::as_enterprise`].
pub struct CorePlusSession {
    core: CoreSession,
    source: String,
}

#[derive(Debug, Deserialize)]
struct NamespacesResponse {
    namespaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogTablesResponse {
    tables: Vec<String>,
}

impl CorePlusSession {
    /// Wrap a worker connection handed out by a factory.
    pub(crate) fn new(core: CoreSession, source: String) -> Self {
        Self { core, source }
    }

    /// The enterprise system this session belongs to.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn catalog_namespaces(&self) -> Result<Vec<String>> {
        let response: NamespacesResponse = self
            .core
            .get_json("/catalog/namespaces", "catalog namespace enumeration")
            .await?;
        Ok(response.namespaces)
    }

    pub async fn catalog_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let response: CatalogTablesResponse = self
            .core
            .get_json(
                &format!("/catalog/{namespace}/tables"),
                &format!("catalog table enumeration for namespace '{namespace}'"),
            )
            .await?;
        Ok(response.tables)
    }

    pub async fn catalog_table_meta(
        &self,
        namespace: &str,
        table: &str,
    ) -> Result<TableSnapshot> {
        self.core
            .get_json(
                &format!("/catalog/{namespace}/tables/{table}/meta"),
                &format!("catalog meta table for '{namespace}.{table}'"),
            )
            .await
    }
}

#[async_trait]
impl BaseSession for CorePlusSession {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn programming_language(&self) -> &str {
        self.core.programming_language()
    }

    async fn is_alive(&self) -> bool {
        self.core.is_alive().await
    }

    async fn run_script(&self, script: &str) -> Result<()> {
        self.core.run_script(script).await
    }

    async fn tables(&self) -> Result<Vec<String>> {
        self.core.tables().await
    }

    async fn table_info(&self, table: &str) -> Result<TableInfo> {
        self.core.table_info(table).await
    }

    async fn table_data(
        &self,
        table: &str,
        max_rows: Option<u64>,
        head: bool,
    ) -> Result<TableSnapshot> {
        self.core.table_data(table, max_rows, head).await
    }

    async fn meta_table(&self, table: &str) -> Result<TableSnapshot> {
        self.core.meta_table(table).await
    }

    async fn close(&self) -> Result<()> {
        self.core.close().await
    }

    fn as_enterprise(&self) -> Option<&CorePlusSession> {
        Some(self)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CorePlusSessionFactory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parameters for minting a new enterprise session.
#[derive(Debug, Clone, Serialize, Default)]
pub struct NewSessionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_size_gb: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub programming_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionNamesResponse {
    sessions: Vec<String>,
}

/// Summary of one persistent query hosted by an enterprise system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentQueryInfo {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PersistentQueriesResponse {
    queries: Vec<PersistentQueryInfo>,
}

/// Connection descriptor the factory returns for one of its sessions.
#[derive(Debug, Deserialize)]
struct SessionConnectionInfo {
    host: String,
    port: u16,
    #[serde(default)]
    auth_type: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    programming_language: Option<String>,
    #[serde(default)]
    use_tls: bool,
}

#[derive(Debug)]
enum ResolvedAuth {
    Bearer(String),
    Basic { username: String, password: String },
    None,
}

/// An enterprise-side object that mints sessions, addressed by URL plus
/// credentials resolved from their configured indirection.
#[derive(Debug)]
pub struct CorePlusSessionFactory {
    name: String,
    base_url: String,
    auth: ResolvedAuth,
    client: reqwest::Client,
}

impl CorePlusSessionFactory {
    /// Construct a factory from its validated system config, resolving
    /// credential indirection now (at use, not at configuration load).
    pub async fn from_config(name: &str, config: &EnterpriseSystemConfig) -> Result<Self> {
        let auth = match config.auth_type {
            EnterpriseAuthKind::ApiKey => {
                let var = config.api_key_env_var.as_deref().unwrap_or_default();
                let key = std::env::var(var).map_err(|_| {
                    Error::Config(format!(
                        "environment variable '{var}' for enterprise system '{name}' is not set"
                    ))
                })?;
                ResolvedAuth::Bearer(key)
            }
            EnterpriseAuthKind::Password => {
                let var = config.password_env_var.as_deref().unwrap_or_default();
                let password = std::env::var(var).map_err(|_| {
                    Error::Config(format!(
                        "environment variable '{var}' for enterprise system '{name}' is not set"
                    ))
                })?;
                ResolvedAuth::Basic {
                    username: config.username.clone().unwrap_or_default(),
                    password,
                }
            }
            EnterpriseAuthKind::PrivateKey => {
                let path = config.private_key_path.as_deref().unwrap_or_default();
                let key = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!(
                        "failed to read private key for enterprise system '{name}' \
                         from {path}: {e}"
                    ))
                })?;
                ResolvedAuth::Bearer(key.trim().to_string())
            }
            EnterpriseAuthKind::Interactive => ResolvedAuth::None,
        };

        let client = reqwest::Client::builder()
            .timeout(FACTORY_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::SessionCreation(format!(
                    "failed to build HTTP client for enterprise system '{name}': {e}"
                ))
            })?;

        tracing::info!(system = %name, url = %config.url, "enterprise session factory created");

        Ok(Self {
            name: name.to_string(),
            base_url: config.url.trim_end_matches('/').to_string(),
            auth,
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.auth {
            ResolvedAuth::Bearer(token) => builder.bearer_auth(token),
            ResolvedAuth::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            ResolvedAuth::None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            Error::Connection(format!(
                "enterprise system '{}' unreachable while {what}: {e}",
                self.name
            ))
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{what}: not found")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Query(format!("{what} failed ({status}): {body}")));
        }
        Ok(response)
    }

    /// Whether the factory answers its ping endpoint.
    pub async fn ping(&self) -> Result<bool> {
        let response = self
            .request(reqwest::Method::GET, "/api/ping")
            .send()
            .await
            .map_err(|e| {
                Error::Connection(format!(
                    "enterprise system '{}' unreachable while pinging: {e}",
                    self.name
                ))
            })?;
        Ok(response.status().is_success())
    }

    /// Names of the sessions that already exist behind this factory.
    pub async fn session_names(&self) -> Result<Vec<String>> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, "/api/sessions"),
                "session enumeration",
            )
            .await?;
        let names: SessionNamesResponse = response.json().await.map_err(|e| {
            Error::Query(format!("session enumeration: malformed response: {e}"))
        })?;
        Ok(names.sessions)
    }

    /// Connect to an existing session by name.
    pub async fn connect_to_session(&self, session_name: &str) -> Result<CorePlusSession> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, &format!("/api/sessions/{session_name}")),
                &format!("connecting to session '{session_name}'"),
            )
            .await?;
        let info: SessionConnectionInfo = response.json().await.map_err(|e| {
            Error::Query(format!(
                "connecting to session '{session_name}': malformed response: {e}"
            ))
        })?;
        self.session_from_info(session_name, info).await
    }

    /// Mint a new session and connect to it.
    pub async fn create_session(
        &self,
        session_name: &str,
        params: &NewSessionParams,
    ) -> Result<CorePlusSession> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, "/api/sessions")
                    .json(&json!({
                        "name": session_name,
                        "heap_size_gb": params.heap_size_gb,
                        "programming_language": params.programming_language,
                    })),
                &format!("creating session '{session_name}'"),
            )
            .await?;
        let info: SessionConnectionInfo = response.json().await.map_err(|e| {
            Error::Query(format!(
                "creating session '{session_name}': malformed response: {e}"
            ))
        })?;
        self.session_from_info(session_name, info).await
    }

    /// Summaries of the persistent queries hosted by this system.
    pub async fn persistent_queries(&self) -> Result<Vec<PersistentQueryInfo>> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, "/api/persistent-queries"),
                "persistent query enumeration",
            )
            .await?;
        let queries: PersistentQueriesResponse = response.json().await.map_err(|e| {
            Error::Query(format!("persistent query enumeration: malformed response: {e}"))
        })?;
        Ok(queries.queries)
    }

    /// Status of one persistent query by name.
    pub async fn persistent_query_status(
        &self,
        query_name: &str,
    ) -> Result<PersistentQueryInfo> {
        let response = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!("/api/persistent-queries/{query_name}"),
                ),
                &format!("persistent query '{query_name}' status"),
            )
            .await?;
        response.json().await.map_err(|e| {
            Error::Query(format!(
                "persistent query '{query_name}' status: malformed response: {e}"
            ))
        })
    }

    /// Tear down a session on the enterprise side.
    pub async fn delete_session(&self, session_name: &str) -> Result<()> {
        self.send(
            self.request(
                reqwest::Method::DELETE,
                &format!("/api/sessions/{session_name}"),
            ),
            &format!("deleting session '{session_name}'"),
        )
        .await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        tracing::debug!(system = %self.name, "closing enterprise session factory");
        Ok(())
    }

    async fn session_from_info(
        &self,
        session_name: &str,
        info: SessionConnectionInfo,
    ) -> Result<CorePlusSession> {
        let config = CommunitySessionConfig {
            host: Some(info.host),
            port: Some(info.port),
            auth_type: info.auth_type,
            auth_token: info.auth_token,
            session_type: info.programming_language,
            use_tls: Some(info.use_tls),
            ..Default::default()
        };
        let core = CoreSession::from_config(session_name, &config).await?;
        Ok(CorePlusSession::new(core, self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_key_config(var: &str) -> EnterpriseSystemConfig {
        EnterpriseSystemConfig {
            url: "https://prod.example.com/iris".into(),
            auth_type: EnterpriseAuthKind::ApiKey,
            api_key_env_var: Some(var.into()),
            username: None,
            password_env_var: None,
            private_key_path: None,
            session_creation: None,
        }
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn api_key_resolved_from_environment() {
        std::env::set_var("DH_TEST_FACTORY_KEY", "k-1");
        let factory = CorePlusSessionFactory::from_config(
            "prod",
            &api_key_config("DH_TEST_FACTORY_KEY"),
        )
        .await
        .unwrap();
        assert_eq!(factory.name(), "prod");
        assert!(matches!(factory.auth, ResolvedAuth::Bearer(ref k) if k.as_str() == "k-1"));
        std::env::remove_var("DH_TEST_FACTORY_KEY");
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn unset_api_key_env_var_is_config_error() {
        std::env::remove_var("DH_TEST_FACTORY_KEY_MISSING");
        let err = CorePlusSessionFactory::from_config(
            "prod",
            &api_key_config("DH_TEST_FACTORY_KEY_MISSING"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("DH_TEST_FACTORY_KEY_MISSING"));
    }

    #[tokio::test]
    async fn private_key_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("factory.pem");
        std::fs::write(&key_path, "pem-material\n").unwrap();

        let config = EnterpriseSystemConfig {
            url: "https://prod.example.com/iris/".into(),
            auth_type: EnterpriseAuthKind::PrivateKey,
            api_key_env_var: None,
            username: None,
            password_env_var: None,
            private_key_path: Some(key_path.to_string_lossy().into_owned()),
            session_creation: None,
        };
        let factory = CorePlusSessionFactory::from_config("prod", &config)
            .await
            .unwrap();
        // Trailing slash is trimmed off the connection descriptor URL.
        assert_eq!(factory.base_url, "https://prod.example.com/iris");
        assert!(
            matches!(factory.auth, ResolvedAuth::Bearer(ref k) if k.as_str() == "pem-material")
        );
    }

    #[tokio::test]
    async fn ping_unreachable_is_connection_error() {
        let config = EnterpriseSystemConfig {
            url: "http://127.0.0.1:1".into(),
            auth_type: EnterpriseAuthKind::Interactive,
            api_key_env_var: None,
            username: None,
            password_env_var: None,
            private_key_path: None,
            session_creation: None,
        };
        let factory = CorePlusSessionFactory::from_config("lab", &config)
            .await
            .unwrap();
        let err = factory.ping().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
