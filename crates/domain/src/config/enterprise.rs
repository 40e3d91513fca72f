//! Enterprise (Core+) system configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SessionCreationConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnterpriseAuthKind {
    ApiKey,
    Password,
    PrivateKey,
    Interactive,
}

/// Connection settings for one enterprise session factory.
///
/// Credentials are referenced by indirection (environment variable names or
/// key file paths) and resolved when the factory is constructed, never at
/// configuration-load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnterpriseSystemConfig {
    /// Connection descriptor URL of the factory.
    pub url: String,
    pub auth_type: EnterpriseAuthKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    /// Per-system overrides of the dynamic-session creation defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_creation: Option<SessionCreationConfig>,
}

impl EnterpriseSystemConfig {
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        match self.auth_type {
            EnterpriseAuthKind::ApiKey if self.api_key_env_var.is_none() => {
                Err(Error::Config(format!(
                    "enterprise system '{name}': auth_type 'api_key' requires \
                     'api_key_env_var'"
                )))
            }
            EnterpriseAuthKind::Password
                if self.username.is_none() || self.password_env_var.is_none() =>
            {
                Err(Error::Config(format!(
                    "enterprise system '{name}': auth_type 'password' requires \
                     'username' and 'password_env_var'"
                )))
            }
            EnterpriseAuthKind::PrivateKey if self.private_key_path.is_none() => {
                Err(Error::Config(format!(
                    "enterprise system '{name}': auth_type 'private_key' requires \
                     'private_key_path'"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Log-safe view of an enterprise system config. Credential indirections
/// (variable names, key paths) are not secrets and pass through unchanged.
pub fn redact_enterprise_system_config(config: &EnterpriseSystemConfig) -> Value {
    // Nothing secret is stored inline today; this seam exists so any future
    // inline credential field gets masked in one place.
    serde_json::to_value(config).unwrap_or(Value::Null)
}
