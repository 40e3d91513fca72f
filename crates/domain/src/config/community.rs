//! Community (Core) session configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Connection settings for one configured community worker.
///
/// Every field is optional; the session builder supplies the defaults
/// (`localhost:10000`, anonymous auth, python, no TLS). TLS fields are file
/// paths whose bytes are loaded lazily at session-construction time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CommunitySessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Name of an environment variable to source the auth token from.
    /// Mutually exclusive with `auth_token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub never_timeout: Option<bool>,
    /// Session kind tag ("python" or "groovy").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_tls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_root_certs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_chain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_private_key: Option<String>,
}

impl CommunitySessionConfig {
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if self.auth_token.is_some() && self.auth_token_env_var.is_some() {
            return Err(Error::Config(format!(
                "community session '{name}': 'auth_token' and 'auth_token_env_var' \
                 are mutually exclusive"
            )));
        }
        Ok(())
    }
}

/// Log-safe view of a community session config: the auth token is replaced
/// with a redaction marker, everything else passes through.
pub fn redact_community_session_config(config: &CommunitySessionConfig) -> Value {
    let mut value = serde_json::to_value(config).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        if map.contains_key("auth_token") {
            map.insert("auth_token".to_string(), Value::String("[REDACTED]".into()));
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_masks_token_only() {
        let config = CommunitySessionConfig {
            host: Some("localhost".into()),
            auth_token: Some("very-secret".into()),
            ..Default::default()
        };
        let redacted = redact_community_session_config(&config);
        assert_eq!(redacted["auth_token"], "[REDACTED]");
        assert_eq!(redacted["host"], "localhost");
        assert!(!redacted.to_string().contains("very-secret"));
    }

    #[test]
    fn redaction_leaves_absent_token_absent() {
        let config = CommunitySessionConfig::default();
        let redacted = redact_community_session_config(&config);
        assert!(redacted.get("auth_token").is_none());
    }
}
