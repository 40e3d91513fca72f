//! The deephaven-mcp configuration document.
//!
//! The document is a single JSON file whose path comes from the
//! `DH_MCP_CONFIG_FILE` environment variable. Schemas are strict: unknown
//! keys are rejected at every level, and cross-field rules that serde cannot
//! express are enforced by [`McpConfig::validate`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

mod community;
mod creation;
mod enterprise;
mod manager;

pub use community::{redact_community_session_config, CommunitySessionConfig};
pub use creation::{defaults, LaunchMethod, SessionCreationConfig};
pub use enterprise::{
    redact_enterprise_system_config, EnterpriseAuthKind, EnterpriseSystemConfig,
};
pub use manager::{ConfigManager, CONFIG_ENV_VAR};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct McpConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community: Option<CommunityConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<EnterpriseConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_creation: Option<SessionCreationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,
    /// Name of the community session other tools fall back to when no
    /// explicit worker name is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_worker: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CommunityConfig {
    #[serde(default)]
    pub sessions: HashMap<String, CommunitySessionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EnterpriseConfig {
    #[serde(default)]
    pub systems: HashMap<String, EnterpriseSystemConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Security toggles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    #[serde(default)]
    pub community: CommunitySecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CommunitySecurityConfig {
    /// Gate for the `session_community_credentials` tool. Disabled unless
    /// explicitly set to `enabled`.
    #[serde(default)]
    pub credential_retrieval_mode: CredentialRetrievalMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialRetrievalMode {
    #[default]
    Disabled,
    Enabled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl McpConfig {
    /// Enforce the cross-field rules that serde's strict schemas cannot:
    /// non-empty session maps, auth-token exclusivity, per-system auth
    /// requirements, and the `default_worker` reference.
    ///
    /// Deterministic and idempotent: validating an accepted document never
    /// changes it and always reaches the same verdict.
    pub fn validate(&self) -> Result<()> {
        if let Some(community) = &self.community {
            if community.sessions.is_empty() {
                return Err(Error::Config(
                    "'community.sessions' must contain at least one entry when present"
                        .to_string(),
                ));
            }
            for (name, session) in &community.sessions {
                session.validate(name)?;
            }
        }

        if let Some(enterprise) = &self.enterprise {
            for (name, system) in &enterprise.systems {
                system.validate(name)?;
            }
        }

        if let Some(default_worker) = &self.default_worker {
            let known = self
                .community
                .as_ref()
                .map(|c| c.sessions.contains_key(default_worker))
                .unwrap_or(false);
            if !known {
                return Err(Error::Config(format!(
                    "default_worker '{default_worker}' is not a configured community session"
                )));
            }
        }

        Ok(())
    }

    pub fn community_session(&self, name: &str) -> Result<&CommunitySessionConfig> {
        self.community
            .as_ref()
            .and_then(|c| c.sessions.get(name))
            .ok_or_else(|| {
                Error::Config(format!(
                    "community session '{name}' not found in configuration"
                ))
            })
    }

    pub fn community_session_names(&self) -> Vec<String> {
        self.community
            .as_ref()
            .map(|c| c.sessions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn enterprise_system(&self, name: &str) -> Result<&EnterpriseSystemConfig> {
        self.enterprise
            .as_ref()
            .and_then(|e| e.systems.get(name))
            .ok_or_else(|| {
                Error::Config(format!(
                    "enterprise system '{name}' not found in configuration"
                ))
            })
    }

    pub fn enterprise_system_names(&self) -> Vec<String> {
        self.enterprise
            .as_ref()
            .map(|e| e.systems.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Effective dynamic-session creation defaults (an empty config when the
    /// `session_creation` section is absent).
    pub fn session_creation(&self) -> SessionCreationConfig {
        self.session_creation.clone().unwrap_or_default()
    }

    pub fn credential_retrieval_mode(&self) -> CredentialRetrievalMode {
        self.security
            .as_ref()
            .map(|s| s.community.credential_retrieval_mode)
            .unwrap_or_default()
    }
}
