//! Defaults for dynamically created community and enterprise sessions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a dynamic community session's worker process is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMethod {
    Docker,
    Python,
}

impl LaunchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMethod::Docker => "docker",
            LaunchMethod::Python => "python",
        }
    }
}

impl std::fmt::Display for LaunchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LaunchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(LaunchMethod::Docker),
            "python" => Ok(LaunchMethod::Python),
            other => Err(format!(
                "unknown launch_method '{other}' (expected 'docker' or 'python')"
            )),
        }
    }
}

/// Fallback values used when the `session_creation` section does not
/// override them.
pub mod defaults {
    use super::LaunchMethod;

    pub const MAX_CONCURRENT_SESSIONS: usize = 5;
    pub const LAUNCH_METHOD: LaunchMethod = LaunchMethod::Docker;
    pub const DOCKER_IMAGE: &str = "ghcr.io/deephaven/server:latest";
    pub const HEAP_SIZE_GB: u32 = 4;
    pub const STARTUP_TIMEOUT_SECONDS: u64 = 120;
    pub const STARTUP_CHECK_INTERVAL_SECONDS: u64 = 2;
    pub const STARTUP_RETRIES: u32 = 1;
}

/// The `session_creation` configuration sub-tree.
///
/// All fields are optional; the resolved accessors fall back to the
/// [`defaults`] constants.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SessionCreationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_sessions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_launch_method: Option<LaunchMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_memory_limit_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_cpu_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_venv_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heap_size_gb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_jvm_args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_vars: Option<HashMap<String, String>>,
    /// Environment variable to source dynamic-session auth tokens from.
    /// When configured, the variable must be set in the server environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_check_interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_retries: Option<u32>,
}

impl SessionCreationConfig {
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_concurrent_sessions
            .unwrap_or(defaults::MAX_CONCURRENT_SESSIONS)
    }

    pub fn launch_method(&self) -> LaunchMethod {
        self.default_launch_method.unwrap_or(defaults::LAUNCH_METHOD)
    }

    pub fn docker_image(&self) -> String {
        self.docker_image
            .clone()
            .unwrap_or_else(|| defaults::DOCKER_IMAGE.to_string())
    }

    pub fn heap_size_gb(&self) -> u32 {
        self.heap_size_gb.unwrap_or(defaults::HEAP_SIZE_GB)
    }

    pub fn startup_timeout_seconds(&self) -> u64 {
        self.startup_timeout_seconds
            .unwrap_or(defaults::STARTUP_TIMEOUT_SECONDS)
    }

    pub fn startup_check_interval_seconds(&self) -> u64 {
        self.startup_check_interval_seconds
            .unwrap_or(defaults::STARTUP_CHECK_INTERVAL_SECONDS)
    }

    pub fn startup_retries(&self) -> u32 {
        self.startup_retries.unwrap_or(defaults::STARTUP_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_accessors_fall_back_to_defaults() {
        let config = SessionCreationConfig::default();
        assert_eq!(
            config.max_concurrent_sessions(),
            defaults::MAX_CONCURRENT_SESSIONS
        );
        assert_eq!(config.launch_method(), LaunchMethod::Docker);
        assert_eq!(config.docker_image(), defaults::DOCKER_IMAGE);
        assert_eq!(config.heap_size_gb(), defaults::HEAP_SIZE_GB);
    }

    #[test]
    fn overrides_win() {
        let config = SessionCreationConfig {
            max_concurrent_sessions: Some(2),
            default_launch_method: Some(LaunchMethod::Python),
            ..Default::default()
        };
        assert_eq!(config.max_concurrent_sessions(), 2);
        assert_eq!(config.launch_method(), LaunchMethod::Python);
    }

    #[test]
    fn launch_method_round_trips_from_str() {
        assert_eq!("docker".parse::<LaunchMethod>().unwrap(), LaunchMethod::Docker);
        assert_eq!("python".parse::<LaunchMethod>().unwrap(), LaunchMethod::Python);
        assert!("podman".parse::<LaunchMethod>().is_err());
    }
}
