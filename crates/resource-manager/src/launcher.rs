//! Subprocess launchers for dynamic community sessions.
//!
//! Two hosting variants share one contract: launch the worker, expose its
//! endpoint, poll an HTTP liveness endpoint for readiness, and stop
//! best-effort. Containers are labeled with the owning server's instance
//! id so the orphan reaper can find them after a SIGKILL; local processes
//! are tracked through the [`InstanceTracker`](crate::InstanceTracker)
//! by the caller instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use dh_domain::config::LaunchMethod;
use dh_domain::{Error, Result};

use crate::instance_tracker::CONTAINER_INSTANCE_LABEL;

/// Port the worker listens on inside its container; the chosen host port
/// is published to it.
pub const WORKER_INTERNAL_PORT: u16 = 10000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Launch parameters common to both hosting variants.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub session_name: String,
    /// Pre-selected free host port (see [`find_available_port`]).
    pub port: u16,
    pub auth_type: String,
    pub auth_token: String,
    pub heap_size_gb: u32,
    pub extra_jvm_args: Vec<String>,
    pub environment_vars: HashMap<String, String>,
    /// Owning server's instance id; propagated to the child for orphan
    /// discovery.
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DockerLaunchOptions {
    pub image: String,
    pub memory_limit_gb: Option<f64>,
    pub cpu_limit: Option<f64>,
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PythonLaunchOptions {
    /// Virtual environment whose `bin/deephaven` hosts the worker; the
    /// bare `deephaven` on PATH when absent.
    pub venv_path: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn jvm_args(opts: &LaunchOptions) -> Vec<String> {
    let mut args = vec![format!("-Xmx{}g", opts.heap_size_gb)];
    if !opts.auth_token.is_empty() {
        args.push(format!("-Dauthentication.psk={}", opts.auth_token));
    }
    args.extend(opts.extra_jvm_args.iter().cloned());
    args
}

pub(crate) fn docker_run_args(
    opts: &LaunchOptions,
    docker: &DockerLaunchOptions,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        format!("deephaven-mcp-{}", opts.session_name),
        "-p".to_string(),
        format!("{}:{WORKER_INTERNAL_PORT}", opts.port),
    ];
    if let Some(instance_id) = &opts.instance_id {
        args.push("--label".to_string());
        args.push(format!("{CONTAINER_INSTANCE_LABEL}={instance_id}"));
    }
    if let Some(memory_gb) = docker.memory_limit_gb {
        args.push("--memory".to_string());
        args.push(format!("{memory_gb}g"));
    }
    if let Some(cpus) = docker.cpu_limit {
        args.push("--cpus".to_string());
        args.push(cpus.to_string());
    }
    for volume in &docker.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }

    let mut env_names: Vec<&String> = opts.environment_vars.keys().collect();
    env_names.sort();
    for name in env_names {
        args.push("-e".to_string());
        args.push(format!("{name}={}", opts.environment_vars[name]));
    }
    args.push("-e".to_string());
    args.push(format!("START_OPTS={}", jvm_args(opts).join(" ")));

    args.push(docker.image.clone());
    args
}

pub(crate) fn python_server_executable(venv_path: Option<&Path>) -> PathBuf {
    match venv_path {
        Some(venv) => venv.join("bin").join("deephaven"),
        None => PathBuf::from("deephaven"),
    }
}

pub(crate) fn python_server_args(opts: &LaunchOptions) -> Vec<String> {
    vec![
        "server".to_string(),
        "--port".to_string(),
        opts.port.to_string(),
        "--jvm-args".to_string(),
        jvm_args(opts).join(" "),
    ]
}

/// Probe the OS for a free TCP port by binding port 0 and reading back the
/// assignment.
///
/// There is a narrow window between this probe and the launch in which
/// another process can claim the port. The library does not close that
/// window; callers that allocate many ports in parallel (tests, mostly)
/// must serialize their allocations themselves.
pub fn find_available_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LaunchedWorker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
enum LaunchBackend {
    Docker {
        container_id: String,
        stopped: std::sync::atomic::AtomicBool,
    },
    Python {
        pid: u32,
        child: Mutex<Option<Child>>,
    },
}

/// Handle to a launched worker subprocess, owned by exactly one dynamic
/// session manager.
#[derive(Debug)]
pub struct LaunchedWorker {
    session_name: String,
    port: u16,
    auth_type: String,
    auth_token: String,
    backend: LaunchBackend,
    http: reqwest::Client,
}

impl LaunchedWorker {
    /// Start the worker in a detached container, labeled with the owning
    /// instance id and publishing the chosen host port.
    pub async fn launch_docker(
        opts: LaunchOptions,
        docker: DockerLaunchOptions,
    ) -> Result<Self> {
        let args = docker_run_args(&opts, &docker);
        tracing::info!(
            session = %opts.session_name,
            image = %docker.image,
            port = opts.port,
            "launching docker worker"
        );

        let output = Command::new("docker").args(&args).output().await.map_err(|e| {
            Error::SessionCreation(format!(
                "failed to invoke docker for session '{}': {e}",
                opts.session_name
            ))
        })?;
        if !output.status.success() {
            return Err(Error::SessionCreation(format!(
                "docker run failed for session '{}': {}",
                opts.session_name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(Error::SessionCreation(format!(
                "docker run for session '{}' returned no container id",
                opts.session_name
            )));
        }
        tracing::info!(
            session = %opts.session_name,
            container = %&container_id[..container_id.len().min(12)],
            "docker worker started"
        );

        Ok(Self::assemble(
            opts,
            LaunchBackend::Docker {
                container_id,
                stopped: std::sync::atomic::AtomicBool::new(false),
            },
        ))
    }

    /// Start the worker as a local subprocess of the configured runtime.
    /// The caller is responsible for tracking the returned pid through the
    /// instance tracker.
    pub async fn launch_python(
        opts: LaunchOptions,
        python: PythonLaunchOptions,
    ) -> Result<Self> {
        let executable = python_server_executable(python.venv_path.as_deref());
        let args = python_server_args(&opts);
        tracing::info!(
            session = %opts.session_name,
            executable = %executable.display(),
            port = opts.port,
            "launching python worker"
        );

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .envs(&opts.environment_vars)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let child = command.spawn().map_err(|e| {
            Error::SessionCreation(format!(
                "failed to spawn '{}' for session '{}': {e}",
                executable.display(),
                opts.session_name
            ))
        })?;
        let pid = child.id().ok_or_else(|| {
            Error::SessionCreation(format!(
                "worker process for session '{}' exited before launch completed",
                opts.session_name
            ))
        })?;
        tracing::info!(session = %opts.session_name, pid, "python worker started");

        Ok(Self::assemble(
            opts,
            LaunchBackend::Python {
                pid,
                child: Mutex::new(Some(child)),
            },
        ))
    }

    fn assemble(opts: LaunchOptions, backend: LaunchBackend) -> Self {
        Self {
            session_name: opts.session_name,
            port: opts.port,
            auth_type: opts.auth_type,
            auth_token: opts.auth_token,
            backend,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn launch_method(&self) -> LaunchMethod {
        match self.backend {
            LaunchBackend::Docker { .. } => LaunchMethod::Docker,
            LaunchBackend::Python { .. } => LaunchMethod::Python,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_type(&self) -> &str {
        &self.auth_type
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn container_id(&self) -> Option<&str> {
        match &self.backend {
            LaunchBackend::Docker { container_id, .. } => Some(container_id),
            LaunchBackend::Python { .. } => None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.backend {
            LaunchBackend::Docker { .. } => None,
            LaunchBackend::Python { pid, .. } => Some(*pid),
        }
    }

    pub fn connection_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn connection_url_with_auth(&self) -> String {
        if self.auth_token.is_empty() {
            self.connection_url()
        } else {
            format!("{}?authToken={}", self.connection_url(), self.auth_token)
        }
    }

    /// Poll the worker's HTTP liveness endpoint until it answers or the
    /// deadline passes. Returns whether the worker became ready; never
    /// errors.
    pub async fn wait_until_ready(&self, timeout: Duration, interval: Duration) -> bool {
        let url = format!("{}/health", self.connection_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(session = %self.session_name, "worker is ready");
                    return true;
                }
                Ok(response) => {
                    tracing::debug!(
                        session = %self.session_name,
                        status = %response.status(),
                        "worker not ready yet"
                    );
                }
                Err(e) => {
                    tracing::debug!(session = %self.session_name, error = %e, "worker not reachable yet");
                }
            }
            if tokio::time::Instant::now() + interval > deadline {
                tracing::warn!(
                    session = %self.session_name,
                    timeout_seconds = timeout.as_secs(),
                    "worker failed to become ready before the deadline"
                );
                return false;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Terminate the worker. Best-effort, repeat-safe, never errors.
    pub async fn stop(&self) {
        match &self.backend {
            LaunchBackend::Docker {
                container_id,
                stopped,
            } => {
                if stopped.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    return;
                }
                let short_id = &container_id[..container_id.len().min(12)];
                tracing::info!(session = %self.session_name, container = %short_id, "stopping docker worker");
                if let Err(e) = Command::new("docker")
                    .args(["stop", container_id])
                    .output()
                    .await
                {
                    tracing::warn!(container = %short_id, error = %e, "docker stop failed");
                }
                if let Err(e) = Command::new("docker")
                    .args(["rm", container_id])
                    .output()
                    .await
                {
                    tracing::warn!(container = %short_id, error = %e, "docker rm failed");
                }
            }
            LaunchBackend::Python { pid, child } => {
                let mut guard = child.lock().await;
                let Some(mut child) = guard.take() else {
                    return;
                };
                tracing::info!(session = %self.session_name, pid, "stopping python worker");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(pid, error = %e, "failed to signal worker process");
                }
                if let Err(e) = child.wait().await {
                    tracing::warn!(pid, error = %e, "failed to reap worker process");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LaunchOptions {
        LaunchOptions {
            session_name: "it".into(),
            port: 45123,
            auth_type: "PSK".into(),
            auth_token: "tok-1".into(),
            heap_size_gb: 2,
            extra_jvm_args: vec!["-Dextra=1".into()],
            environment_vars: HashMap::from([("DH_OPT".to_string(), "x".to_string())]),
            instance_id: Some("instance-123".into()),
        }
    }

    #[test]
    fn docker_args_carry_label_port_and_limits() {
        let docker = DockerLaunchOptions {
            image: "ghcr.io/deephaven/server:latest".into(),
            memory_limit_gb: Some(4.0),
            cpu_limit: Some(1.5),
            volumes: vec!["/data:/data".into()],
        };
        let args = docker_run_args(&options(), &docker);
        let joined = args.join(" ");

        assert!(joined.starts_with("run -d --name deephaven-mcp-it"));
        assert!(joined.contains("-p 45123:10000"));
        assert!(joined.contains("--label deephaven-mcp-server-instance=instance-123"));
        assert!(joined.contains("--memory 4g"));
        assert!(joined.contains("--cpus 1.5"));
        assert!(joined.contains("-v /data:/data"));
        assert!(joined.contains("-e DH_OPT=x"));
        assert!(joined.contains("START_OPTS=-Xmx2g -Dauthentication.psk=tok-1 -Dextra=1"));
        assert_eq!(args.last().unwrap(), "ghcr.io/deephaven/server:latest");
    }

    #[test]
    fn docker_args_omit_unset_limits_and_label() {
        let mut opts = options();
        opts.instance_id = None;
        opts.auth_token = String::new();
        let docker = DockerLaunchOptions {
            image: "img".into(),
            memory_limit_gb: None,
            cpu_limit: None,
            volumes: vec![],
        };
        let joined = docker_run_args(&opts, &docker).join(" ");
        assert!(!joined.contains("--label"));
        assert!(!joined.contains("--memory"));
        assert!(!joined.contains("--cpus"));
        assert!(!joined.contains("authentication.psk"));
    }

    #[test]
    fn python_command_resolution() {
        assert_eq!(
            python_server_executable(None),
            PathBuf::from("deephaven")
        );
        assert_eq!(
            python_server_executable(Some(Path::new("/opt/venv"))),
            PathBuf::from("/opt/venv/bin/deephaven")
        );

        let args = python_server_args(&options());
        assert_eq!(args[0], "server");
        assert!(args.join(" ").contains("--port 45123"));
        assert!(args.join(" ").contains("-Xmx2g"));
    }

    #[test]
    fn port_probe_returns_bindable_port() {
        let port = find_available_port().unwrap();
        assert!(port > 0);
        // Immediately rebindable (nothing else grabbed it in this test).
        std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    fn worker_on_port(port: u16, token: &str) -> LaunchedWorker {
        LaunchedWorker {
            session_name: "w".into(),
            port,
            auth_type: "PSK".into(),
            auth_token: token.into(),
            backend: LaunchBackend::Docker {
                container_id: "cafebabe".into(),
                stopped: std::sync::atomic::AtomicBool::new(false),
            },
            http: reqwest::Client::new(),
        }
    }

    #[test]
    fn connection_urls() {
        let worker = worker_on_port(45123, "tok-9");
        assert_eq!(worker.connection_url(), "http://localhost:45123");
        assert_eq!(
            worker.connection_url_with_auth(),
            "http://localhost:45123?authToken=tok-9"
        );
        assert_eq!(
            worker_on_port(45123, "").connection_url_with_auth(),
            "http://localhost:45123"
        );
    }

    #[tokio::test]
    async fn wait_until_ready_succeeds_against_listener() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buffer = [0u8; 1024];
                let _ = stream.read(&mut buffer).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                    .await;
            }
        });

        let worker = worker_on_port(port, "");
        assert!(
            worker
                .wait_until_ready(Duration::from_secs(5), Duration::from_millis(50))
                .await
        );
    }

    #[tokio::test]
    async fn wait_until_ready_times_out_quietly() {
        // Allocate-and-release leaves the port closed; the poll must give
        // up without erroring.
        let port = find_available_port().unwrap();
        let worker = worker_on_port(port, "");
        assert!(
            !worker
                .wait_until_ready(Duration::from_millis(300), Duration::from_millis(50))
                .await
        );
    }
}
