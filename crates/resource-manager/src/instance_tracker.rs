//! Instance tracking and orphaned-resource cleanup.
//!
//! Each server run registers a record file under
//! `~/.deephaven-mcp/instances/` carrying its id, pid, start time, and the
//! pids of any locally launched worker subprocesses. Docker containers are
//! labeled with the instance id instead. On startup,
//! [`cleanup_orphaned_resources`] sweeps records of dead instances and
//! reclaims whatever their `close` never ran for. These two primitives are
//! the only state that survives SIGKILL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;

use dh_domain::{Error, Result};

/// Label key carried by every container launched for a dynamic community
/// session; the value is the owning server's instance id.
pub const CONTAINER_INSTANCE_LABEL: &str = "deephaven-mcp-server-instance";

/// On-disk shape of one instance record.
#[derive(Debug, Serialize, Deserialize)]
struct InstanceRecord {
    instance_id: String,
    pid: u32,
    started_at: String,
    #[serde(default, alias = "pip_processes")]
    python_processes: HashMap<String, u32>,
}

/// `~/.deephaven-mcp/instances`, created on demand by the tracker.
pub fn default_instances_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Internal("cannot determine the user home directory".into()))?;
    Ok(home.join(".deephaven-mcp").join("instances"))
}

/// Check whether a pid is currently running via a signal-0 probe.
///
/// Permission errors mean the pid exists but belongs to someone else; it is
/// reported as running so the reaper skips resources that are not ours.
pub fn is_process_running(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// InstanceTracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Liveness metadata for this server instance, persisted after every
/// change with a temp-file-then-rename write.
#[derive(Debug)]
pub struct InstanceTracker {
    instance_id: String,
    pid: u32,
    started_at: String,
    instance_file: PathBuf,
    children: Mutex<HashMap<String, u32>>,
}

impl InstanceTracker {
    /// Mint a fresh instance id and persist the record.
    pub async fn create_and_register() -> Result<Self> {
        Self::create_and_register_in(default_instances_dir()?).await
    }

    /// As [`create_and_register`], against an explicit instances directory.
    pub async fn create_and_register_in(instances_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&instances_dir).await?;

        let instance_id = uuid::Uuid::new_v4().to_string();
        let tracker = Self {
            instance_file: instances_dir.join(format!("{instance_id}.json")),
            instance_id,
            pid: std::process::id(),
            started_at: chrono::Utc::now().to_rfc3339(),
            children: Mutex::new(HashMap::new()),
        };
        tracker.save().await?;
        tracing::info!(
            instance_id = %tracker.instance_id,
            pid = tracker.pid,
            "instance registered"
        );
        Ok(tracker)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Record a locally launched worker subprocess so the reaper can find
    /// it if this server dies without cleanup.
    pub async fn track_child(&self, session_name: &str, pid: u32) -> Result<()> {
        let mut children = self.children.lock().await;
        children.insert(session_name.to_string(), pid);
        self.save_with(&children).await?;
        tracing::debug!(session = %session_name, pid, "tracking child process");
        Ok(())
    }

    /// Forget a tracked subprocess after its graceful stop. Idempotent;
    /// persistence failures are logged and swallowed so teardown paths
    /// never fail on them.
    pub async fn untrack_child(&self, session_name: &str) {
        let mut children = self.children.lock().await;
        if children.remove(session_name).is_none() {
            return;
        }
        if let Err(e) = self.save_with(&children).await {
            tracing::warn!(session = %session_name, error = %e, "failed to persist untrack");
        } else {
            tracing::debug!(session = %session_name, "stopped tracking child process");
        }
    }

    /// Best-effort removal of the record file on clean shutdown.
    pub async fn unregister(&self) {
        match tokio::fs::remove_file(&self.instance_file).await {
            Ok(()) => {
                tracing::info!(instance_id = %self.instance_id, "instance unregistered");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    instance_id = %self.instance_id,
                    error = %e,
                    "error unregistering instance"
                );
            }
        }
    }

    async fn save(&self) -> Result<()> {
        let children = self.children.lock().await;
        self.save_with(&children).await
    }

    /// Atomic persist: write a sibling temp file, then rename over the
    /// record so readers never observe a partial write.
    async fn save_with(&self, children: &HashMap<String, u32>) -> Result<()> {
        let record = InstanceRecord {
            instance_id: self.instance_id.clone(),
            pid: self.pid,
            started_at: self.started_at.clone(),
            python_processes: children.clone(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        let temp_file = self.instance_file.with_extension("tmp");
        tokio::fs::write(&temp_file, json).await?;
        tokio::fs::rename(&temp_file, &self.instance_file).await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orphan cleanup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reclaim containers and child processes left behind by dead server
/// instances.
///
/// For every record whose pid is no longer running: stop and remove its
/// labeled containers, SIGTERM its tracked child pids, delete the record.
/// Records of live instances are untouched. Every failure is logged and
/// swallowed; orphan reaping never prevents startup.
pub async fn cleanup_orphaned_resources() {
    match default_instances_dir() {
        Ok(dir) => cleanup_orphaned_resources_in(&dir).await,
        Err(e) => tracing::warn!(error = %e, "skipping orphan cleanup"),
    }
}

/// As [`cleanup_orphaned_resources`], against an explicit directory.
pub async fn cleanup_orphaned_resources_in(instances_dir: &Path) {
    let mut entries = match tokio::fs::read_dir(instances_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no instances directory; skipping orphan cleanup");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot read instances directory; skipping orphan cleanup");
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Err(e) = cleanup_instance_record(&path).await {
            tracing::error!(record = %path.display(), error = %e, "error cleaning up instance record");
        }
    }
}

async fn cleanup_instance_record(path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path).await?;
    let record: InstanceRecord = serde_json::from_str(&raw)?;

    if is_process_running(record.pid) {
        tracing::debug!(
            instance_id = %record.instance_id,
            pid = record.pid,
            "instance still running; skipping"
        );
        return Ok(());
    }

    tracing::warn!(
        instance_id = %record.instance_id,
        pid = record.pid,
        "found dead instance; cleaning up orphans"
    );

    cleanup_docker_containers_for_instance(&record.instance_id).await;
    cleanup_child_processes(&record).await;

    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(record = %path.display(), error = %e, "failed to remove instance record");
        }
    }
    tracing::info!(instance_id = %record.instance_id, "orphaned resources cleaned up");
    Ok(())
}

/// Stop and remove every container labeled with the dead instance's id.
/// Per-container failures are tolerated.
async fn cleanup_docker_containers_for_instance(instance_id: &str) {
    let output = Command::new("docker")
        .args([
            "ps",
            "-a",
            "--filter",
            &format!("label={CONTAINER_INSTANCE_LABEL}={instance_id}"),
            "--format",
            "{{.ID}}",
        ])
        .output()
        .await;

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            tracing::warn!(
                stderr = %String::from_utf8_lossy(&output.stderr),
                "docker ps failed during orphan cleanup"
            );
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "docker unavailable during orphan cleanup");
            return;
        }
    };

    let container_ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if container_ids.is_empty() {
        tracing::debug!(instance_id = %instance_id, "no orphaned containers found");
        return;
    }

    tracing::info!(
        instance_id = %instance_id,
        count = container_ids.len(),
        "stopping orphaned containers"
    );
    for container_id in container_ids {
        let short_id = &container_id[..container_id.len().min(12)];
        tracing::info!(container = %short_id, "stopping orphaned container");
        if let Err(e) = Command::new("docker")
            .args(["stop", &container_id])
            .output()
            .await
        {
            tracing::warn!(container = %short_id, error = %e, "docker stop failed");
        }
        if let Err(e) = Command::new("docker")
            .args(["rm", &container_id])
            .output()
            .await
        {
            tracing::warn!(container = %short_id, error = %e, "docker rm failed");
        }
        tracing::info!(container = %short_id, "orphaned container cleaned up");
    }
}

/// SIGTERM each tracked child pid that is still running; already-dead
/// children are skipped.
async fn cleanup_child_processes(record: &InstanceRecord) {
    if record.python_processes.is_empty() {
        tracing::debug!(instance_id = %record.instance_id, "no tracked child processes");
        return;
    }

    for (session_name, pid) in &record.python_processes {
        if !is_process_running(*pid) {
            tracing::debug!(session = %session_name, pid, "child already dead");
            continue;
        }
        tracing::info!(session = %session_name, pid, "terminating orphaned child process");
        if let Err(e) = kill(Pid::from_raw(*pid as i32), Signal::SIGTERM) {
            tracing::warn!(session = %session_name, pid, error = %e, "failed to signal child");
        }
    }
}
