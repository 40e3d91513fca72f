//! Dynamic community session tools: create, delete, credentials.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use dh_domain::config::{
    CommunitySessionConfig, CredentialRetrievalMode, LaunchMethod,
};
use dh_resource_manager::{
    find_available_port, DockerLaunchOptions, DynamicCommunitySessionManager,
    LaunchOptions, LaunchedWorker, PythonLaunchOptions, SessionHandle,
};

use crate::context::ToolContext;
use crate::tools::shared::{error_response, parse_args};

fn dynamic_fq_name(session_name: &str) -> String {
    format!("community:dynamic:{session_name}")
}

#[derive(Debug, Deserialize)]
struct CommunityCreateRequest {
    #[serde(default)]
    session_name: Option<String>,
    #[serde(default)]
    launch_method: Option<String>,
    #[serde(default)]
    auth_type: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    heap_size_gb: Option<u32>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    docker_image: Option<String>,
    #[serde(default)]
    python_venv_path: Option<String>,
    #[serde(default)]
    extra_jvm_args: Option<Vec<String>>,
    #[serde(default)]
    environment_vars: Option<HashMap<String, String>>,
}

/// Launch a new community worker (container or local process), wait for it
/// to become ready, and register it under `community:dynamic:{name}`.
pub async fn session_community_create(context: &ToolContext, args: &Value) -> Value {
    let request: CommunityCreateRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        session = ?request.session_name,
        launch_method = ?request.launch_method,
        "[session_community_create] invoked"
    );

    let config = match context.config_manager.get_config().await {
        Ok(config) => config,
        Err(e) => return error_response(e.to_string()),
    };
    let creation = config.session_creation();

    // Concurrency cap over everything registered via add_session.
    let added = match context.session_registry.count_added_sessions().await {
        Ok(count) => count,
        Err(e) => return error_response(e.to_string()),
    };
    let max_sessions = creation.max_concurrent_sessions();
    if added >= max_sessions {
        return error_response(format!(
            "Maximum concurrent dynamic sessions ({max_sessions}) reached; \
             delete a session before creating another"
        ));
    }

    let session_name = request.session_name.unwrap_or_else(|| {
        format!(
            "mcp-session-{}",
            &uuid::Uuid::new_v4().to_string()[..8]
        )
    });
    let fq_name = dynamic_fq_name(&session_name);
    if context.session_registry.get(&fq_name).await.is_ok() {
        return error_response(format!("Session '{session_name}' already exists"));
    }

    let launch_method = match &request.launch_method {
        Some(raw) => match raw.parse::<LaunchMethod>() {
            Ok(method) => method,
            Err(e) => return error_response(e),
        },
        None => creation.launch_method(),
    };

    // Auth resolution: explicit token, then the configured env var (which
    // must be set when named), then a generated PSK.
    let auth_type = request.auth_type.unwrap_or_else(|| "PSK".to_string());
    let auth_token = if auth_type == "Anonymous" {
        String::new()
    } else if let Some(token) = request.auth_token {
        token
    } else if let Some(var) = &creation.auth_token_env_var {
        match std::env::var(var) {
            Ok(token) => token,
            Err(_) => {
                return error_response(format!(
                    "Configured auth token environment variable '{var}' is not set"
                ))
            }
        }
    } else {
        uuid::Uuid::new_v4().simple().to_string()
    };

    let port = match request.port {
        Some(port) => port,
        None => match find_available_port() {
            Ok(port) => port,
            Err(e) => return error_response(format!("Failed to allocate a port: {e}")),
        },
    };

    let options = LaunchOptions {
        session_name: session_name.clone(),
        port,
        auth_type: auth_type.clone(),
        auth_token: auth_token.clone(),
        heap_size_gb: request.heap_size_gb.unwrap_or_else(|| creation.heap_size_gb()),
        extra_jvm_args: request
            .extra_jvm_args
            .or_else(|| creation.extra_jvm_args.clone())
            .unwrap_or_default(),
        environment_vars: request
            .environment_vars
            .or_else(|| creation.environment_vars.clone())
            .unwrap_or_default(),
        instance_id: context
            .instance_tracker
            .as_ref()
            .map(|tracker| tracker.instance_id().to_string()),
    };

    let launched = match launch_method {
        LaunchMethod::Docker => {
            LaunchedWorker::launch_docker(
                options,
                DockerLaunchOptions {
                    image: request
                        .docker_image
                        .unwrap_or_else(|| creation.docker_image()),
                    memory_limit_gb: creation.docker_memory_limit_gb,
                    cpu_limit: creation.docker_cpu_limit,
                    volumes: Vec::new(),
                },
            )
            .await
        }
        LaunchMethod::Python => {
            LaunchedWorker::launch_python(
                options,
                PythonLaunchOptions {
                    venv_path: request
                        .python_venv_path
                        .or_else(|| creation.python_venv_path.clone())
                        .map(Into::into),
                },
            )
            .await
        }
    };
    let worker = match launched {
        Ok(worker) => Arc::new(worker),
        Err(e) => {
            tracing::error!(session = %session_name, error = %e, "[session_community_create] launch failed");
            return error_response(e.to_string());
        }
    };

    // Local processes are tracked immediately so a crash before delete
    // still leaves the reaper a pid to find.
    if let (Some(tracker), Some(pid)) = (&context.instance_tracker, worker.pid()) {
        if let Err(e) = tracker.track_child(&session_name, pid).await {
            tracing::warn!(session = %session_name, error = %e, "failed to track child process");
        }
    }

    let timeout = Duration::from_secs(creation.startup_timeout_seconds());
    let interval = Duration::from_secs(creation.startup_check_interval_seconds());
    let mut ready = false;
    for attempt in 1..=creation.startup_retries().max(1) {
        if worker.wait_until_ready(timeout, interval).await {
            ready = true;
            break;
        }
        tracing::warn!(session = %session_name, attempt, "readiness attempt failed");
    }
    if !ready {
        worker.stop().await;
        if let Some(tracker) = &context.instance_tracker {
            tracker.untrack_child(&session_name).await;
        }
        return error_response(format!(
            "Session '{session_name}' failed to become ready within {}s",
            timeout.as_secs() * u64::from(creation.startup_retries().max(1))
        ));
    }

    let session_config = CommunitySessionConfig {
        host: Some("localhost".into()),
        port: Some(port),
        auth_type: Some(auth_type.clone()),
        auth_token: (!auth_token.is_empty()).then(|| auth_token.clone()),
        session_type: Some("python".into()),
        ..Default::default()
    };
    let manager = Arc::new(DynamicCommunitySessionManager::new(
        &session_name,
        &session_config,
        worker.clone(),
        context.instance_tracker.clone(),
    ));

    if let Err(e) = context
        .session_registry
        .add_session(SessionHandle::Dynamic(manager.clone()))
        .await
    {
        // Lost a race on the name; roll the subprocess back.
        if let Err(close_err) = manager.close().await {
            tracing::warn!(session = %session_name, error = %close_err, "rollback close failed");
        }
        return error_response(e.to_string());
    }

    tracing::info!(session = %fq_name, port, "[session_community_create] session ready");
    let mut response = json!({
        "success": true,
        "session_id": fq_name,
        "connection_url": worker.connection_url(),
        "connection_url_with_auth": worker.connection_url_with_auth(),
        "auth_type": auth_type,
        "port": port,
        "launch_method": launch_method.as_str(),
    });
    let map = response.as_object_mut().unwrap();
    if !auth_token.is_empty() {
        map.insert("auth_token".into(), json!(auth_token));
    }
    if let Some(container_id) = worker.container_id() {
        map.insert("container_id".into(), json!(container_id));
    }
    if let Some(pid) = worker.pid() {
        map.insert("process_id".into(), json!(pid));
    }
    response
}

#[derive(Debug, Deserialize)]
struct CommunityDeleteRequest {
    session_name: String,
}

/// Close a dynamic session and remove it from the registry. Unknown names
/// are a no-op.
pub async fn session_community_delete(context: &ToolContext, args: &Value) -> Value {
    let request: CommunityDeleteRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let fq_name = dynamic_fq_name(&request.session_name);
    tracing::info!(session = %fq_name, "[session_community_delete] invoked");

    match context.session_registry.remove_session(&fq_name).await {
        Ok(Some(handle)) => {
            if let Err(e) = handle.close().await {
                tracing::warn!(session = %fq_name, error = %e, "error closing removed session");
            }
            json!({"success": true})
        }
        Ok(None) => {
            tracing::info!(session = %fq_name, "[session_community_delete] unknown session; no-op");
            json!({"success": true})
        }
        Err(e) => error_response(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct CommunityCredentialsRequest {
    session_name: String,
}

/// Connection credentials for a dynamic session. Disabled unless the
/// `security.community.credential_retrieval_mode` toggle allows it.
pub async fn session_community_credentials(context: &ToolContext, args: &Value) -> Value {
    let request: CommunityCredentialsRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(session = %request.session_name, "[session_community_credentials] invoked");

    let config = match context.config_manager.get_config().await {
        Ok(config) => config,
        Err(e) => return error_response(e.to_string()),
    };
    if config.credential_retrieval_mode() != CredentialRetrievalMode::Enabled {
        return error_response(
            "Credential retrieval is disabled; set \
             security.community.credential_retrieval_mode to 'enabled' to allow it",
        );
    }

    let fq_name = dynamic_fq_name(&request.session_name);
    let handle = match context.session_registry.get(&fq_name).await {
        Ok(handle) => handle,
        Err(_) => {
            return error_response(format!("Session '{}' not found", request.session_name))
        }
    };
    let Some(Value::Object(credentials)) = handle.dynamic_info() else {
        return error_response(format!(
            "Session '{}' is not a dynamically created session",
            request.session_name
        ));
    };

    let mut response = json!({"success": true});
    let map = response.as_object_mut().unwrap();
    for (key, value) in credentials {
        map.insert(key, value);
    }
    response
}
