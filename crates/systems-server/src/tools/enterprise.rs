//! Enterprise system tools: factory status, session create/delete.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use dh_client::{BaseSession, NewSessionParams};
use dh_domain::config::redact_enterprise_system_config;
use dh_resource_manager::{
    enterprise_session_manager, SessionCreationFn, SessionHandle, SystemType,
};

use crate::context::ToolContext;
use crate::tools::shared::{error_response, format_initialization_status, parse_args};

fn enterprise_fq_name(system_name: &str, session_name: &str) -> String {
    format!("{}:{system_name}:{session_name}", SystemType::Enterprise.as_str())
}

#[derive(Debug, Deserialize)]
struct SystemsStatusRequest {
    #[serde(default)]
    attempt_to_connect: bool,
}

/// Health of every configured enterprise system, with redacted config.
pub async fn enterprise_systems_status(context: &ToolContext, args: &Value) -> Value {
    let request: SystemsStatusRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        attempt_to_connect = request.attempt_to_connect,
        "[enterprise_systems_status] invoked"
    );

    let config = match context.config_manager.get_config().await {
        Ok(config) => config,
        Err(e) => return error_response(e.to_string()),
    };
    let factories = match context.session_registry.factories().await {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(e.to_string()),
    };

    let mut names: Vec<&String> = factories.items.keys().collect();
    names.sort();
    let mut systems = Vec::with_capacity(names.len());
    for name in names {
        let manager = &factories.items[name];
        let (status, detail) = manager.liveness_status(request.attempt_to_connect).await;
        let mut entry = json!({"name": name, "status": status.as_str()});
        if let Some(detail) = detail {
            entry["detail"] = json!(detail);
        }
        if let Ok(system_config) = config.enterprise_system(name) {
            entry["config"] = redact_enterprise_system_config(system_config);
        }
        systems.push(entry);
    }

    let mut response = json!({"success": true, "systems": systems});
    if let Ok((phase, errors)) = context.session_registry.initialization_status().await {
        if let Some(init) = format_initialization_status(phase, &errors) {
            response["initialization"] = init;
        }
    }
    response
}

#[derive(Debug, Deserialize)]
struct EnterpriseCreateRequest {
    system_name: String,
    #[serde(default)]
    session_name: Option<String>,
    #[serde(default)]
    heap_size_gb: Option<u32>,
    #[serde(default)]
    programming_language: Option<String>,
}

/// Mint a new session on an enterprise system and register it under
/// `enterprise:{system}:{name}`.
pub async fn session_enterprise_create(context: &ToolContext, args: &Value) -> Value {
    let request: EnterpriseCreateRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        system = %request.system_name,
        session = ?request.session_name,
        "[session_enterprise_create] invoked"
    );

    let config = match context.config_manager.get_config().await {
        Ok(config) => config,
        Err(e) => return error_response(e.to_string()),
    };
    let system_config = match config.enterprise_system(&request.system_name) {
        Ok(system_config) => system_config,
        Err(e) => return error_response(e.to_string()),
    };
    // Per-system creation overrides win over the global defaults.
    let creation = system_config
        .session_creation
        .clone()
        .or_else(|| config.session_creation.clone())
        .unwrap_or_default();

    let max_sessions = creation.max_concurrent_sessions();
    let current = match context
        .session_registry
        .count_added_sessions_for_source(&request.system_name)
        .await
    {
        Ok(count) => count,
        Err(e) => return error_response(e.to_string()),
    };
    if current >= max_sessions {
        return error_response(format!(
            "Maximum concurrent sessions ({max_sessions}) reached for enterprise \
             system '{}'",
            request.system_name
        ));
    }

    let session_name = request.session_name.unwrap_or_else(|| {
        format!("mcp-session-{}", &uuid::Uuid::new_v4().to_string()[..8])
    });
    let fq_name = enterprise_fq_name(&request.system_name, &session_name);
    if context.session_registry.get(&fq_name).await.is_ok() {
        return error_response(format!("Session '{fq_name}' already exists"));
    }

    let factory_manager = match context.session_registry.factory(&request.system_name).await {
        Ok(manager) => manager,
        Err(e) => return error_response(e.to_string()),
    };
    let factory = match factory_manager.get().await {
        Ok(factory) => factory,
        Err(e) => return error_response(e.to_string()),
    };

    let params = NewSessionParams {
        heap_size_gb: request.heap_size_gb.or(creation.heap_size_gb),
        programming_language: request.programming_language,
    };
    let session = match factory.create_session(&session_name, &params).await {
        Ok(session) => Arc::new(session) as Arc<dyn BaseSession>,
        Err(e) => {
            tracing::error!(system = %request.system_name, error = %e, "[session_enterprise_create] failed");
            return error_response(e.to_string());
        }
    };

    // First get() hands back the connection we already hold; later ones
    // reconnect through it if it dies.
    let initial = session.clone();
    let creation_fn: SessionCreationFn = Arc::new(move |_source, _name| {
        let session = initial.clone();
        Box::pin(async move { Ok(session) })
    });
    let manager = Arc::new(enterprise_session_manager(
        &request.system_name,
        &session_name,
        creation_fn,
    ));

    if let Err(e) = context
        .session_registry
        .add_session(SessionHandle::Configured(manager))
        .await
    {
        if let Err(delete_err) = factory.delete_session(&session_name).await {
            tracing::warn!(session = %fq_name, error = %delete_err, "rollback delete failed");
        }
        return error_response(e.to_string());
    }

    tracing::info!(session = %fq_name, "[session_enterprise_create] session created");
    json!({"success": true, "session_id": fq_name})
}

#[derive(Debug, Deserialize)]
struct PqListRequest {
    system_name: String,
}

/// Persistent queries hosted by one enterprise system.
pub async fn pq_list(context: &ToolContext, args: &Value) -> Value {
    let request: PqListRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(system = %request.system_name, "[pq_list] invoked");

    let factory_manager = match context.session_registry.factory(&request.system_name).await {
        Ok(manager) => manager,
        Err(e) => return error_response(e.to_string()),
    };
    let factory = match factory_manager.get().await {
        Ok(factory) => factory,
        Err(e) => return error_response(e.to_string()),
    };
    match factory.persistent_queries().await {
        Ok(queries) => json!({"success": true, "queries": queries}),
        Err(e) => {
            tracing::error!(system = %request.system_name, error = %e, "[pq_list] failed");
            error_response(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct PqStatusRequest {
    system_name: String,
    query_name: String,
}

/// Status of one persistent query.
pub async fn pq_status(context: &ToolContext, args: &Value) -> Value {
    let request: PqStatusRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        system = %request.system_name,
        query = %request.query_name,
        "[pq_status] invoked"
    );

    let factory_manager = match context.session_registry.factory(&request.system_name).await {
        Ok(manager) => manager,
        Err(e) => return error_response(e.to_string()),
    };
    let factory = match factory_manager.get().await {
        Ok(factory) => factory,
        Err(e) => return error_response(e.to_string()),
    };
    match factory.persistent_query_status(&request.query_name).await {
        Ok(query) => json!({"success": true, "query": query}),
        Err(e) => {
            tracing::error!(query = %request.query_name, error = %e, "[pq_status] failed");
            error_response(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnterpriseDeleteRequest {
    system_name: String,
    session_name: String,
}

/// Close an enterprise session, remove it from the registry, and tear it
/// down on the enterprise side. Unknown names are a no-op.
pub async fn session_enterprise_delete(context: &ToolContext, args: &Value) -> Value {
    let request: EnterpriseDeleteRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let fq_name = enterprise_fq_name(&request.system_name, &request.session_name);
    tracing::info!(session = %fq_name, "[session_enterprise_delete] invoked");

    match context.session_registry.remove_session(&fq_name).await {
        Ok(Some(handle)) => {
            if let Err(e) = handle.close().await {
                tracing::warn!(session = %fq_name, error = %e, "error closing removed session");
            }
        }
        Ok(None) => {
            tracing::info!(session = %fq_name, "[session_enterprise_delete] unknown session; no-op");
        }
        Err(e) => return error_response(e.to_string()),
    }

    // Server-side teardown is best-effort; the registry entry is already
    // gone either way.
    if let Ok(factory_manager) = context.session_registry.factory(&request.system_name).await {
        if let Ok(factory) = factory_manager.get().await {
            if let Err(e) = factory.delete_session(&request.session_name).await {
                tracing::warn!(session = %fq_name, error = %e, "enterprise-side delete failed");
            }
        }
    }

    json!({"success": true})
}
