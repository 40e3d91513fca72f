//! Session discovery tools: list all sessions, inspect one in detail.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use dh_client::queries;

use crate::context::ToolContext;
use crate::tools::shared::{error_response, format_initialization_status, parse_args};

/// Lightweight listing of every known session. Never connects to any of
/// them.
pub async fn sessions_list(context: &ToolContext) -> Value {
    tracing::info!("[sessions_list] invoked");
    let snapshot = match context.session_registry.get_all().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(error = %e, "[sessions_list] failed");
            return error_response(e.to_string());
        }
    };

    let mut sessions: Vec<Value> = snapshot
        .items
        .iter()
        .map(|(fq_name, handle)| {
            json!({
                "session_id": fq_name,
                "type": handle.system_type().display_name(),
                "source": handle.source(),
                "session_name": handle.name(),
            })
        })
        .collect();
    sessions.sort_by(|a, b| {
        a["session_id"]
            .as_str()
            .unwrap_or_default()
            .cmp(b["session_id"].as_str().unwrap_or_default())
    });
    tracing::info!(count = sessions.len(), "[sessions_list] found sessions");

    let mut response = json!({"success": true, "sessions": sessions});
    if let Some(init) = format_initialization_status(
        snapshot.initialization_phase,
        &snapshot.initialization_errors,
    ) {
        response["initialization"] = init;
    }
    response
}

#[derive(Debug, Deserialize)]
struct SessionDetailsRequest {
    session_id: String,
    #[serde(default)]
    attempt_to_connect: bool,
}

/// Detailed status for one session: liveness, language, Deephaven
/// versions, and the launch view fields for dynamic sessions.
///
/// Without `attempt_to_connect` a cold session is never opened.
pub async fn session_details(context: &ToolContext, args: &Value) -> Value {
    let request: SessionDetailsRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(session = %request.session_id, "[session_details] invoked");

    let handle = match context.session_registry.get(&request.session_id).await {
        Ok(handle) => handle,
        Err(e) => {
            return error_response(format!(
                "Session with ID '{}' not found: {e}",
                request.session_id
            ))
        }
    };

    let (status, detail) = handle.liveness_status(request.attempt_to_connect).await;
    let available = handle.is_alive().await;

    let mut info = Map::new();
    info.insert("session_id".into(), json!(request.session_id));
    info.insert("type".into(), json!(handle.system_type().display_name()));
    info.insert("source".into(), json!(handle.source()));
    info.insert("session_name".into(), json!(handle.name()));
    info.insert("available".into(), json!(available));
    info.insert("liveness_status".into(), json!(status.as_str()));
    if let Some(detail) = detail {
        info.insert("liveness_detail".into(), json!(detail));
    }

    // Only an available (already open and alive) session is queried for
    // environment details; failures degrade to absent fields.
    if available {
        if let Ok(session) = handle.get().await {
            info.insert(
                "programming_language".into(),
                json!(session.programming_language()),
            );
            match queries::get_programming_language_version(session.as_ref()).await {
                Ok(version) => {
                    info.insert("programming_language_version".into(), json!(version));
                }
                Err(e) => {
                    tracing::warn!(
                        session = %request.session_id,
                        error = %e,
                        "[session_details] could not get language version"
                    );
                }
            }
            match queries::get_dh_versions(session.as_ref()).await {
                Ok((core, coreplus)) => {
                    if let Some(core) = core {
                        info.insert("deephaven_community_version".into(), json!(core));
                    }
                    if let Some(coreplus) = coreplus {
                        info.insert("deephaven_enterprise_version".into(), json!(coreplus));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        session = %request.session_id,
                        error = %e,
                        "[session_details] could not get Deephaven versions"
                    );
                }
            }
        }
    }

    if let Some(Value::Object(dynamic)) = handle.dynamic_info() {
        for (key, value) in dynamic {
            info.insert(key, value);
        }
    }

    json!({"success": true, "session": Value::Object(info)})
}
