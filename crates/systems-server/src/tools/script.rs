//! Script execution and package inspection tools.

use serde::Deserialize;
use serde_json::{json, Value};

use dh_client::queries;

use crate::context::ToolContext;
use crate::tools::shared::{error_response, get_session, parse_args};

#[derive(Debug, Deserialize)]
struct ScriptRunRequest {
    session_id: String,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    script_path: Option<String>,
}

/// Execute a script in a session, given inline or as a file path (exactly
/// one of the two).
pub async fn session_script_run(context: &ToolContext, args: &Value) -> Value {
    let request: ScriptRunRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        session = %request.session_id,
        script = if request.script.is_some() { "<provided>" } else { "<none>" },
        script_path = ?request.script_path,
        "[session_script_run] invoked"
    );

    // Parameter validation happens before any registry access.
    let script = match (request.script, request.script_path) {
        (None, None) => {
            tracing::warn!("[session_script_run] no script or script_path provided");
            return error_response("Must provide either script or script_path.");
        }
        (Some(_), Some(_)) => {
            return error_response("Provide only one of script or script_path.");
        }
        (Some(script), None) => script,
        (None, Some(path)) => match tokio::fs::read_to_string(&path).await {
            Ok(script) => script,
            Err(e) => {
                return error_response(format!("Failed to read script file '{path}': {e}"))
            }
        },
    };

    let session = match get_session(context, &request.session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(e.to_string()),
    };

    tracing::info!(
        session = %request.session_id,
        script_chars = script.len(),
        "[session_script_run] executing script"
    );
    match session.run_script(&script).await {
        Ok(()) => {
            tracing::info!(session = %request.session_id, "[session_script_run] script executed");
            json!({"success": true})
        }
        Err(e) => {
            tracing::error!(session = %request.session_id, error = %e, "[session_script_run] failed");
            error_response(format!(
                "Script execution failed for session '{}': {e}",
                request.session_id
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct PipListRequest {
    session_id: String,
}

/// Installed pip packages in a (Python) session, as tabular data.
pub async fn session_pip_list(context: &ToolContext, args: &Value) -> Value {
    let request: PipListRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(session = %request.session_id, "[session_pip_list] invoked");

    let session = match get_session(context, &request.session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(e.to_string()),
    };

    let table = match queries::get_pip_packages_table(session.as_ref()).await {
        Ok(table) => table,
        Err(e) => {
            tracing::error!(session = %request.session_id, error = %e, "[session_pip_list] failed");
            return error_response(format!(
                "Failed to list pip packages for session '{}': {e}",
                request.session_id
            ));
        }
    };

    // The query uses capitalized column names; responses use lowercase.
    let mut packages = Vec::with_capacity(table.row_count());
    for row in &table.rows {
        let (Some(package), Some(version)) = (
            row.get("Package").and_then(Value::as_str),
            row.get("Version").and_then(Value::as_str),
        ) else {
            return error_response(
                "Malformed package data: missing 'Package' or 'Version' key",
            );
        };
        packages.push(json!({"package": package, "version": version}));
    }
    json!({"success": true, "result": packages})
}
