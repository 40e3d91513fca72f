//! Tool handlers and their dispatch table.
//!
//! Every handler has the shape `(context, args) -> result object` and
//! never propagates an error: whatever goes wrong becomes
//! `{success: false, error, isError: true}`.

use serde_json::{json, Value};

use crate::context::ToolContext;

mod admin;
mod catalog;
mod community;
mod enterprise;
mod script;
mod session;
pub mod shared;
mod table;

pub use shared::error_response;

/// Name and description of every registered tool, surfaced by
/// `tools/list`.
pub const TOOLS: &[(&str, &str)] = &[
    ("refresh", "Reload the configuration and rebuild all sessions"),
    ("mcp_reload", "Alias of refresh"),
    ("default_worker", "Get the configured default worker name"),
    ("worker_names", "List all configured community worker names"),
    ("sessions_list", "List all sessions with basic metadata"),
    ("session_details", "Get detailed information about one session"),
    ("session_tables_list", "List the tables bound in a session"),
    ("session_tables_schema", "Get meta tables (schemas) for session tables"),
    ("session_table_data", "Get row data from a session table (size-gated)"),
    ("session_script_run", "Execute a script in a session"),
    ("session_pip_list", "List installed pip packages in a Python session"),
    ("session_community_create", "Launch and register a dynamic community session"),
    ("session_community_delete", "Stop and remove a dynamic community session"),
    ("session_community_credentials", "Retrieve credentials of a dynamic session (gated)"),
    ("enterprise_systems_status", "Health of all configured enterprise systems"),
    ("session_enterprise_create", "Create a session on an enterprise system"),
    ("session_enterprise_delete", "Delete an enterprise session"),
    ("catalog_tables_list", "List catalog namespaces or tables (enterprise)"),
    ("catalog_tables_schema", "Get catalog table schemas (enterprise)"),
    ("pq_list", "List persistent queries of an enterprise system"),
    ("pq_status", "Status of one persistent query"),
];

/// Dispatch one tool call by name. Unknown names return the error shape,
/// like everything else.
pub async fn dispatch(context: &ToolContext, tool: &str, args: &Value) -> Value {
    match tool {
        "refresh" | "mcp_reload" => admin::refresh(context).await,
        "default_worker" => admin::default_worker(context).await,
        "worker_names" => admin::worker_names(context).await,
        "sessions_list" => session::sessions_list(context).await,
        "session_details" => session::session_details(context, args).await,
        "session_tables_list" => table::session_tables_list(context, args).await,
        "session_tables_schema" => table::session_tables_schema(context, args).await,
        "session_table_data" => table::session_table_data(context, args).await,
        "session_script_run" => script::session_script_run(context, args).await,
        "session_pip_list" => script::session_pip_list(context, args).await,
        "session_community_create" => community::session_community_create(context, args).await,
        "session_community_delete" => community::session_community_delete(context, args).await,
        "session_community_credentials" => {
            community::session_community_credentials(context, args).await
        }
        "enterprise_systems_status" => {
            enterprise::enterprise_systems_status(context, args).await
        }
        "session_enterprise_create" => {
            enterprise::session_enterprise_create(context, args).await
        }
        "session_enterprise_delete" => {
            enterprise::session_enterprise_delete(context, args).await
        }
        "catalog_tables_list" => catalog::catalog_tables_list(context, args).await,
        "catalog_tables_schema" => catalog::catalog_tables_schema(context, args).await,
        "pq_list" => enterprise::pq_list(context, args).await,
        "pq_status" => enterprise::pq_status(context, args).await,
        other => error_response(format!("Unknown tool: {other}")),
    }
}

/// Tool descriptors for `tools/list`.
pub fn tool_descriptors() -> Vec<Value> {
    TOOLS
        .iter()
        .map(|(name, description)| {
            json!({
                "name": name,
                "description": description,
                "inputSchema": {"type": "object"},
            })
        })
        .collect()
}
