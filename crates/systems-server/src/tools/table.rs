//! Table access tools: enumeration, schemas, and size-gated row data.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::tools::shared::{
    check_response_size, error_response, format_meta_table_result, get_session, parse_args,
    ESTIMATED_BYTES_PER_CELL,
};

#[derive(Debug, Deserialize)]
struct TablesListRequest {
    session_id: String,
}

/// Table names bound in a session.
pub async fn session_tables_list(context: &ToolContext, args: &Value) -> Value {
    let request: TablesListRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(session = %request.session_id, "[session_tables_list] invoked");

    let session = match get_session(context, &request.session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(e.to_string()),
    };
    match session.tables().await {
        Ok(mut tables) => {
            tables.sort();
            json!({"success": true, "tables": tables})
        }
        Err(e) => {
            tracing::error!(session = %request.session_id, error = %e, "[session_tables_list] failed");
            error_response(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct TablesSchemaRequest {
    session_id: String,
    #[serde(default)]
    table_names: Option<Vec<String>>,
}

/// Meta tables for the named tables (all tables when unspecified). A
/// failing table yields a per-table error entry without failing the call.
pub async fn session_tables_schema(context: &ToolContext, args: &Value) -> Value {
    let request: TablesSchemaRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        session = %request.session_id,
        tables = ?request.table_names,
        "[session_tables_schema] invoked"
    );

    let session = match get_session(context, &request.session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(e.to_string()),
    };

    let table_names = match request.table_names {
        Some(names) => names,
        None => match session.tables().await {
            Ok(names) => names,
            Err(e) => return error_response(e.to_string()),
        },
    };

    let mut schemas = Vec::with_capacity(table_names.len());
    for table_name in table_names {
        match session.meta_table(&table_name).await {
            Ok(meta) => schemas.push(format_meta_table_result(&meta, &table_name, None)),
            Err(e) => {
                tracing::warn!(table = %table_name, error = %e, "[session_tables_schema] table failed");
                schemas.push(json!({
                    "success": false,
                    "table": table_name,
                    "error": e.to_string(),
                    "isError": true,
                }));
            }
        }
    }
    json!({"success": true, "schemas": schemas})
}

fn default_max_rows() -> Option<u64> {
    Some(1000)
}

fn default_head() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TableDataRequest {
    session_id: String,
    table_name: String,
    #[serde(default = "default_max_rows")]
    max_rows: Option<u64>,
    #[serde(default = "default_head")]
    head: bool,
}

/// Row data from one table, refused outright when the estimated response
/// would exceed the 50MB ceiling.
pub async fn session_table_data(context: &ToolContext, args: &Value) -> Value {
    let request: TableDataRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        session = %request.session_id,
        table = %request.table_name,
        max_rows = ?request.max_rows,
        head = request.head,
        "[session_table_data] invoked"
    );

    let session = match get_session(context, &request.session_id).await {
        Ok(session) => session,
        Err(e) => return error_response(e.to_string()),
    };

    // Estimate from shape alone before any row moves over the wire.
    let info = match session.table_info(&request.table_name).await {
        Ok(info) => info,
        Err(e) => return error_response(e.to_string()),
    };
    let rows_requested = request
        .max_rows
        .unwrap_or(info.row_count)
        .min(info.row_count);
    let estimated_size =
        rows_requested * info.column_count() as u64 * ESTIMATED_BYTES_PER_CELL;
    if let Some(refusal) = check_response_size(&request.table_name, estimated_size) {
        return refusal;
    }

    let snapshot = match session
        .table_data(&request.table_name, request.max_rows, request.head)
        .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(e.to_string()),
    };
    let is_complete = snapshot.row_count() as u64 >= info.row_count;

    json!({
        "success": true,
        "table": request.table_name,
        "format": "json-row",
        "columns": snapshot.columns,
        "data": snapshot.rows,
        "row_count": snapshot.row_count(),
        "is_complete": is_complete,
    })
}
