//! Catalog tools (enterprise-only reads over the table catalog).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use dh_client::BaseSession;

use crate::context::ToolContext;
use crate::tools::shared::{
    error_response, format_meta_table_result, get_session, parse_args,
};

/// Fetch a session and require it to carry the enterprise surface.
async fn enterprise_session(
    context: &ToolContext,
    function_name: &str,
    session_id: &str,
) -> std::result::Result<Arc<dyn BaseSession>, Value> {
    let session = get_session(context, session_id)
        .await
        .map_err(|e| error_response(format!("Failed to get session '{session_id}': {e}")))?;
    if session.as_enterprise().is_none() {
        return Err(error_response(format!(
            "{function_name} only works with enterprise (Core+) sessions, but \
             session '{session_id}' is a community session"
        )));
    }
    Ok(session)
}

#[derive(Debug, Deserialize)]
struct CatalogListRequest {
    session_id: String,
    #[serde(default)]
    namespace: Option<String>,
}

/// Catalog namespaces, or the tables of one namespace when given.
pub async fn catalog_tables_list(context: &ToolContext, args: &Value) -> Value {
    let request: CatalogListRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        session = %request.session_id,
        namespace = ?request.namespace,
        "[catalog_tables_list] invoked"
    );

    let session =
        match enterprise_session(context, "catalog_tables_list", &request.session_id).await {
            Ok(session) => session,
            Err(response) => return response,
        };
    let enterprise = session.as_enterprise().unwrap();

    match request.namespace {
        Some(namespace) => match enterprise.catalog_tables(&namespace).await {
            Ok(mut tables) => {
                tables.sort();
                json!({"success": true, "namespace": namespace, "tables": tables})
            }
            Err(e) => error_response(e.to_string()),
        },
        None => match enterprise.catalog_namespaces().await {
            Ok(mut namespaces) => {
                namespaces.sort();
                json!({"success": true, "namespaces": namespaces})
            }
            Err(e) => error_response(e.to_string()),
        },
    }
}

#[derive(Debug, Deserialize)]
struct CatalogSchemaRequest {
    session_id: String,
    namespace: String,
    #[serde(default)]
    table_names: Option<Vec<String>>,
}

/// Meta tables for catalog tables in one namespace, per-table errors
/// included without failing the call.
pub async fn catalog_tables_schema(context: &ToolContext, args: &Value) -> Value {
    let request: CatalogSchemaRequest = match parse_args(args) {
        Ok(request) => request,
        Err(response) => return response,
    };
    tracing::info!(
        session = %request.session_id,
        namespace = %request.namespace,
        "[catalog_tables_schema] invoked"
    );

    let session =
        match enterprise_session(context, "catalog_tables_schema", &request.session_id).await {
            Ok(session) => session,
            Err(response) => return response,
        };
    let enterprise = session.as_enterprise().unwrap();

    let table_names = match request.table_names {
        Some(names) => names,
        None => match enterprise.catalog_tables(&request.namespace).await {
            Ok(names) => names,
            Err(e) => return error_response(e.to_string()),
        },
    };

    let mut schemas = Vec::with_capacity(table_names.len());
    for table_name in table_names {
        match enterprise
            .catalog_table_meta(&request.namespace, &table_name)
            .await
        {
            Ok(meta) => schemas.push(format_meta_table_result(
                &meta,
                &table_name,
                Some(&request.namespace),
            )),
            Err(e) => schemas.push(json!({
                "success": false,
                "table": table_name,
                "error": e.to_string(),
                "isError": true,
            })),
        }
    }
    json!({"success": true, "schemas": schemas})
}
