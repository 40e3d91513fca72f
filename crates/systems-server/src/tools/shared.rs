//! Helpers shared across the tool handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use dh_client::{BaseSession, TableSnapshot};
use dh_domain::Result;
use dh_resource_manager::InitializationPhase;

use crate::context::ToolContext;

/// Hard ceiling on an estimated table response.
pub const MAX_RESPONSE_SIZE: u64 = 50_000_000;
/// Above this, a warning is logged but the request still succeeds.
pub const WARNING_SIZE: u64 = 5_000_000;
/// Rough per-cell cost used for the estimate.
pub const ESTIMATED_BYTES_PER_CELL: u64 = 100;

/// The uniform error shape every handler falls back to.
pub fn error_response(message: impl Into<String>) -> Value {
    json!({"success": false, "error": message.into(), "isError": true})
}

/// Deserialize handler arguments, converting failures into the error shape
/// so they never escape the handler boundary.
pub fn parse_args<T: DeserializeOwned>(args: &Value) -> std::result::Result<T, Value> {
    serde_json::from_value(args.clone())
        .map_err(|e| error_response(format!("Invalid arguments: {e}")))
}

/// Resolve a session id through the registry and open (or reuse) its
/// session.
pub async fn get_session(
    context: &ToolContext,
    session_id: &str,
) -> Result<Arc<dyn BaseSession>> {
    let handle = context.session_registry.get(session_id).await?;
    handle.get().await
}

/// Gate on the estimated response size: warn above 5MB, refuse above 50MB
/// with the user-facing message.
pub fn check_response_size(table_name: &str, estimated_size: u64) -> Option<Value> {
    if estimated_size > WARNING_SIZE {
        tracing::warn!(
            table = %table_name,
            estimated_mb = estimated_size as f64 / 1_000_000.0,
            "large response; consider reducing max_rows"
        );
    }
    if estimated_size > MAX_RESPONSE_SIZE {
        return Some(error_response(format!(
            "Response would be ~{:.1}MB (max 50MB). Please reduce max_rows.",
            estimated_size as f64 / 1_000_000.0
        )));
    }
    None
}

/// Shape a meta table for schema responses. `namespace` is set for catalog
/// tables only.
pub fn format_meta_table_result(
    meta: &TableSnapshot,
    table_name: &str,
    namespace: Option<&str>,
) -> Value {
    let mut result = json!({
        "success": true,
        "table": table_name,
        "format": "json-row",
        "data": meta.rows,
        "meta_columns": meta.columns,
        "row_count": meta.row_count(),
    });
    if let Some(namespace) = namespace {
        result["namespace"] = json!(namespace);
    }
    result
}

/// Response-ready view of the combined registry's discovery progress, or
/// `None` when there is nothing worth reporting (SIMPLE or clean
/// COMPLETED).
pub fn format_initialization_status(
    phase: InitializationPhase,
    errors: &HashMap<String, String>,
) -> Option<Value> {
    let mut info = Map::new();
    if !matches!(
        phase,
        InitializationPhase::Simple | InitializationPhase::Completed
    ) {
        info.insert(
            "status".into(),
            json!(
                "Enterprise session discovery is still in progress. \
                 Some sessions or systems may not yet be visible."
            ),
        );
    } else if !errors.is_empty() {
        info.insert(
            "status".into(),
            json!("Some enterprise systems had connection issues during discovery."),
        );
    }
    if !errors.is_empty() {
        info.insert("errors".into(), json!(errors));
    }
    if info.is_empty() {
        None
    } else {
        Some(Value::Object(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_gate_boundaries() {
        // At or below the warning threshold: accepted quietly.
        assert!(check_response_size("t", WARNING_SIZE).is_none());
        // Between warning and max: accepted (warning only).
        assert!(check_response_size("t", MAX_RESPONSE_SIZE).is_none());
        // Above the ceiling: refused with the exact message shape.
        let refusal = check_response_size("t", 100_000_000).unwrap();
        assert_eq!(refusal["success"], false);
        assert_eq!(refusal["isError"], true);
        assert_eq!(
            refusal["error"],
            "Response would be ~100.0MB (max 50MB). Please reduce max_rows."
        );
    }

    #[test]
    fn initialization_status_shapes() {
        assert!(format_initialization_status(InitializationPhase::Simple, &HashMap::new())
            .is_none());
        assert!(
            format_initialization_status(InitializationPhase::Completed, &HashMap::new())
                .is_none()
        );

        let loading =
            format_initialization_status(InitializationPhase::Loading, &HashMap::new()).unwrap();
        assert!(loading["status"].as_str().unwrap().contains("in progress"));

        let errors = HashMap::from([("prod".to_string(), "timeout".to_string())]);
        let partial =
            format_initialization_status(InitializationPhase::Partial, &errors).unwrap();
        assert_eq!(partial["errors"]["prod"], "timeout");
    }
}
