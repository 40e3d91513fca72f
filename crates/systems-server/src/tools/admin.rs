//! Configuration-level tools: refresh, default worker, worker names.

use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::tools::shared::error_response;

/// Reload the configuration and rebuild every session.
///
/// The new document is loaded and validated before anything is torn down;
/// a broken file leaves the previous registry serving. Reload is not a
/// partial commit — the next refresh simply tries again on the fresh file.
pub async fn refresh(context: &ToolContext) -> Value {
    tracing::info!("[refresh] reloading configuration and session registry");
    let _guard = context.refresh_lock.lock().await;

    let result: dh_domain::Result<()> = async {
        context.config_manager.clear_config_cache().await;
        context.config_manager.get_config().await?;
        context.session_registry.close().await?;
        context
            .session_registry
            .initialize(&context.config_manager)
            .await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            tracing::info!("[refresh] configuration and sessions reloaded");
            json!({"success": true})
        }
        Err(e) => {
            tracing::error!(error = %e, "[refresh] failed");
            error_response(e.to_string())
        }
    }
}

/// The configured default worker name.
pub async fn default_worker(context: &ToolContext) -> Value {
    tracing::info!("[default_worker] invoked");
    match context.config_manager.get_worker_name_default().await {
        Ok(Some(worker)) => json!({"success": true, "result": worker}),
        Ok(None) => error_response("No default worker set in configuration"),
        Err(e) => {
            tracing::error!(error = %e, "[default_worker] failed");
            error_response(e.to_string())
        }
    }
}

/// All configured community worker names.
pub async fn worker_names(context: &ToolContext) -> Value {
    tracing::info!("[worker_names] invoked");
    match context.config_manager.get_community_session_names().await {
        Ok(mut names) => {
            names.sort();
            json!({"success": true, "result": names})
        }
        Err(e) => {
            tracing::error!(error = %e, "[worker_names] failed");
            error_response(e.to_string())
        }
    }
}
