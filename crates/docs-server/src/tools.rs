//! The `docs_chat` tool.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::inkeep::{ChatMessage, InkeepClient};

const BASE_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
     about Deephaven Data Labs documentation. Answer with reference to the docs when \
     possible.";

const SUPPORTED_LANGUAGES: &[&str] = &["python", "groovy"];

pub fn error_response(message: impl Into<String>) -> Value {
    json!({"success": false, "error": message.into(), "isError": true})
}

#[derive(Debug, Deserialize)]
struct DocsChatRequest {
    prompt: String,
    #[serde(default)]
    history: Option<Vec<ChatMessage>>,
    #[serde(default)]
    programming_language: Option<String>,
    #[serde(default)]
    deephaven_core_version: Option<String>,
    #[serde(default)]
    deephaven_enterprise_version: Option<String>,
}

/// Build the per-request system prompts from the user's version context.
fn build_system_prompts(request: &DocsChatRequest) -> Vec<String> {
    let mut prompts = vec![BASE_SYSTEM_PROMPT.to_string()];
    if let Some(language) = &request.programming_language {
        prompts.push(format!(
            "The user is writing {language} code; answer with {language} examples."
        ));
    }
    if let Some(version) = &request.deephaven_core_version {
        prompts.push(format!(
            "The user runs Deephaven Community (Core) version {version}."
        ));
    }
    if let Some(version) = &request.deephaven_enterprise_version {
        prompts.push(format!(
            "The user runs Deephaven Enterprise (Core+) version {version}."
        ));
    }
    prompts
}

/// Documentation Q&A: validates the request, builds version-aware system
/// prompts, and delegates to the Inkeep client. Never raises.
pub async fn docs_chat(client: &Arc<InkeepClient>, args: &Value) -> Value {
    let request: DocsChatRequest = match serde_json::from_value(args.clone()) {
        Ok(request) => request,
        Err(e) => return error_response(format!("Invalid arguments: {e}")),
    };
    tracing::info!(
        prompt_chars = request.prompt.len(),
        language = ?request.programming_language,
        "[docs_chat] invoked"
    );

    if let Some(language) = &request.programming_language {
        if !SUPPORTED_LANGUAGES.contains(&language.to_ascii_lowercase().as_str()) {
            return error_response(format!(
                "Unsupported programming_language '{language}' (expected one of: {})",
                SUPPORTED_LANGUAGES.join(", ")
            ));
        }
    }

    let system_prompts = build_system_prompts(&request);
    match client
        .chat(
            &request.prompt,
            request.history.as_deref(),
            Some(&system_prompts),
        )
        .await
    {
        Ok(response) => json!({"success": true, "response": response}),
        Err(e) => {
            tracing::error!(error = %e, "[docs_chat] failed");
            error_response(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> Arc<InkeepClient> {
        Arc::new(InkeepClient::new("key", "http://127.0.0.1:1", "model").unwrap())
    }

    #[tokio::test]
    async fn rejects_unsupported_language_before_any_request() {
        let result = docs_chat(
            &offline_client(),
            &json!({"prompt": "hi", "programming_language": "scala"}),
        )
        .await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("scala"));
    }

    #[tokio::test]
    async fn missing_prompt_is_an_argument_error() {
        let result = docs_chat(&offline_client(), &json!({})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn transport_failures_become_structured_errors() {
        let result = docs_chat(&offline_client(), &json!({"prompt": "hi"})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["isError"], true);
    }

    #[test]
    fn system_prompts_carry_version_context() {
        let request = DocsChatRequest {
            prompt: "q".into(),
            history: None,
            programming_language: Some("groovy".into()),
            deephaven_core_version: Some("0.36.1".into()),
            deephaven_enterprise_version: None,
        };
        let prompts = build_system_prompts(&request);
        assert_eq!(prompts.len(), 3);
        assert!(prompts[0].contains("Deephaven Data Labs"));
        assert!(prompts[1].contains("groovy"));
        assert!(prompts[2].contains("0.36.1"));
    }
}
