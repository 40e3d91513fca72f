use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use dh_docs_server::{tools, InkeepClient};

const SERVER_NAME: &str = "deephaven-mcp-docs";
const INKEEP_API_KEY_ENV_VAR: &str = "INKEEP_API_KEY";
const INKEEP_BASE_URL: &str = "https://api.inkeep.com/v1";
const INKEEP_MODEL: &str = "inkeep-context-expert";

#[derive(Debug, Parser)]
#[command(name = "dh-mcp-docs-server", about = "Deephaven MCP docs server", version)]
struct Cli {}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let _cli = Cli::parse();

    let api_key = std::env::var(INKEEP_API_KEY_ENV_VAR).map_err(|_| {
        anyhow::anyhow!(
            "environment variable {INKEEP_API_KEY_ENV_VAR} must be set to use the \
             documentation tools"
        )
    })?;
    let client = Arc::new(InkeepClient::new(api_key, INKEEP_BASE_URL, INKEEP_MODEL)?);

    tracing::info!(server = SERVER_NAME, "serving on stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        };
        let Some(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed request line");
                continue;
            }
        };
        let Some(id) = request.id else { continue };

        let result = handle_request(&client, &request.method, request.params.as_ref()).await;
        let response = match result {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(message) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": message},
            }),
        };
        let mut payload = response.to_string();
        payload.push('\n');
        stdout.write_all(payload.as_bytes()).await?;
        stdout.flush().await?;
    }

    client.close().await;
    tracing::info!("deephaven-mcp docs server stopped");
    Ok(())
}

async fn handle_request(
    client: &Arc<InkeepClient>,
    method: &str,
    params: Option<&Value>,
) -> Result<Value, String> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({"tools": [{
            "name": "docs_chat",
            "description": "Ask the Deephaven documentation assistant a question",
            "inputSchema": {"type": "object"},
        }]})),
        "tools/call" => {
            let params = params.cloned().unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let result = match name {
                "docs_chat" => tools::docs_chat(client, &arguments).await,
                other => tools::error_response(format!("Unknown tool: {other}")),
            };
            let is_error = !result
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(json!({
                "content": [{"type": "text", "text": result.to_string()}],
                "isError": is_error,
            }))
        }
        other => Err(format!("Unknown method: {other}")),
    }
}
