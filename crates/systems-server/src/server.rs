//! Newline-delimited JSON-RPC stdio serve loop.
//!
//! Reads one request per line from stdin, dispatches `tools/call` to the
//! registered handlers, and writes one response per line to stdout.
//! Logging goes to stderr; stdout belongs to the wire.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use dh_domain::Result;

use crate::context::ToolContext;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND};
use crate::tools;

pub const SERVER_NAME: &str = "deephaven-mcp-systems";

/// Serve until stdin closes.
pub async fn serve(context: ToolContext) -> Result<()> {
    serve_io(context, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve over arbitrary byte streams (the seam the tests drive).
pub async fn serve_io<R, W>(context: ToolContext, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut stdout = writer;

    tracing::info!(server = SERVER_NAME, "serving on stdio");
    while let Some(line) = lines.next_line().await? {
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

        // Notifications (no id) expect no response.
        let Some(id) = request.id else {
            tracing::debug!(method = %request.method, "notification received");
            continue;
        };

        let response = handle_request(&context, &request.method, request.params.as_ref()).await;
        let response = match response {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        };

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        stdout.write_all(payload.as_bytes()).await?;
        stdout.flush().await?;
    }
    tracing::info!("stdin closed; stopping server");
    Ok(())
}

async fn handle_request(
    context: &ToolContext,
    method: &str,
    params: Option<&Value>,
) -> std::result::Result<Value, (i64, String)> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({"tools": tools::tool_descriptors()})),
        "tools/call" => {
            let params = params.cloned().unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Err((
                    crate::protocol::INVALID_PARAMS,
                    "tools/call requires a 'name' parameter".to_string(),
                ));
            };
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            tracing::debug!(tool = name, "dispatching tool call");
            let result = tools::dispatch(context, name, &arguments).await;
            let is_error = !result
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(json!({
                "content": [{"type": "text", "text": result.to_string()}],
                "isError": is_error,
            }))
        }
        other => Err((METHOD_NOT_FOUND, format!("Unknown method: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use dh_domain::config::ConfigManager;
    use dh_resource_manager::CombinedSessionRegistry;

    use super::*;

    async fn wire_harness() -> (
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
        tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
        tempfile::NamedTempFile,
    ) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"community": {"sessions": {"local": {"host": "localhost"}}}}"#,
        )
        .unwrap();
        file.flush().unwrap();

        let config_manager = Arc::new(ConfigManager::with_config_path(file.path()));
        let registry = Arc::new(CombinedSessionRegistry::new(None));
        registry.initialize(&config_manager).await.unwrap();
        let context = ToolContext::new(config_manager, registry, None);

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        tokio::spawn(async move {
            let _ = serve_io(context, server_read, server_write).await;
        });

        let (client_read, client_write) = tokio::io::split(client);
        let lines = BufReader::new(client_read).lines();
        (client_write, lines, file)
    }

    async fn roundtrip(
        writer: &mut tokio::io::WriteHalf<tokio::io::DuplexStream>,
        lines: &mut tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
        request: &str,
    ) -> Value {
        writer.write_all(request.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        writer.flush().await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn initialize_and_tools_list_round_trip() {
        let (mut writer, mut lines, _file) = wire_harness().await;

        let response = roundtrip(
            &mut writer,
            &mut lines,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["serverInfo"]["name"], SERVER_NAME);

        let response = roundtrip(
            &mut writer,
            &mut lines,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        )
        .await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "session_details"));
    }

    #[tokio::test]
    async fn tools_call_wraps_results_and_flags_errors() {
        let (mut writer, mut lines, _file) = wire_harness().await;

        let response = roundtrip(
            &mut writer,
            &mut lines,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call",
                "params":{"name":"worker_names","arguments":{}}}"#
                .replace('\n', " ")
                .as_str(),
        )
        .await;
        assert_eq!(response["result"]["isError"], false);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let inner: Value = serde_json::from_str(text).unwrap();
        assert_eq!(inner, json!({"success": true, "result": ["local"]}));

        let response = roundtrip(
            &mut writer,
            &mut lines,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"bogus"}}"#,
        )
        .await;
        assert_eq!(response["result"]["isError"], true);
    }

    #[tokio::test]
    async fn notifications_and_garbage_produce_no_response() {
        let (mut writer, mut lines, _file) = wire_harness().await;

        // Notification (no id), then a malformed line, then a real request;
        // only the request gets an answer.
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
            .await
            .unwrap();
        writer.write_all(b"this is not json\n").await.unwrap();
        let response = roundtrip(
            &mut writer,
            &mut lines,
            r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#,
        )
        .await;
        assert_eq!(response["id"], 9);
        assert_eq!(response["result"], json!({}));
    }

    #[tokio::test]
    async fn unknown_method_is_a_jsonrpc_error() {
        let (mut writer, mut lines, _file) = wire_harness().await;
        let response = roundtrip(
            &mut writer,
            &mut lines,
            r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
        assert!(response.get("result").is_none());
    }
}
