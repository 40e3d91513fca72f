//! Async client for the Inkeep chat-completions API.
//!
//! One class, async only: validated construction, an owned (or injected)
//! HTTP client with connection limits and explicit timeouts, `chat` for a
//! full completion, `stream_chat` for lazily yielded tokens. Every failure
//! surfaces as the single *client* error kind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use dh_domain::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const POOL_MAX_IDLE_PER_HOST: usize = 4;

/// One chat turn: a role ("user", "assistant", "system") and its content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Asynchronous client for an OpenAI-compatible chat endpoint.
#[derive(Debug)]
pub struct InkeepClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
    /// Whether `close` may shut the HTTP client down; injected clients
    /// stay open.
    owns_client: bool,
    closed: AtomicBool,
}

impl InkeepClient {
    /// Build a client owning its HTTP connection pool.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| Error::Client(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(api_key, base_url, model, client, true)
    }

    /// Build a client around an injected `reqwest::Client` (tests). The
    /// injected client is never closed by this instance.
    pub fn with_injected_client(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        client: reqwest::Client,
    ) -> Result<Self> {
        Self::with_client(api_key, base_url, model, client, false)
    }

    fn with_client(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        client: reqwest::Client,
        owns_client: bool,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let base_url = base_url.into();
        let model = model.into();
        if api_key.is_empty() {
            return Err(Error::Client("api_key must be a non-empty string".into()));
        }
        if base_url.is_empty() {
            return Err(Error::Client("base_url must be a non-empty string".into()));
        }
        if model.is_empty() {
            return Err(Error::Client("model must be a non-empty string".into()));
        }
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
            owns_client,
            closed: AtomicBool::new(false),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn validate_history(history: Option<&[ChatMessage]>) -> Result<()> {
        for message in history.unwrap_or_default() {
            if message.role.is_empty() || message.content.is_empty() {
                return Err(Error::Client(
                    "each history message must have a non-empty role and content".into(),
                ));
            }
        }
        Ok(())
    }

    fn validate_system_prompts(system_prompts: Option<&[String]>) -> Result<()> {
        for prompt in system_prompts.unwrap_or_default() {
            if prompt.is_empty() {
                return Err(Error::Client("system prompts must be non-empty".into()));
            }
        }
        Ok(())
    }

    fn build_request_body(
        &self,
        prompt: &str,
        history: Option<&[ChatMessage]>,
        system_prompts: Option<&[String]>,
        stream: bool,
    ) -> Value {
        let messages = build_messages(prompt, history, system_prompts);
        json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        })
    }

    async fn post_chat(&self, body: &Value) -> Result<reqwest::Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Client("client is closed".into()));
        }
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Client(format!("chat completion request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Client(format!(
                "chat completion failed ({status}): {body}"
            )));
        }
        Ok(response)
    }

    /// Send a chat completion and return the assistant's (stripped)
    /// response content.
    pub async fn chat(
        &self,
        prompt: &str,
        history: Option<&[ChatMessage]>,
        system_prompts: Option<&[String]>,
    ) -> Result<String> {
        Self::validate_history(history)?;
        Self::validate_system_prompts(system_prompts)?;

        tracing::info!(
            model = %self.model,
            prompt_chars = prompt.len(),
            history_len = history.map(<[ChatMessage]>::len).unwrap_or(0),
            "sending chat completion request"
        );
        let started = std::time::Instant::now();
        let body = self.build_request_body(prompt, history, system_prompts, false);
        let response = self.post_chat(&body).await?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Client(format!("malformed chat completion response: {e}")))?;
        let content = payload
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Client("unexpected response structure from chat API".into())
            })?;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat completion succeeded"
        );
        Ok(content.trim().to_string())
    }

    /// Send a streaming chat completion, yielding content tokens as they
    /// arrive. An empty stream logs a warning.
    pub async fn stream_chat(
        &self,
        prompt: &str,
        history: Option<&[ChatMessage]>,
        system_prompts: Option<&[String]>,
    ) -> Result<impl Stream<Item = Result<String>> + Send + 'static> {
        Self::validate_history(history)?;
        Self::validate_system_prompts(system_prompts)?;

        tracing::info!(model = %self.model, "sending streaming chat request");
        let body = self.build_request_body(prompt, history, system_prompts, true);
        let response = self.post_chat(&body).await?;

        let stream = async_stream::stream! {
            let mut response = response;
            let mut buffer = String::new();
            let mut yielded = false;

            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in drain_data_lines(&mut buffer) {
                            if data == "[DONE]" {
                                continue;
                            }
                            if let Some(token) = parse_stream_token(&data) {
                                yielded = true;
                                yield Ok(token);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::Client(format!("streaming chat failed: {e}")));
                        break;
                    }
                }
            }
            if !yielded {
                tracing::warn!("no content yielded in chat stream");
            }
        };
        Ok(stream)
    }

    /// Idempotent close; only an owned HTTP client is shut down (by
    /// dropping its pool references when this instance drops).
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.owns_client {
            tracing::debug!("Inkeep client closed");
        } else {
            tracing::debug!("Inkeep client closed (injected HTTP client left open)");
        }
    }
}

/// Assemble the wire message list: system prompts first, then history,
/// then the user prompt.
fn build_messages(
    prompt: &str,
    history: Option<&[ChatMessage]>,
    system_prompts: Option<&[String]>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    for system_prompt in system_prompts.unwrap_or_default() {
        messages.push(ChatMessage {
            role: "system".into(),
            content: system_prompt.clone(),
        });
    }
    messages.extend(history.unwrap_or_default().iter().cloned());
    messages.push(ChatMessage {
        role: "user".into(),
        content: prompt.to_string(),
    });
    messages
}

/// Pull complete `data:` payloads out of an SSE buffer, leaving any
/// trailing partial event for the next chunk.
fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                data_lines.push(data.to_string());
            }
        }
    }
    data_lines
}

fn parse_stream_token(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|content| !content.is_empty())
        .map(str::to_string)
}
