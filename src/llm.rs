use std::collections::VecDeque;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{ANTHROPIC_API_URL, Config, OPENAI_API_URL};
use crate::error::{AppError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_CHAT_MODEL: &str = "claude-sonnet-4-6";
const OPENAI_CHAT_MODEL: &str = "gpt-4o";
const MAX_TOKENS: u32 = 4096;
const CHAT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Which chat backend answers. A closed set selected once at startup by the
/// LLM_PROVIDER config string; the rest of the system only sees
/// `complete`/`stream`.
pub enum LlmClient {
    Anthropic { client: reqwest::Client, api_key: String, model: String },
    OpenAi { client: reqwest::Client, api_key: String, model: String },
}

impl LlmClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CHAT_TIMEOUT_SECS))
            .build()?;

        match cfg.llm_provider.to_lowercase().as_str() {
            "anthropic" => {
                if cfg.anthropic_api_key.is_empty() {
                    return Err(AppError::Config("ANTHROPIC_API_KEY must be set".to_string()));
                }
                Ok(LlmClient::Anthropic {
                    client,
                    api_key: cfg.anthropic_api_key.clone(),
                    model: ANTHROPIC_CHAT_MODEL.to_string(),
                })
            }
            "openai" => {
                if cfg.openai_api_key.is_empty() {
                    return Err(AppError::Config("OPENAI_API_KEY must be set".to_string()));
                }
                Ok(LlmClient::OpenAi {
                    client,
                    api_key: cfg.openai_api_key.clone(),
                    model: OPENAI_CHAT_MODEL.to_string(),
                })
            }
            other => Err(AppError::Config(format!(
                "unknown LLM_PROVIDER {other:?}, use \"anthropic\" or \"openai\""
            ))),
        }
    }

    /// Full, non-streaming completion.
    pub async fn complete(&self, system: Option<&str>, messages: &[ChatMessage]) -> Result<String> {
        match self {
            LlmClient::Anthropic { client, api_key, model } => {
                let mut body = json!({
                    "model": model,
                    "max_tokens": MAX_TOKENS,
                    "messages": messages,
                });
                if let Some(system) = system {
                    body["system"] = json!(system);
                }
                let resp = client
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
                    .send()
                    .await?;
                let payload = checked_json(resp).await?;
                let text = payload
                    .get("content")
                    .and_then(|c| c.as_array())
                    .map(|blocks| {
                        blocks
                            .iter()
                            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .unwrap_or_default();
                Ok(text)
            }
            LlmClient::OpenAi { client, api_key, model } => {
                let resp = client
                    .post(format!("{OPENAI_API_URL}/chat/completions"))
                    .bearer_auth(api_key)
                    .json(&json!({"model": model, "messages": openai_messages(system, messages)}))
                    .send()
                    .await?;
                let payload = checked_json(resp).await?;
                let text = payload
                    .get("choices")
                    .and_then(|c| c.as_array())
                    .and_then(|c| c.first())
                    .and_then(|c| c.get("message"))
                    .and_then(|m| m.get("content"))
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(text)
            }
        }
    }

    /// Lazy stream of text fragments as the backend produces them.
    pub async fn stream(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
    ) -> Result<BoxStream<'static, Result<String>>> {
        match self {
            LlmClient::Anthropic { client, api_key, model } => {
                let mut body = json!({
                    "model": model,
                    "max_tokens": MAX_TOKENS,
                    "messages": messages,
                    "stream": true,
                });
                if let Some(system) = system {
                    body["system"] = json!(system);
                }
                let resp = client
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(AppError::Llm(format!("stream request returned {}", resp.status())));
                }
                Ok(sse_fragments(resp, Wire::Anthropic))
            }
            LlmClient::OpenAi { client, api_key, model } => {
                let resp = client
                    .post(format!("{OPENAI_API_URL}/chat/completions"))
                    .bearer_auth(api_key)
                    .json(&json!({
                        "model": model,
                        "messages": openai_messages(system, messages),
                        "stream": true,
                    }))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(AppError::Llm(format!("stream request returned {}", resp.status())));
                }
                Ok(sse_fragments(resp, Wire::OpenAi))
            }
        }
    }
}

fn openai_messages(system: Option<&str>, messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut all = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        all.push(ChatMessage { role: "system".to_string(), content: system.to_string() });
    }
    all.extend_from_slice(messages);
    all
}

async fn checked_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(|m| m.to_string())
            })
            .unwrap_or(body);
        return Err(AppError::Llm(format!("API error ({status}): {detail}")));
    }
    Ok(serde_json::from_str(&body)?)
}

// ---------------------------------------------------------------------------
// SSE plumbing
// ---------------------------------------------------------------------------

/// Per-provider wire format of one server-sent event.
#[derive(Debug, Clone, Copy)]
enum Wire {
    Anthropic,
    OpenAi,
}

impl Wire {
    /// Text fragment carried by one `data:` payload, if any.
    fn extract(&self, data: &str) -> Option<String> {
        let value: Value = serde_json::from_str(data).ok()?;
        match self {
            Wire::Anthropic => {
                if value.get("type").and_then(|t| t.as_str()) != Some("content_block_delta") {
                    return None;
                }
                value
                    .get("delta")
                    .and_then(|d| d.get("text"))
                    .and_then(|t| t.as_str())
                    .map(|t| t.to_string())
            }
            Wire::OpenAi => value
                .get("choices")
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(|t| t.as_str())
                .map(|t| t.to_string()),
        }
    }

    fn is_done(&self, data: &str) -> bool {
        match self {
            Wire::OpenAi => data.trim() == "[DONE]",
            Wire::Anthropic => serde_json::from_str::<Value>(data)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "message_stop"))
                .unwrap_or(false),
        }
    }
}

/// Parse one event block's `data:` lines into text fragments, plus whether
/// the stream signalled completion.
fn parse_event_block(wire: Wire, block: &str) -> (Vec<String>, bool) {
    let mut fragments = Vec::new();
    let mut done = false;
    for line in block.lines() {
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            continue;
        };
        if wire.is_done(data) {
            done = true;
        } else if let Some(text) = wire.extract(data) {
            fragments.push(text);
        }
    }
    (fragments, done)
}

fn sse_fragments(resp: reqwest::Response, wire: Wire) -> BoxStream<'static, Result<String>> {
    struct State<S> {
        bytes: S,
        buf: String,
        ready: VecDeque<String>,
        wire: Wire,
        done: bool,
    }

    let state = State {
        bytes: resp.bytes_stream().boxed(),
        buf: String::new(),
        ready: VecDeque::new(),
        wire,
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.ready.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                None => return None,
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e.into()), st));
                }
                Some(Ok(bytes)) => {
                    st.buf.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = st.buf.find("\n\n") {
                        let block: String = st.buf.drain(..pos + 2).collect();
                        let (fragments, done) = parse_event_block(st.wire, &block);
                        st.ready.extend(fragments);
                        st.done |= done;
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_delta_events_carry_text() {
        let block = concat!(
            "event: content_block_delta\n",
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            "\n",
        );
        let (fragments, done) = parse_event_block(Wire::Anthropic, block);
        assert_eq!(fragments, vec!["Hello".to_string()]);
        assert!(!done);

        let stop = r#"data: {"type":"message_stop"}"#;
        let (fragments, done) = parse_event_block(Wire::Anthropic, stop);
        assert!(fragments.is_empty());
        assert!(done);
    }

    #[test]
    fn openai_delta_events_carry_text_until_done() {
        let block = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        let (fragments, done) = parse_event_block(Wire::OpenAi, block);
        assert_eq!(fragments, vec!["Hi".to_string()]);
        assert!(!done);

        let (fragments, done) = parse_event_block(Wire::OpenAi, "data: [DONE]");
        assert!(fragments.is_empty());
        assert!(done);
    }

    #[test]
    fn non_delta_events_yield_nothing() {
        let block = r#"data: {"type":"message_start","message":{}}"#;
        let (fragments, done) = parse_event_block(Wire::Anthropic, block);
        assert!(fragments.is_empty());
        assert!(!done);
    }

    #[test]
    fn unknown_provider_is_a_startup_error() {
        let mut cfg = Config::from_env().unwrap();
        cfg.llm_provider = "mistral".to_string();
        assert!(matches!(LlmClient::from_config(&cfg), Err(AppError::Config(_))));
    }
}
