//! Streaming chat against the Qwen text-generation endpoint.
//!
//! This vendor streams a single JSON array that grows element by element,
//! not SSE. The only way to consume it incrementally is to buffer the raw
//! bytes, patch the unterminated array closed and re-attempt a full parse
//! after every chunk; a malformed/partial buffer is simply ignored until a
//! later chunk completes it. Each successful parse emits only the texts
//! beyond what was already sent downstream.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use shared::settings::ChatEndpoint;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::chat::{ChatApi, ChatChunk, ChatMessage};

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Serialize)]
struct QwenRequest {
    input: QwenInput,
    model: String,
    parameters: QwenParameters,
}

#[derive(Debug, Serialize)]
struct QwenInput {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct QwenParameters {
    incremental_output: bool,
    result_format: &'static str,
}

/// Close a dangling JSON array so the buffered prefix can be parsed.
fn ensure_proper_ending(s: &str) -> String {
    if s.starts_with('[') && !s.ends_with(']') {
        let mut owned = s.to_string();
        owned.push(']');
        return owned;
    }
    s.to_string()
}

/// Pull the candidate texts out of a parsed response array, one string per
/// array element.
fn collect_texts(data: &Value) -> Vec<String> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            item.get("candidates")
                .and_then(|c| c.as_array())
                .map(|candidates| {
                    candidates
                        .iter()
                        .filter_map(|c| c.pointer("/content/parts").and_then(|p| p.as_array()))
                        .flatten()
                        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default()
        })
        .collect()
}

/// Message text from a non-streaming response, or the vendor's error text.
fn extract_message(res: &Value) -> String {
    res.pointer("/candidates/0/content/parts/0/text")
        .and_then(|t| t.as_str())
        .or_else(|| res.pointer("/error/message").and_then(|m| m.as_str()))
        .unwrap_or_default()
        .to_string()
}

/// The vendor rejects the assistant role; it expects system instead.
fn normalize_roles(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages
        .into_iter()
        .map(|mut m| {
            if m.role == "assistant" {
                m.role = "system".into();
            }
            m
        })
        .collect()
}

pub struct QwenClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl QwenClient {
    pub fn new(settings: &ChatEndpoint) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/api/v1/services/aigc/text-generation/generation",
            self.base_url
        )
    }

    fn request_body(&self, messages: Vec<ChatMessage>) -> QwenRequest {
        QwenRequest {
            input: QwenInput {
                messages: normalize_roles(messages),
            },
            model: self.model.clone(),
            parameters: QwenParameters {
                incremental_output: true,
                result_format: "message",
            },
        }
    }
}

#[async_trait]
impl ChatApi for QwenClient {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let resp = self
            .http
            .post(self.chat_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("qwen error: {}", resp.status()));
        }
        let body: Value = resp.json().await?;
        Ok(extract_message(&body))
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<ChatChunk>,
    ) -> Result<()> {
        let resp = self
            .http
            .post(self.chat_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("qwen error: {}", status));
        }

        let mut stream = resp.bytes_stream();
        let mut partial = String::new();
        let mut emitted = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(ChatChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            partial.push_str(&String::from_utf8_lossy(&bytes));

            // Partial JSON stays buffered; only a complete parse advances.
            if let Ok(data) = serde_json::from_str::<Value>(&ensure_proper_ending(&partial)) {
                let texts = collect_texts(&data);
                if texts.len() > emitted {
                    for text in &texts[emitted..] {
                        if !text.is_empty() {
                            let _ = tx.send(ChatChunk::Text(text.clone()));
                        }
                    }
                    emitted = texts.len();
                }
            }
        }

        let _ = tx.send(ChatChunk::Done);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_array_is_closed() {
        assert_eq!(ensure_proper_ending("[{\"a\":1}"), "[{\"a\":1}]");
        assert_eq!(ensure_proper_ending("[{\"a\":1}]"), "[{\"a\":1}]");
        assert_eq!(ensure_proper_ending("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn texts_collected_per_array_element() {
        let data: Value = serde_json::from_str(
            r#"[
                {"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]}}]},
                {"candidates":[{"content":{"parts":[{"text":" world"}]}}]}
            ]"#,
        )
        .unwrap();
        assert_eq!(collect_texts(&data), vec!["Hello", " world"]);
    }

    #[test]
    fn partial_buffer_yields_nothing() {
        // Truncated mid-object: parse fails even after closing the array,
        // so nothing is emitted yet.
        let patched = ensure_proper_ending(r#"[{"candidates":[{"content"#);
        assert!(serde_json::from_str::<Value>(&patched).is_err());
    }

    #[test]
    fn message_extraction_falls_back_to_error() {
        let ok: Value = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_message(&ok), "hi");

        let err: Value = serde_json::from_str(r#"{"error":{"message":"quota"}}"#).unwrap();
        assert_eq!(extract_message(&err), "quota");

        let neither: Value = serde_json::from_str("{}").unwrap();
        assert_eq!(extract_message(&neither), "");
    }

    #[test]
    fn assistant_role_becomes_system() {
        let out = normalize_roles(vec![
            ChatMessage::user("hi"),
            ChatMessage {
                role: "assistant".into(),
                content: "hello".into(),
            },
        ]);
        assert_eq!(out[0].role, "user");
        assert_eq!(out[1].role, "system");
    }
}
