//! Streaming chat against an Ernie-style endpoint (SSE framing).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::settings::ChatEndpoint;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::chat::{ChatApi, ChatChunk, ChatMessage};
use crate::sse::SseParser;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Serialize)]
struct ErnieRequest<'a> {
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ErnieChunk {
    result: String,
    is_end: bool,
    error_msg: String,
}

pub struct ErnieClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ErnieClient {
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
            "{}/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/{}?access_token={}",
            self.base_url, self.model, self.api_key
        )
    }
}

#[async_trait]
impl ChatApi for ErnieClient {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let req = ErnieRequest {
            messages: &messages,
            stream: false,
        };
        let resp = self
            .http
            .post(self.chat_url())
            .header("Content-Type", "application/json")
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("ernie error: {}", resp.status()));
        }
        let body: ErnieChunk = resp.json().await?;
        if !body.error_msg.is_empty() {
            return Err(anyhow!("{}", body.error_msg));
        }
        Ok(body.result)
    }

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<ChatChunk>,
    ) -> Result<()> {
        let req = ErnieRequest {
            messages: &messages,
            stream: true,
        };
        let resp = self
            .http
            .post(self.chat_url())
            .header("Content-Type", "application/json")
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("ernie error: {}", resp.status()));
        }

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(ChatChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            for event in parser.feed(&bytes) {
                if event.data == "[DONE]" {
                    let _ = tx.send(ChatChunk::Done);
                    return Ok(());
                }
                match serde_json::from_str::<ErnieChunk>(&event.data) {
                    Ok(chunk) => {
                        if !chunk.error_msg.is_empty() {
                            let _ = tx.send(ChatChunk::Error(chunk.error_msg));
                            return Ok(());
                        }
                        if !chunk.result.is_empty() {
                            let _ = tx.send(ChatChunk::Text(chunk.result));
                        }
                        if chunk.is_end {
                            let _ = tx.send(ChatChunk::Done);
                            return Ok(());
                        }
                    }
                    Err(_) => {
                        // Non-JSON keepalive data; skip.
                    }
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
    fn stream_chunk_decodes() {
        let chunk: ErnieChunk =
            serde_json::from_str(r#"{"result":"Hello","is_end":false}"#).unwrap();
        assert_eq!(chunk.result, "Hello");
        assert!(!chunk.is_end);
    }

    #[test]
    fn error_field_survives_decode() {
        let chunk: ErnieChunk =
            serde_json::from_str(r#"{"error_msg":"rate limited","result":""}"#).unwrap();
        assert_eq!(chunk.error_msg, "rate limited");
    }
}
