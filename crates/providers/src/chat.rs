//! Common surface for the streaming chat vendors.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system" | "user" | "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Incremental piece of a streamed chat response.
#[derive(Debug, Clone)]
pub enum ChatChunk {
    Text(String),
    Done,
    Error(String),
}

/// Chat completion client.
///
/// Contract for `chat_stream`: if the request fails before any chunk is
/// produced the method returns `Err`; once streaming has started, failures
/// are reported as `ChatChunk::Error` and the method returns `Ok(())`.
#[async_trait]
pub trait ChatApi {
    async fn generate(&self, messages: Vec<ChatMessage>) -> Result<String>;

    async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<ChatChunk>,
    ) -> Result<()>;
}
