//! AI agent backend seam: one trait over blocking and streaming chat.

mod dify;

pub use dify::{DifyClient, DEFAULT_REQUEST_TIMEOUT};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend api error: {0}")]
    Api(String),
    #[error("backend call timed out")]
    Timeout,
}

/// A hosted agent backend: turns normalized text into a response, optionally
/// streaming partial text before completion.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Single-shot completion: returns the full answer.
    async fn chat(&self, text: &str, conversation_id: &str) -> Result<String, BackendError>;

    /// Streaming completion: `on_chunk` is called per partial-text event, in
    /// order; returns the accumulated full answer after the completion signal.
    async fn chat_stream(
        &self,
        text: &str,
        conversation_id: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, BackendError>;
}
