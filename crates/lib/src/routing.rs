//! Conversation reply routing: conversation_id -> session webhook URL.
//!
//! The platform attaches a short-lived session webhook to each delivery;
//! replies for that conversation must go to the most recent one. The
//! connector binds on every inbound message, the delivery transport resolves
//! on send.

use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory store: conversation_id -> reply webhook (latest wins).
pub struct ReplyRouteStore {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for ReplyRouteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyRouteStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Bind a conversation to its current session webhook. Overwrites any
    /// previous binding for the conversation.
    pub async fn bind(&self, conversation_id: impl Into<String>, webhook_url: impl Into<String>) {
        self.inner
            .write()
            .await
            .insert(conversation_id.into(), webhook_url.into());
    }

    /// Resolve the reply webhook for a conversation (outbound).
    pub async fn resolve(&self, conversation_id: &str) -> Option<String> {
        self.inner.read().await.get(conversation_id).cloned()
    }
}
