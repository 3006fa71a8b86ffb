//! Session-webhook card transport: card create, incremental update, and plain
//! text message as HTTP POSTs to the conversation's reply webhook.

use crate::delivery::{CardTransport, DeliveryError};
use crate::routing::ReplyRouteStore;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Card transport over per-conversation session webhooks. Routes are kept
/// fresh by the stream connector on every inbound message.
pub struct WebhookCardTransport {
    routes: Arc<ReplyRouteStore>,
    card_template_id: String,
    client: reqwest::Client,
}

impl WebhookCardTransport {
    pub fn new(
        routes: Arc<ReplyRouteStore>,
        card_template_id: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            routes,
            card_template_id: card_template_id.into(),
            client,
        }
    }

    async fn webhook_for(&self, conversation_id: &str) -> Result<String, DeliveryError> {
        self.routes.resolve(conversation_id).await.ok_or_else(|| {
            DeliveryError::Api(format!(
                "no reply webhook bound for conversation {}",
                conversation_id
            ))
        })
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<(), DeliveryError> {
        let res = self.client.post(url).json(body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Api(format!("{} {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl CardTransport for WebhookCardTransport {
    async fn create_card(&self, conversation_id: &str) -> Result<String, DeliveryError> {
        let url = self.webhook_for(conversation_id).await?;
        let card_id = format!("card-{}", uuid::Uuid::new_v4());
        let body = json!({
            "msgtype": "ai_card",
            "card": {
                "templateId": self.card_template_id,
                "cardInstanceId": card_id,
            }
        });
        self.post(&url, &body).await?;
        // Updates address the card instance; remember where it lives.
        self.routes.bind(card_id.clone(), url).await;
        Ok(card_id)
    }

    async fn update_card(
        &self,
        card_id: &str,
        chunk: &str,
        finished: bool,
    ) -> Result<(), DeliveryError> {
        let url = self
            .routes
            .resolve(card_id)
            .await
            .ok_or_else(|| DeliveryError::Api(format!("no route for card {}", card_id)))?;
        let body = json!({
            "msgtype": "ai_card_update",
            "card": {
                "cardInstanceId": card_id,
                "content": chunk,
                "isFinal": finished,
            }
        });
        self.post(&url, &body).await
    }

    async fn send_text(&self, conversation_id: &str, text: &str) -> Result<(), DeliveryError> {
        let url = self.webhook_for(conversation_id).await?;
        let body = json!({
            "msgtype": "text",
            "text": { "content": text }
        });
        self.post(&url, &body).await
    }
}
