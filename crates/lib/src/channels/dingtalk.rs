//! DingTalk stream callback frames: wire structs and mapping to
//! [`InboundMessage`]. The WebSocket transport itself lives outside this
//! crate; this module only understands the callback payload shape and the
//! ack answer the platform expects per delivery.

use crate::channels::inbound::{AckResult, AckStatus, InboundMessage, Payload, VoicePayload};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Ack status codes the platform understands (mirrors the stream SDK).
pub const ACK_STATUS_OK: u32 = 200;
pub const ACK_STATUS_SYSTEM_EXCEPTION: u32 = 500;

/// Chatbot callback payload (`data` of a stream callback frame).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatbotFrame {
    #[serde(default)]
    pub msg_id: Option<String>,
    #[serde(default)]
    pub msgtype: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub sender_staff_id: String,
    #[serde(default)]
    pub session_webhook: String,
    /// Epoch milliseconds when the platform created the message.
    #[serde(default)]
    pub create_at: Option<i64>,
    #[serde(default)]
    pub text: Option<TextContent>,
    #[serde(default)]
    pub content: Option<MediaContent>,
}

#[derive(Debug, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub content: String,
}

/// Voice/audio content: platform recognition transcript plus optional inline
/// audio (base64) and format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaContent {
    #[serde(default)]
    pub recognition: Option<String>,
    #[serde(default)]
    pub download_code: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

impl ChatbotFrame {
    fn received_at(&self) -> DateTime<Utc> {
        self.create_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now)
    }

    /// Map the frame to an [`InboundMessage`]. Returns None for message types
    /// this adapter does not handle (images, files, cards).
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let received_at = self.received_at();
        let payload = match self.msgtype.as_str() {
            "text" => Payload::Text(self.text.map(|t| t.content).unwrap_or_default()),
            "audio" | "voice" => {
                let content = self.content?;
                let data = content
                    .data
                    .as_deref()
                    .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
                    .unwrap_or_default();
                Payload::Voice(VoicePayload {
                    data,
                    format: content.format.unwrap_or_else(|| "amr".to_string()),
                    transcript: content.recognition,
                })
            }
            other => {
                log::debug!("ignoring unsupported msgtype {}", other);
                return None;
            }
        };
        Some(InboundMessage {
            message_id: self.msg_id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_staff_id,
            payload,
            received_at,
        })
    }
}

/// Ack frame answered to the platform for one delivery.
pub fn ack_frame(ack: &AckResult) -> serde_json::Value {
    let status = match ack.status {
        AckStatus::Ok => ACK_STATUS_OK,
        AckStatus::Error => ACK_STATUS_SYSTEM_EXCEPTION,
    };
    serde_json::json!({
        "status": status,
        "message": ack.reason.clone().unwrap_or_default(),
    })
}
