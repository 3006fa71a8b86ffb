//! Inbound message from the platform stream: delivered to the intake controller,
//! which answers with exactly one ack per delivery.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Voice payload attached to an inbound message. The platform may attach its
/// own transcript alongside the raw audio.
#[derive(Debug, Clone)]
pub struct VoicePayload {
    pub data: Vec<u8>,
    pub format: String,
    /// Platform-side recognition result, when the platform provides one.
    pub transcript: Option<String>,
}

/// Payload of an inbound message: plain text or voice audio.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Voice(VoicePayload),
}

/// A message delivered over the platform stream. Immutable once received;
/// owned by the intake controller for its processing lifetime.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform-assigned message id; absent on some delivery paths.
    pub message_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

/// Delivery outcome returned to the platform. A positive ack suppresses
/// platform-side redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    Error,
}

/// The ack for one delivery: status plus an optional reason for the log/frame.
#[derive(Debug, Clone)]
pub struct AckResult {
    pub status: AckStatus,
    pub reason: Option<String>,
}

impl AckResult {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Ok,
            reason: Some(reason.into()),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Error,
            reason: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }
}

/// One stream delivery handed from a connector to the intake loop. The
/// connector awaits `ack` to answer the platform synchronously.
#[derive(Debug)]
pub struct Delivery {
    pub message: InboundMessage,
    pub ack: oneshot::Sender<AckResult>,
}
