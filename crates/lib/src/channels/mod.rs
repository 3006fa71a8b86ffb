//! Platform channel types: inbound messages, acks, and the DingTalk frame
//! adapter.

pub mod dingtalk;
pub mod inbound;

pub use dingtalk::ChatbotFrame;
pub use inbound::{AckResult, AckStatus, Delivery, InboundMessage, Payload, VoicePayload};
