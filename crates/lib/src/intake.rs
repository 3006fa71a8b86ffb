//! Message intake: dedup check, extraction, backend call, card delivery, ack.
//!
//! Every delivery terminates in exactly one ack. Duplicate deliveries ack ok
//! without reprocessing; degraded outcomes (empty text, exhausted
//! recognition, failed streaming) are recovered with a user-visible notice or
//! a single fallback message and still ack ok. An error ack is reserved for
//! cases where nothing could be delivered to the user at all, so the platform
//! may redeliver.

use crate::backend::{AgentBackend, BackendError};
use crate::channels::{AckResult, Delivery, InboundMessage};
use crate::dedup::{dedup_key, DedupStore};
use crate::delivery::{fail_to_single_message, CardStream, CardTransport, DeliveryError, StreamingOptions};
use crate::extract::{ContentExtractor, ExtractError};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

pub const DEFAULT_MAX_CONCURRENT_BACKEND_CALLS: usize = 64;

const NOTICE_EMPTY_TEXT: &str =
    "I couldn't find any text in your message. Please try again.";
const NOTICE_EMPTY_VOICE: &str =
    "Your voice message appears to be empty. Please try recording again.";
const NOTICE_RECOGNITION_FAILED: &str =
    "I'm sorry, I couldn't understand your voice message. Please try again or type it instead.";
const NOTICE_BACKEND_FAILED: &str =
    "I'm sorry, I encountered an error processing your message. Please try again.";

/// Drives one inbound message from dedup check to ack.
pub struct IntakeController {
    dedup: Arc<DedupStore>,
    extractor: ContentExtractor,
    backend: Arc<dyn AgentBackend>,
    transport: Arc<dyn CardTransport>,
    backend_permits: Semaphore,
    streaming: StreamingOptions,
    /// When false, skip the card protocol and always send one message.
    enable_streaming: bool,
}

impl IntakeController {
    pub fn new(
        dedup: Arc<DedupStore>,
        extractor: ContentExtractor,
        backend: Arc<dyn AgentBackend>,
        transport: Arc<dyn CardTransport>,
        max_concurrent_backend_calls: usize,
        streaming: StreamingOptions,
        enable_streaming: bool,
    ) -> Self {
        Self {
            dedup,
            extractor,
            backend,
            transport,
            backend_permits: Semaphore::new(max_concurrent_backend_calls.max(1)),
            streaming,
            enable_streaming,
        }
    }

    /// Process one delivery to completion and produce its ack.
    pub async fn handle(&self, message: &InboundMessage) -> AckResult {
        let key = dedup_key(message);
        if !self.dedup.admit(&key).await {
            log::info!("duplicate delivery for key {}, acking without reprocessing", key);
            return AckResult::ok("duplicate delivery");
        }

        let text = match self.extractor.extract(message).await {
            Ok(text) => text,
            Err(e) => {
                let notice = match &e {
                    ExtractError::EmptyText => NOTICE_EMPTY_TEXT,
                    ExtractError::EmptyVoice => NOTICE_EMPTY_VOICE,
                    ExtractError::RecognitionExhausted { .. } => NOTICE_RECOGNITION_FAILED,
                };
                log::warn!("extraction produced no text for {}: {}", key, e);
                self.send_notice(&message.conversation_id, notice).await;
                return AckResult::ok(format!("degraded: {}", e));
            }
        };

        log::info!(
            "processing message from {} in {}: {:.50}",
            message.sender_id,
            message.conversation_id,
            text
        );

        // FIFO gate on outstanding backend calls.
        let _permit = match self.backend_permits.acquire().await {
            Ok(p) => p,
            Err(_) => return AckResult::error("backend limiter closed"),
        };

        match self.respond(&message.conversation_id, &text).await {
            Ok(()) => AckResult::ok("message processed"),
            Err(RespondError::Backend(e)) => {
                log::error!("backend call failed for {}: {}", key, e);
                self.send_notice(&message.conversation_id, NOTICE_BACKEND_FAILED)
                    .await;
                AckResult::error(format!("backend unavailable: {}", e))
            }
            Err(RespondError::Delivery(e)) => {
                log::error!("could not deliver response for {}: {}", key, e);
                AckResult::error(format!("delivery failed: {}", e))
            }
        }
    }

    /// Invoke the backend and deliver the answer, streaming when possible.
    async fn respond(&self, conversation_id: &str, text: &str) -> Result<(), RespondError> {
        if !self.enable_streaming {
            return self.respond_buffered(conversation_id, text).await;
        }
        let stream = CardStream::begin(
            Arc::clone(&self.transport),
            conversation_id,
            self.streaming.clone(),
        )
        .await;
        match stream {
            Ok(stream) => self.respond_streaming(conversation_id, text, stream).await,
            Err(e) => {
                log::warn!(
                    "card creation failed for {}, buffering full response: {}",
                    conversation_id,
                    e
                );
                self.respond_buffered(conversation_id, text).await
            }
        }
    }

    /// Streaming path: forward backend chunks into the card, finalize, and
    /// fall back to one message when the card degraded along the way.
    async fn respond_streaming(
        &self,
        conversation_id: &str,
        text: &str,
        mut stream: CardStream,
    ) -> Result<(), RespondError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let backend = Arc::clone(&self.backend);
        let text = text.to_string();
        let conv = conversation_id.to_string();
        let backend_task = tokio::spawn(async move {
            let mut on_chunk = |s: &str| {
                let _ = tx.send(s.to_string());
            };
            backend.chat_stream(&text, &conv, &mut on_chunk).await
        });

        // Single consumer: push order is chunk arrival order.
        while let Some(chunk) = rx.recv().await {
            match stream.push(&chunk).await {
                Ok(()) => {}
                Err(DeliveryError::Degraded) => {
                    // Keep draining; the stream accumulates for the fallback.
                }
                Err(e) => {
                    log::warn!("card push failed for {}: {}", conversation_id, e);
                }
            }
        }

        let answer = match backend_task.await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return Err(RespondError::Backend(e)),
            Err(e) => return Err(RespondError::Backend(BackendError::Api(e.to_string()))),
        };

        match stream.finalize().await {
            Ok(()) => Ok(()),
            Err(DeliveryError::Degraded) => {
                log::warn!(
                    "card degraded for {}, sending response as one message",
                    conversation_id
                );
                stream
                    .fail_to_single_message()
                    .await
                    .map_err(RespondError::Delivery)?;
                Ok(())
            }
            Err(e) => {
                // Final flush failed outright; last resort is a plain message.
                log::warn!("card finalize failed for {}: {}", conversation_id, e);
                fail_to_single_message(
                    self.transport.as_ref(),
                    conversation_id,
                    &answer,
                    &self.streaming,
                )
                .await
                .map_err(RespondError::Delivery)?;
                Ok(())
            }
        }
    }

    /// Buffered path: non-streaming backend call, then one plain message.
    async fn respond_buffered(&self, conversation_id: &str, text: &str) -> Result<(), RespondError> {
        let answer = self
            .backend
            .chat(text, conversation_id)
            .await
            .map_err(RespondError::Backend)?;
        fail_to_single_message(
            self.transport.as_ref(),
            conversation_id,
            &answer,
            &self.streaming,
        )
        .await
        .map_err(RespondError::Delivery)
    }

    /// Best-effort degraded-service notice; failures are logged, not fatal.
    async fn send_notice(&self, conversation_id: &str, notice: &str) {
        if let Err(e) = self.transport.send_text(conversation_id, notice).await {
            log::warn!("could not send notice to {}: {}", conversation_id, e);
        }
    }
}

enum RespondError {
    Backend(BackendError),
    Delivery(DeliveryError),
}

/// Receive deliveries from a connector and process each on its own task, so
/// independent conversations never block one another. The ack is sent when
/// handling completes; a dropped ack receiver means the connector gave up on
/// the delivery (e.g. the connection dropped) and is only logged.
pub async fn run_intake_loop(
    mut deliveries: mpsc::Receiver<Delivery>,
    controller: Arc<IntakeController>,
) {
    while let Some(delivery) = deliveries.recv().await {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            let ack = controller.handle(&delivery.message).await;
            if !ack.is_ok() {
                log::warn!("delivery acked with error: {:?}", ack.reason);
            }
            if delivery.ack.send(ack).is_err() {
                log::debug!("ack receiver dropped before ack was sent");
            }
        });
    }
    log::info!("intake loop stopped: delivery channel closed");
}
