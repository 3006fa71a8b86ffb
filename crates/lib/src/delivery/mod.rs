//! Outbound card delivery: placeholder card, batched incremental updates,
//! bounded retry, and single-message fallback.
//!
//! `CardStream` is owned by the task processing one message, so update order
//! for a card is always push order. Chunks are flushed when at least
//! `min_flush_chars` have accumulated or the debounce delay has elapsed,
//! whichever comes first; each network update is retried a bounded number of
//! times and a stream whose retries are exhausted stops making network calls
//! while still accumulating text for the fallback message.

mod webhook;

pub use webhook::WebhookCardTransport;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("delivery api error: {0}")]
    Api(String),
    #[error("card stream closed")]
    Closed,
    #[error("card updates exhausted retries")]
    Degraded,
}

/// Network seam for the card protocol: create, incremental update, plain text.
#[async_trait]
pub trait CardTransport: Send + Sync {
    /// Create a placeholder card; returns the card instance id.
    async fn create_card(&self, conversation_id: &str) -> Result<String, DeliveryError>;

    /// Append one text increment to a card. `finished` marks the last update.
    async fn update_card(
        &self,
        card_id: &str,
        chunk: &str,
        finished: bool,
    ) -> Result<(), DeliveryError>;

    /// Send a plain one-shot text message to a conversation.
    async fn send_text(&self, conversation_id: &str, text: &str) -> Result<(), DeliveryError>;
}

/// Lifecycle of an outbound card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Creating,
    Streaming,
    Finalized,
    FallbackSent,
    Failed,
}

/// Tuning for batching, retry, and the fallback message cap.
#[derive(Debug, Clone)]
pub struct StreamingOptions {
    /// Flush once at least this many pending characters have accumulated.
    pub min_flush_chars: usize,
    /// Flush pending text after this delay even below the size threshold.
    pub flush_debounce: Duration,
    /// Retries per network update before the stream degrades.
    pub max_push_retries: u32,
    pub retry_delay: Duration,
    /// Plain-message length cap; longer text is truncated with an ellipsis.
    pub message_limit: usize,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            min_flush_chars: 20,
            flush_debounce: Duration::from_millis(50),
            max_push_retries: 3,
            retry_delay: Duration::from_millis(500),
            message_limit: 5000,
        }
    }
}

/// One card being streamed to a conversation.
pub struct CardStream {
    transport: Arc<dyn CardTransport>,
    conversation_id: String,
    card_id: String,
    state: CardState,
    /// Everything pushed so far, flushed or not. Fallback text on degrade.
    accumulated: String,
    /// Tail of `accumulated` not yet sent to the transport.
    pending: String,
    seq: u64,
    last_flush: Instant,
    opts: StreamingOptions,
}

impl CardStream {
    /// Create the placeholder card. On error the caller buffers the full
    /// response and sends it with [`fail_to_single_message`] instead.
    pub async fn begin(
        transport: Arc<dyn CardTransport>,
        conversation_id: &str,
        opts: StreamingOptions,
    ) -> Result<Self, DeliveryError> {
        let card_id = transport.create_card(conversation_id).await?;
        log::debug!("card {} created for {}", card_id, conversation_id);
        Ok(Self {
            transport,
            conversation_id: conversation_id.to_string(),
            card_id,
            state: CardState::Streaming,
            accumulated: String::new(),
            pending: String::new(),
            seq: 0,
            last_flush: Instant::now(),
            opts,
        })
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    /// Full text pushed so far, whether or not it reached the transport.
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Successful transport updates issued so far.
    pub fn update_count(&self) -> u64 {
        self.seq
    }

    /// Append a chunk; flushes to the transport when the size threshold or
    /// the debounce delay is hit. Returns `Closed` after finalize.
    pub async fn push(&mut self, chunk: &str) -> Result<(), DeliveryError> {
        match self.state {
            CardState::Streaming | CardState::Failed => {}
            _ => return Err(DeliveryError::Closed),
        }
        self.accumulated.push_str(chunk);
        self.pending.push_str(chunk);
        if self.state == CardState::Failed {
            // Degraded: keep accumulating for the fallback, skip the network.
            return Ok(());
        }
        let due = self.pending.chars().count() >= self.opts.min_flush_chars
            || self.last_flush.elapsed() >= self.opts.flush_debounce;
        if due && !self.pending.is_empty() {
            self.flush(false).await?;
        }
        Ok(())
    }

    /// Flush the remainder with the finished flag and close the stream.
    /// Must be called exactly once, after the backend signals completion.
    pub async fn finalize(&mut self) -> Result<(), DeliveryError> {
        match self.state {
            CardState::Streaming => {}
            CardState::Failed => return Err(DeliveryError::Degraded),
            _ => return Err(DeliveryError::Closed),
        }
        self.flush(true).await?;
        self.state = CardState::Finalized;
        log::debug!(
            "card {} finalized after {} update(s)",
            self.card_id,
            self.seq
        );
        Ok(())
    }

    async fn flush(&mut self, finished: bool) -> Result<(), DeliveryError> {
        let chunk = std::mem::take(&mut self.pending);
        let mut attempt = 0u32;
        loop {
            match self
                .transport
                .update_card(&self.card_id, &chunk, finished)
                .await
            {
                Ok(()) => {
                    self.seq += 1;
                    self.last_flush = Instant::now();
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.opts.max_push_retries {
                        log::warn!(
                            "card {} update failed after {} attempts: {}",
                            self.card_id,
                            attempt,
                            e
                        );
                        self.state = CardState::Failed;
                        return Err(DeliveryError::Degraded);
                    }
                    log::debug!(
                        "card {} update attempt {} failed, retrying: {}",
                        self.card_id,
                        attempt,
                        e
                    );
                    tokio::time::sleep(self.opts.retry_delay).await;
                }
            }
        }
    }

    /// Degraded path: deliver the whole text as one plain message instead of
    /// losing the response. Marks the stream `FallbackSent` on success.
    pub async fn fail_to_single_message(&mut self) -> Result<(), DeliveryError> {
        let text = self.accumulated.clone();
        fail_to_single_message(
            self.transport.as_ref(),
            &self.conversation_id,
            &text,
            &self.opts,
        )
        .await?;
        self.state = CardState::FallbackSent;
        Ok(())
    }
}

/// Send `full_text` as one plain message, capped to the configured limit.
pub async fn fail_to_single_message(
    transport: &dyn CardTransport,
    conversation_id: &str,
    full_text: &str,
    opts: &StreamingOptions,
) -> Result<(), DeliveryError> {
    let text = truncate_message(full_text, opts.message_limit);
    transport.send_text(conversation_id, &text).await
}

fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    log::warn!("message truncated to {} characters", limit);
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        updates: Mutex<Vec<(String, bool)>>,
        texts: Mutex<Vec<String>>,
        fail_create: bool,
        failing_updates: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl CardTransport for RecordingTransport {
        async fn create_card(&self, _conversation_id: &str) -> Result<String, DeliveryError> {
            if self.fail_create {
                return Err(DeliveryError::Api("create refused".to_string()));
            }
            Ok("card-1".to_string())
        }

        async fn update_card(
            &self,
            _card_id: &str,
            chunk: &str,
            finished: bool,
        ) -> Result<(), DeliveryError> {
            let remaining = self
                .failing_updates
                .load(std::sync::atomic::Ordering::SeqCst);
            if remaining > 0 {
                self.failing_updates
                    .store(remaining - 1, std::sync::atomic::Ordering::SeqCst);
                return Err(DeliveryError::Api("update refused".to_string()));
            }
            self.updates.lock().await.push((chunk.to_string(), finished));
            Ok(())
        }

        async fn send_text(&self, _conversation_id: &str, text: &str) -> Result<(), DeliveryError> {
            self.texts.lock().await.push(text.to_string());
            Ok(())
        }
    }

    fn opts() -> StreamingOptions {
        StreamingOptions {
            min_flush_chars: 20,
            flush_debounce: Duration::from_secs(60),
            max_push_retries: 3,
            retry_delay: Duration::from_millis(1),
            message_limit: 5000,
        }
    }

    #[tokio::test]
    async fn batches_by_size_and_concatenation_matches() {
        let transport = Arc::new(RecordingTransport::default());
        let mut stream = CardStream::begin(transport.clone(), "conv", opts())
            .await
            .unwrap();

        let full = "Hello world, this is MindBot";
        for chunk in full.as_bytes().chunks(5) {
            stream.push(std::str::from_utf8(chunk).unwrap()).await.unwrap();
        }
        stream.finalize().await.unwrap();

        let updates = transport.updates.lock().await;
        assert_eq!(updates.len(), 2);
        assert!(!updates[0].1);
        assert!(updates[1].1);
        let joined: String = updates.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(joined, full);
        assert_eq!(stream.state(), CardState::Finalized);
    }

    #[tokio::test]
    async fn debounce_flushes_small_pending_chunks() {
        let transport = Arc::new(RecordingTransport::default());
        let mut options = opts();
        options.flush_debounce = Duration::from_millis(10);
        let mut stream = CardStream::begin(transport.clone(), "conv", options)
            .await
            .unwrap();

        stream.push("hi").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.push("!").await.unwrap();
        stream.finalize().await.unwrap();

        let updates = transport.updates.lock().await;
        // Debounce elapsed before the second push, so it flushed "hi!".
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].0, "hi!");
    }

    #[tokio::test]
    async fn transient_update_failure_is_retried() {
        let transport = Arc::new(RecordingTransport {
            failing_updates: std::sync::atomic::AtomicU32::new(2),
            ..Default::default()
        });
        let mut stream = CardStream::begin(transport.clone(), "conv", opts())
            .await
            .unwrap();
        stream.push("aaaaaaaaaaaaaaaaaaaaaaaa").await.unwrap();
        stream.finalize().await.unwrap();
        assert_eq!(transport.updates.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_and_fall_back() {
        let transport = Arc::new(RecordingTransport {
            failing_updates: std::sync::atomic::AtomicU32::new(100),
            ..Default::default()
        });
        let mut stream = CardStream::begin(transport.clone(), "conv", opts())
            .await
            .unwrap();
        let err = stream.push("aaaaaaaaaaaaaaaaaaaaaaaa").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Degraded));
        assert_eq!(stream.state(), CardState::Failed);

        // Later pushes keep accumulating without touching the network.
        stream.push(" and more").await.unwrap();
        assert_eq!(stream.accumulated(), "aaaaaaaaaaaaaaaaaaaaaaaa and more");

        stream.fail_to_single_message().await.unwrap();
        assert_eq!(stream.state(), CardState::FallbackSent);
        let texts = transport.texts.lock().await;
        assert_eq!(texts.as_slice(), ["aaaaaaaaaaaaaaaaaaaaaaaa and more"]);
        assert!(transport.updates.lock().await.is_empty());
    }

    #[tokio::test]
    async fn push_after_finalize_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let mut stream = CardStream::begin(transport, "conv", opts()).await.unwrap();
        stream.push("done").await.unwrap();
        stream.finalize().await.unwrap();
        assert!(matches!(
            stream.push("late").await.unwrap_err(),
            DeliveryError::Closed
        ));
        assert!(matches!(
            stream.finalize().await.unwrap_err(),
            DeliveryError::Closed
        ));
    }

    #[tokio::test]
    async fn long_fallback_message_is_truncated() {
        let transport = RecordingTransport::default();
        let mut options = opts();
        options.message_limit = 10;
        fail_to_single_message(&transport, "conv", &"x".repeat(25), &options)
            .await
            .unwrap();
        let texts = transport.texts.lock().await;
        assert_eq!(texts[0], format!("{}...", "x".repeat(10)));
    }
}
