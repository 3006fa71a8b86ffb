//! End-to-end intake tests with mock backend, transport, and recognition:
//! dedup short-circuit, degraded voice handling, streamed card batching, and
//! the single-message fallbacks.

use async_trait::async_trait;
use chrono::Utc;
use lib::backend::{AgentBackend, BackendError};
use lib::channels::{InboundMessage, Payload, VoicePayload};
use lib::dedup::DedupStore;
use lib::delivery::{CardTransport, DeliveryError, StreamingOptions};
use lib::extract::ContentExtractor;
use lib::intake::IntakeController;
use lib::recognition::{
    NativeTranscriptProvider, RecognitionError, RecognitionPipeline, RecognitionProvider,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct MockBackend {
    answer: String,
    chunk_size: usize,
    fail: bool,
    calls: AtomicU32,
}

impl MockBackend {
    fn new(answer: &str, chunk_size: usize) -> Self {
        Self {
            answer: answer.to_string(),
            chunk_size,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            answer: String::new(),
            chunk_size: 5,
            fail: true,
            calls: AtomicU32::new(0),
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentBackend for MockBackend {
    async fn chat(&self, _text: &str, _conversation_id: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BackendError::Api("backend down".to_string()));
        }
        Ok(self.answer.clone())
    }

    async fn chat_stream(
        &self,
        _text: &str,
        _conversation_id: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BackendError::Api("backend down".to_string()));
        }
        let chars: Vec<char> = self.answer.chars().collect();
        for chunk in chars.chunks(self.chunk_size) {
            let s: String = chunk.iter().collect();
            on_chunk(&s);
        }
        Ok(self.answer.clone())
    }
}

#[derive(Default)]
struct RecordingTransport {
    fail_create: bool,
    fail_updates: bool,
    updates: Mutex<Vec<(String, bool)>>,
    texts: Mutex<Vec<String>>,
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
        if self.fail_updates {
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

struct DeadProvider;

#[async_trait]
impl RecognitionProvider for DeadProvider {
    fn name(&self) -> &str {
        "dead"
    }

    async fn recognize(&self, _voice: &VoicePayload) -> Result<String, RecognitionError> {
        Err(RecognitionError::Api("engine offline".to_string()))
    }
}

fn pipeline() -> RecognitionPipeline {
    RecognitionPipeline::new(
        vec![
            Arc::new(NativeTranscriptProvider),
            Arc::new(DeadProvider),
            Arc::new(DeadProvider),
        ],
        Duration::from_secs(1),
    )
}

fn options() -> StreamingOptions {
    StreamingOptions {
        min_flush_chars: 20,
        flush_debounce: Duration::from_secs(60),
        max_push_retries: 1,
        retry_delay: Duration::from_millis(1),
        message_limit: 5000,
    }
}

fn controller(
    backend: Arc<MockBackend>,
    transport: Arc<RecordingTransport>,
    ttl: Duration,
) -> IntakeController {
    IntakeController::new(
        Arc::new(DedupStore::new(ttl, 100)),
        ContentExtractor::new(pipeline()),
        backend,
        transport,
        8,
        options(),
        true,
    )
}

fn text_message(id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        message_id: Some(id.to_string()),
        conversation_id: "conv-1".to_string(),
        sender_id: "u-1".to_string(),
        payload: Payload::Text(text.to_string()),
        received_at: Utc::now(),
    }
}

fn voice_message(id: &str) -> InboundMessage {
    InboundMessage {
        message_id: Some(id.to_string()),
        conversation_id: "conv-1".to_string(),
        sender_id: "u-1".to_string(),
        payload: Payload::Voice(VoicePayload {
            data: vec![0; 16],
            format: "amr".to_string(),
            transcript: None,
        }),
        received_at: Utc::now(),
    }
}

#[tokio::test]
async fn duplicate_delivery_within_ttl_invokes_backend_once() {
    let backend = Arc::new(MockBackend::new("hello back", 5));
    let transport = Arc::new(RecordingTransport::default());
    let c = controller(backend.clone(), transport, Duration::from_secs(300));

    let msg = text_message("m1", "hi");
    let first = c.handle(&msg).await;
    let second = c.handle(&msg).await;

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn redelivery_after_ttl_expiry_is_processed_again() {
    let backend = Arc::new(MockBackend::new("hello back", 5));
    let transport = Arc::new(RecordingTransport::default());
    let c = controller(backend.clone(), transport, Duration::from_millis(30));

    let msg = text_message("m1", "hi");
    assert!(c.handle(&msg).await.is_ok());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(c.handle(&msg).await.is_ok());
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn exhausted_voice_recognition_never_reaches_backend() {
    let backend = Arc::new(MockBackend::new("unused", 5));
    let transport = Arc::new(RecordingTransport::default());
    let c = controller(backend.clone(), transport.clone(), Duration::from_secs(300));

    let ack = c.handle(&voice_message("v1")).await;

    assert!(ack.is_ok());
    assert_eq!(backend.call_count(), 0);
    let texts = transport.texts.lock().await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("voice message"));
}

#[tokio::test]
async fn empty_text_gets_distinct_notice_and_ok_ack() {
    let backend = Arc::new(MockBackend::new("unused", 5));
    let transport = Arc::new(RecordingTransport::default());
    let c = controller(backend.clone(), transport.clone(), Duration::from_secs(300));

    let ack = c.handle(&text_message("t1", "   ")).await;

    assert!(ack.is_ok());
    assert_eq!(backend.call_count(), 0);
    let texts = transport.texts.lock().await;
    assert_eq!(texts.len(), 1);
    assert!(!texts[0].contains("voice"));
}

#[tokio::test]
async fn streamed_answer_is_batched_and_order_preserved() {
    let full = "Hello world, this is MindBot";
    let backend = Arc::new(MockBackend::new(full, 5));
    let transport = Arc::new(RecordingTransport::default());
    let c = controller(backend, transport.clone(), Duration::from_secs(300));

    let ack = c.handle(&text_message("m1", "say hi")).await;
    assert!(ack.is_ok());

    let updates = transport.updates.lock().await;
    assert_eq!(updates.len(), 2);
    assert!(!updates[0].1);
    assert!(updates[1].1);
    let joined: String = updates.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(joined, full);
    assert!(transport.texts.lock().await.is_empty());
}

#[tokio::test]
async fn card_creation_failure_sends_one_full_message_and_no_pushes() {
    let backend = Arc::new(MockBackend::new("complete answer", 5));
    let transport = Arc::new(RecordingTransport {
        fail_create: true,
        ..Default::default()
    });
    let c = controller(backend, transport.clone(), Duration::from_secs(300));

    let ack = c.handle(&text_message("m1", "hello")).await;
    assert!(ack.is_ok());

    assert!(transport.updates.lock().await.is_empty());
    let texts = transport.texts.lock().await;
    assert_eq!(texts.as_slice(), ["complete answer"]);
}

#[tokio::test]
async fn degraded_streaming_falls_back_to_single_message() {
    let full = "a response long enough to trigger several flushes along the way";
    let backend = Arc::new(MockBackend::new(full, 5));
    let transport = Arc::new(RecordingTransport {
        fail_updates: true,
        ..Default::default()
    });
    let c = controller(backend, transport.clone(), Duration::from_secs(300));

    let ack = c.handle(&text_message("m1", "hello")).await;
    assert!(ack.is_ok());

    assert!(transport.updates.lock().await.is_empty());
    let texts = transport.texts.lock().await;
    assert_eq!(texts.as_slice(), [full]);
}

#[tokio::test]
async fn backend_failure_acks_error_and_notifies_user() {
    let backend = Arc::new(MockBackend::failing());
    let transport = Arc::new(RecordingTransport::default());
    let c = controller(backend, transport.clone(), Duration::from_secs(300));

    let ack = c.handle(&text_message("m1", "hello")).await;
    assert!(!ack.is_ok());

    let texts = transport.texts.lock().await;
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("error"));
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_process_exactly_once() {
    let backend = Arc::new(MockBackend::new("hello back", 5));
    let transport = Arc::new(RecordingTransport::default());
    let c = Arc::new(controller(
        backend.clone(),
        transport,
        Duration::from_secs(300),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let c = Arc::clone(&c);
        let msg = text_message("same-id", "hi");
        handles.push(tokio::spawn(async move { c.handle(&msg).await }));
    }
    for h in handles {
        assert!(h.await.unwrap().is_ok());
    }
    assert_eq!(backend.call_count(), 1);
}
