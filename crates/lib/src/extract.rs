//! Content extraction: normalize an inbound message into one text payload.
//!
//! This is the single point where payload kind is resolved; downstream logic
//! (backend call, delivery) only ever sees trimmed non-empty text.

use crate::channels::{InboundMessage, Payload};
use crate::recognition::RecognitionPipeline;

/// Why extraction produced no usable text. All variants are degraded-service
/// outcomes, not platform-retryable failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("text payload was empty")]
    EmptyText,
    #[error("voice payload carried no audio")]
    EmptyVoice,
    #[error("recognition exhausted: {note}")]
    RecognitionExhausted { note: String },
}

pub struct ContentExtractor {
    pipeline: RecognitionPipeline,
}

impl ContentExtractor {
    pub fn new(pipeline: RecognitionPipeline) -> Self {
        Self { pipeline }
    }

    /// Normalize to trimmed text. Text payloads are trimmed and rejected when
    /// empty; voice payloads go through the recognition chain.
    pub async fn extract(&self, message: &InboundMessage) -> Result<String, ExtractError> {
        match &message.payload {
            Payload::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    Err(ExtractError::EmptyText)
                } else {
                    Ok(text.to_string())
                }
            }
            Payload::Voice(voice) => {
                if voice.data.is_empty() && voice.transcript.is_none() {
                    return Err(ExtractError::EmptyVoice);
                }
                let result = self.pipeline.recognize(voice).await;
                if result.success {
                    Ok(result.transcript)
                } else {
                    Err(ExtractError::RecognitionExhausted {
                        note: result
                            .note
                            .unwrap_or_else(|| "no tier produced usable text".to_string()),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::VoicePayload;
    use crate::recognition::{NativeTranscriptProvider, DEFAULT_PROVIDER_TIMEOUT};
    use chrono::Utc;
    use std::sync::Arc;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(RecognitionPipeline::new(
            vec![Arc::new(NativeTranscriptProvider)],
            DEFAULT_PROVIDER_TIMEOUT,
        ))
    }

    fn message(payload: Payload) -> InboundMessage {
        InboundMessage {
            message_id: Some("m1".to_string()),
            conversation_id: "conv".to_string(),
            sender_id: "u1".to_string(),
            payload,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trims_text_and_rejects_whitespace_only() {
        let e = extractor();
        let ok = e
            .extract(&message(Payload::Text("  hi there \n".to_string())))
            .await
            .unwrap();
        assert_eq!(ok, "hi there");

        let err = e
            .extract(&message(Payload::Text("   ".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::EmptyText));
    }

    #[tokio::test]
    async fn voice_without_audio_or_transcript_is_empty_voice() {
        let e = extractor();
        let err = e
            .extract(&message(Payload::Voice(VoicePayload {
                data: Vec::new(),
                format: "amr".to_string(),
                transcript: None,
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::EmptyVoice));
    }

    #[tokio::test]
    async fn voice_with_native_transcript_extracts() {
        let e = extractor();
        let ok = e
            .extract(&message(Payload::Voice(VoicePayload {
                data: vec![0; 8],
                format: "amr".to_string(),
                transcript: Some("spoken words".to_string()),
            })))
            .await
            .unwrap();
        assert_eq!(ok, "spoken words");
    }

    #[tokio::test]
    async fn voice_with_no_usable_tier_is_exhausted() {
        let e = extractor();
        let err = e
            .extract(&message(Payload::Voice(VoicePayload {
                data: vec![0; 8],
                format: "amr".to_string(),
                transcript: None,
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::RecognitionExhausted { .. }));
    }
}
