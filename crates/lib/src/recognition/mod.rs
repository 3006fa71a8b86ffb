//! Voice recognition pipeline: ordered provider tiers with per-tier timeout.
//!
//! The platform-native transcript is tier one; hosted speech-to-text engines
//! follow. A tier that errors, times out, or returns a blank transcript is
//! skipped (never retried) and the next tier is tried. When every tier is
//! exhausted the result carries a diagnostic note and the caller must not
//! forward empty text downstream.

mod transcription_api;

pub use transcription_api::TranscriptionApiProvider;

use crate::channels::VoicePayload;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("recognition request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("recognition api error: {0}")]
    Api(String),
    #[error("no transcript available")]
    Unavailable,
}

/// One recognition tier in the fallback chain.
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, voice: &VoicePayload) -> Result<String, RecognitionError>;
}

/// Which tier produced the transcript (None = every tier exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionTier {
    Native,
    Fallback1,
    Fallback2,
    None,
}

impl RecognitionTier {
    fn from_index(i: usize) -> Self {
        match i {
            0 => RecognitionTier::Native,
            1 => RecognitionTier::Fallback1,
            _ => RecognitionTier::Fallback2,
        }
    }
}

/// Outcome of one pipeline run. Transient; never persisted.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub transcript: String,
    pub success: bool,
    pub tier: RecognitionTier,
    /// Diagnostic when the transcript is empty or every tier failed.
    pub note: Option<String>,
}

/// Ordered fallback chain of recognition providers.
pub struct RecognitionPipeline {
    providers: Vec<Arc<dyn RecognitionProvider>>,
    provider_timeout: Duration,
}

impl RecognitionPipeline {
    pub fn new(providers: Vec<Arc<dyn RecognitionProvider>>, provider_timeout: Duration) -> Self {
        Self {
            providers,
            provider_timeout,
        }
    }

    /// Try each tier in order. A blank transcript is a tier failure; empty
    /// text is never a valid recognition result.
    pub async fn recognize(&self, voice: &VoicePayload) -> RecognitionResult {
        for (i, provider) in self.providers.iter().enumerate() {
            let attempt = tokio::time::timeout(self.provider_timeout, provider.recognize(voice));
            match attempt.await {
                Err(_) => {
                    log::warn!("recognition tier {} timed out, skipping", provider.name());
                }
                Ok(Err(e)) => {
                    log::debug!("recognition tier {} failed: {}", provider.name(), e);
                }
                Ok(Ok(text)) => {
                    let text = text.trim();
                    if text.is_empty() {
                        log::debug!(
                            "recognition tier {} returned blank transcript, skipping",
                            provider.name()
                        );
                    } else {
                        log::info!("recognition succeeded at tier {}", provider.name());
                        return RecognitionResult {
                            transcript: text.to_string(),
                            success: true,
                            tier: RecognitionTier::from_index(i),
                            note: None,
                        };
                    }
                }
            }
        }
        RecognitionResult {
            transcript: String::new(),
            success: false,
            tier: RecognitionTier::None,
            note: Some(format!(
                "no usable transcript after {} tier(s)",
                self.providers.len()
            )),
        }
    }
}

/// Tier one: the transcript the platform attached to the voice event, if any.
pub struct NativeTranscriptProvider;

#[async_trait]
impl RecognitionProvider for NativeTranscriptProvider {
    fn name(&self) -> &str {
        "platform-native"
    }

    async fn recognize(&self, voice: &VoicePayload) -> Result<String, RecognitionError> {
        voice
            .transcript
            .clone()
            .ok_or(RecognitionError::Unavailable)
    }
}
