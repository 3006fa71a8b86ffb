//! Hosted speech-to-text provider (OpenAI-compatible `audio/transcriptions`).
//! Used as a fallback tier when the platform attaches no transcript.

use crate::channels::VoicePayload;
use crate::recognition::{RecognitionError, RecognitionProvider};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Client for an OpenAI-compatible transcription endpoint
/// (`POST {base}/audio/transcriptions`, multipart, bearer auth).
pub struct TranscriptionApiProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl TranscriptionApiProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RecognitionProvider for TranscriptionApiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recognize(&self, voice: &VoicePayload) -> Result<String, RecognitionError> {
        if voice.data.is_empty() {
            return Err(RecognitionError::Unavailable);
        }
        let url = format!("{}/audio/transcriptions", self.base_url);
        let file_name = format!("audio.{}", voice.format);
        let part = reqwest::multipart::Part::bytes(voice.data.clone()).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);
        let mut req = self.client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RecognitionError::Api(format!("{} {}", status, body)));
        }
        let data: TranscriptionResponse = res.json().await?;
        Ok(data.text)
    }
}
