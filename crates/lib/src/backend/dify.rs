//! Dify chat-messages API client.
//! Supports blocking and streaming completion (SSE `data:` lines).

use crate::backend::{AgentBackend, BackendError};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    inputs: serde_json::Value,
    query: &'a str,
    response_mode: &'a str,
    user: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    answer: String,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    answer: String,
}

/// Client for the Dify HTTP API.
#[derive(Clone)]
pub struct DifyClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl DifyClient {
    pub fn new(
        base_url: Option<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url,
            api_key,
            client,
        }
    }

    fn request(&self, url: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    fn chat_body(&self, query: &str, user: &str, response_mode: &str) -> serde_json::Value {
        serde_json::to_value(ChatRequest {
            inputs: serde_json::json!({}),
            query,
            response_mode,
            user,
        })
        .unwrap_or_default()
    }

    /// GET /parameters — cheap credential/endpoint check.
    pub async fn ping(&self) -> Result<(), BackendError> {
        let url = format!("{}/parameters", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await.map_err(map_reqwest)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        Ok(())
    }
}

fn map_reqwest(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Request(e)
    }
}

#[async_trait]
impl AgentBackend for DifyClient {
    /// POST /chat-messages with response_mode "blocking".
    async fn chat(&self, text: &str, conversation_id: &str) -> Result<String, BackendError> {
        let url = format!("{}/chat-messages", self.base_url);
        let body = self.chat_body(text, conversation_id, "blocking");
        let res = self.request(&url, &body).send().await.map_err(map_reqwest)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        let data: ChatResponse = res.json().await.map_err(map_reqwest)?;
        Ok(data.answer)
    }

    /// POST /chat-messages with response_mode "streaming". Parses SSE
    /// `data: {...}` lines, calls on_chunk for each `message` answer delta,
    /// and returns the accumulated answer at `message_end`.
    async fn chat_stream(
        &self,
        text: &str,
        conversation_id: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, BackendError> {
        let url = format!("{}/chat-messages", self.base_url);
        let body = self.chat_body(text, conversation_id, "streaming");
        let res = self.request(&url, &body).send().await.map_err(map_reqwest)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} {}", status, body)));
        }
        let mut stream = res.bytes_stream();
        let mut buffer = Vec::new();
        let mut answer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest)?;
            buffer.extend_from_slice(&chunk);
            while let Some(i) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..i).collect();
                buffer.drain(..1);
                let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() {
                    continue;
                }
                let event: StreamEvent = match serde_json::from_str(payload) {
                    Ok(e) => e,
                    Err(_) => continue,
                };
                match event.event.as_str() {
                    "message" | "agent_message" => {
                        if !event.answer.is_empty() {
                            on_chunk(&event.answer);
                            answer.push_str(&event.answer);
                        }
                    }
                    "message_end" => return Ok(answer),
                    "error" => {
                        return Err(BackendError::Api(format!(
                            "stream error event: {}",
                            payload
                        )))
                    }
                    _ => {}
                }
            }
        }
        // Stream ended without an explicit message_end; return what we have.
        Ok(answer)
    }
}
