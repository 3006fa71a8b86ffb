//! Stream ingress HTTP server.
//!
//! The platform-facing transport (WebSocket stream SDK or an HTTP relay)
//! POSTs callback frames here; the response body carries the ack for that
//! delivery, so the platform sees the processing outcome synchronously and
//! redelivers on error or missing ack.

use crate::channels::{AckResult, ChatbotFrame, Delivery};
use crate::routing::ReplyRouteStore;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone)]
pub struct IngressState {
    pub deliveries: mpsc::Sender<Delivery>,
    pub routes: Arc<ReplyRouteStore>,
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/stream/callback", post(stream_callback))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn run_ingress(state: IngressState, bind: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding ingress on {}", addr))?;
    log::info!("stream ingress listening on {}", addr);
    axum::serve(listener, router(state))
        .await
        .context("ingress server stopped")
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "runtime": "running" }))
}

/// One platform delivery: parse, bind the reply route, hand to intake, and
/// answer with the ack frame once processing completes.
async fn stream_callback(
    State(state): State<IngressState>,
    Json(frame): Json<ChatbotFrame>,
) -> (StatusCode, Json<serde_json::Value>) {
    let webhook = frame.session_webhook.clone();
    let Some(message) = frame.into_inbound() else {
        // Nothing to process; a positive ack stops pointless redelivery.
        let ack = AckResult::ok("no processable content");
        return (StatusCode::OK, Json(crate::channels::dingtalk::ack_frame(&ack)));
    };
    if !webhook.is_empty() {
        state.routes.bind(message.conversation_id.clone(), webhook).await;
    }

    let (ack_tx, ack_rx) = oneshot::channel();
    let delivery = Delivery {
        message,
        ack: ack_tx,
    };
    if state.deliveries.send(delivery).await.is_err() {
        log::error!("intake loop is gone, rejecting delivery");
        let ack = AckResult::error("intake unavailable");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(crate::channels::dingtalk::ack_frame(&ack)),
        );
    }
    let ack = match ack_rx.await {
        Ok(ack) => ack,
        Err(_) => AckResult::error("processing task dropped before ack"),
    };
    let status = if ack.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(crate::channels::dingtalk::ack_frame(&ack)))
}
