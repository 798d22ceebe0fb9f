// ABOUTME: HTTP service adapter: an Axum server that turns POST /chat requests
// ABOUTME: into normalized messages and returns the bot's reply, if any.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{extract::State, routing::get, routing::post, Json, Router};
use quorum_core::{
    Author, ChannelRef, CoreError, DeliveryReceipt, FormattingHints, MessageStream,
    NormalizedMessage, Service, ServiceAdapter,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

const INBOUND_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 256;

/// How long a /chat request waits for a reply before returning empty-handed.
const REPLY_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default = "default_channel")]
    channel: String,
    user: String,
    #[serde(default)]
    user_name: Option<String>,
    text: String,
}

fn default_channel() -> String {
    "http".to_string()
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: Option<String>,
}

/// One message the bot sent through this adapter.
#[derive(Debug, Clone)]
struct OutboundEvent {
    channel_id: String,
    text: String,
}

/// Chat-over-HTTP backend.
///
/// Outbound sends are echoed back into the inbound stream as self-authored
/// messages, the way a chat room shows the bot its own posts. Normal-mode
/// routing drops those echoes; self-test mode depends on them to round-trip
/// its tagged questions through a real delivery path.
pub struct HttpAdapter {
    listen: String,
    bot_user_id: String,
    inbound_tx: mpsc::Sender<NormalizedMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<NormalizedMessage>>>,
    outbound_tx: broadcast::Sender<OutboundEvent>,
}

#[derive(Clone)]
struct AppState {
    inbound_tx: mpsc::Sender<NormalizedMessage>,
    outbound_tx: broadcast::Sender<OutboundEvent>,
}

impl HttpAdapter {
    pub fn new(listen: impl Into<String>, bot_user_id: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_BUFFER);
        Self {
            listen: listen.into(),
            bot_user_id: bot_user_id.into(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound_tx,
        }
    }

    /// Bind and serve until the process exits.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let state = AppState {
            inbound_tx: self.inbound_tx.clone(),
            outbound_tx: self.outbound_tx.clone(),
        };
        let app = Router::new()
            .route("/health", get(health))
            .route("/chat", post(chat))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.listen)
            .await
            .with_context(|| format!("Failed to bind HTTP adapter to {}", self.listen))?;
        tracing::info!(listen = %self.listen, "HTTP adapter listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Json<ChatResponse> {
    let message = match NormalizedMessage::builder(Service::Http)
        .id(uuid::Uuid::new_v4().to_string())
        .raw_text(req.text.clone())
        .author(match req.user_name {
            Some(name) => Author::new(req.user.clone(), name),
            None => Author::new(req.user.clone(), req.user.clone()),
        })
        .channel(ChannelRef::new(req.channel.clone()))
        .build()
    {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed chat request");
            return Json(ChatResponse { reply: None });
        }
    };

    // Subscribe before forwarding so the reply cannot race past us.
    let mut replies = state.outbound_tx.subscribe();
    if state.inbound_tx.send(message).await.is_err() {
        tracing::error!("Inbound channel closed, router is gone");
        return Json(ChatResponse { reply: None });
    }

    let reply = tokio::time::timeout(REPLY_WAIT, async {
        loop {
            match replies.recv().await {
                Ok(event) if event.channel_id == req.channel => break Some(event.text),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break None,
            }
        }
    })
    .await
    .unwrap_or(None);

    Json(ChatResponse { reply })
}

#[async_trait]
impl ServiceAdapter for HttpAdapter {
    fn service(&self) -> Service {
        Service::Http
    }

    async fn event_stream(&self) -> Result<MessageStream> {
        let rx = self
            .inbound_rx
            .lock()
            .expect("inbound receiver poisoned")
            .take()
            .context("HTTP adapter event stream already taken")?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn send(
        &self,
        channel: &ChannelRef,
        text: &str,
        _hints: &FormattingHints,
    ) -> Result<DeliveryReceipt, CoreError> {
        // Waiting /chat requests, if any. No subscribers is not a failure.
        let _ = self.outbound_tx.send(OutboundEvent {
            channel_id: channel.id.clone(),
            text: text.to_string(),
        });

        // Echo into the inbound stream as a self-authored message.
        let echo = NormalizedMessage::builder(Service::Http)
            .id(uuid::Uuid::new_v4().to_string())
            .raw_text(text)
            .author(Author::new(self.bot_user_id.clone(), self.bot_user_id.clone()))
            .channel(channel.clone())
            .build()
            .map_err(|e| CoreError::delivery(Service::Http, e.to_string()))?;
        self.inbound_tx
            .send(echo)
            .await
            .map_err(|_| CoreError::delivery(Service::Http, "inbound channel closed"))?;

        Ok(DeliveryReceipt::now(Service::Http, channel.id.clone()))
    }

    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }
}
