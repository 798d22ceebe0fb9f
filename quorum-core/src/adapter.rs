// ABOUTME: Service adapter contract: the boundary between a chat backend and
// ABOUTME: the normalized message model. The core calls, adapters implement.

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_stream::Stream;

use crate::error::CoreError;
use crate::message::{ChannelRef, NormalizedMessage, Service};

/// Boxed stream of normalized inbound messages from one adapter.
pub type MessageStream = Pin<Box<dyn Stream<Item = NormalizedMessage> + Send>>;

/// Opaque formatting pass-through for outbound messages.
///
/// The core never interprets these; adapters map them to platform affordances
/// (or ignore them).
#[derive(Debug, Clone, Default)]
pub struct FormattingHints {
    pub markdown: bool,
    pub extra: Option<serde_json::Value>,
}

impl FormattingHints {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn markdown() -> Self {
        Self {
            markdown: true,
            extra: None,
        }
    }
}

/// Proof that an adapter accepted an outbound message for delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub service: Service,
    pub channel_id: String,
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryReceipt {
    pub fn now(service: Service, channel_id: impl Into<String>) -> Self {
        Self {
            service,
            channel_id: channel_id.into(),
            delivered_at: Utc::now(),
        }
    }
}

/// Per-backend translator between a chat platform and the normalized model.
///
/// Inbound, the adapter converts raw platform events into
/// [`NormalizedMessage`]s, failing with `MalformedMessage` (dropped and
/// logged, never half-built) when required fields are missing. Outbound,
/// `send` fails with `DeliveryFailed` on transport errors; the core never
/// retries — retry policy, if any, belongs to the adapter.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn service(&self) -> Service;

    /// Normalized inbound messages as a stream.
    async fn event_stream(&self) -> Result<MessageStream>;

    /// Deliver text to a channel on this backend.
    async fn send(
        &self,
        channel: &ChannelRef,
        text: &str,
        hints: &FormattingHints,
    ) -> Result<DeliveryReceipt, CoreError>;

    /// The bot's own user id on this backend.
    fn bot_user_id(&self) -> &str;

    /// Whether an author id is the bot itself.
    fn is_self(&self, author_id: &str) -> bool {
        author_id == self.bot_user_id()
    }
}
