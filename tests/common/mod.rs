// ABOUTME: Shared test fixtures: an in-memory loopback adapter that echoes
// ABOUTME: outbound sends back as self-authored inbound messages.

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quorum_core::{
    Author, ChannelRef, CoreError, DeliveryReceipt, FormattingHints, MessageStream,
    NormalizedMessage, Service, ServiceAdapter,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// In-memory chat room: everything the bot sends is recorded and fed back
/// into the inbound stream as a self-authored message, the way a real chat
/// backend shows the bot its own posts.
pub struct LoopbackAdapter {
    bot_user_id: String,
    inbound_tx: mpsc::Sender<NormalizedMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<NormalizedMessage>>>,
    sent: Mutex<Vec<String>>,
}

impl LoopbackAdapter {
    pub fn new(bot_user_id: &str) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        Self {
            bot_user_id: bot_user_id.to_string(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Push a message into the inbound stream as if a user typed it.
    pub async fn inject(&self, message: NormalizedMessage) {
        self.inbound_tx
            .send(message)
            .await
            .expect("inbound channel closed");
    }

    /// Everything the bot has sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceAdapter for LoopbackAdapter {
    fn service(&self) -> Service {
        Service::Http
    }

    async fn event_stream(&self) -> Result<MessageStream> {
        let rx = self
            .inbound_rx
            .lock()
            .unwrap()
            .take()
            .context("event stream already taken")?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn send(
        &self,
        channel: &ChannelRef,
        text: &str,
        _hints: &FormattingHints,
    ) -> Result<DeliveryReceipt, CoreError> {
        self.sent.lock().unwrap().push(text.to_string());
        let echo = NormalizedMessage::builder(Service::Http)
            .id(uuid::Uuid::new_v4().to_string())
            .raw_text(text)
            .author(Author::new(
                self.bot_user_id.clone(),
                self.bot_user_id.clone(),
            ))
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

/// Build a message from a named user in a channel.
pub fn user_message(user_id: &str, user_name: &str, channel: &str, text: &str) -> NormalizedMessage {
    NormalizedMessage::builder(Service::Http)
        .id(uuid::Uuid::new_v4().to_string())
        .raw_text(text)
        .author(Author::new(user_id, user_name))
        .channel(ChannelRef::new(channel))
        .build()
        .expect("valid test message")
}

/// Poll the adapter until some sent message satisfies the predicate.
/// Panics with a dump of the transcript if it never does.
pub async fn wait_for_sent(
    adapter: &LoopbackAdapter,
    what: &str,
    predicate: impl Fn(&str) -> bool,
) {
    for _ in 0..4000 {
        if adapter.sent().iter().any(|s| predicate(s)) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!(
        "never observed {:?}; transcript so far: {:#?}",
        what,
        adapter.sent()
    );
}
