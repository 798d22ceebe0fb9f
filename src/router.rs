// ABOUTME: Routes inbound messages from all adapters through the dispatcher
// ABOUTME: and delivers winning replies, one spawned task per message.

use std::sync::Arc;

use anyhow::{Context, Result};
use quorum_core::{metrics, NormalizedMessage, ServiceAdapter};
use tokio_stream::{StreamExt, StreamMap};

use crate::dispatcher::{Dispatcher, Outcome};
use crate::runtime::RuntimeContext;
use crate::selftest::protocol;

/// Pulls from every adapter's event stream and hands each message to the
/// dispatcher on its own task, so one slow dispatch never blocks intake.
///
/// The router is also where the correlation tagging lives: a message arriving
/// as "TEST_QUESTION <id>: ..." is dispatched untagged, and the winning reply
/// goes out as "TEST_RESPONSE <id>: ..." so the self-test harness can match
/// it back to its question. Untagged traffic passes through unchanged.
pub struct MessageRouter {
    dispatcher: Dispatcher,
    runtime: Arc<RuntimeContext>,
    error_channel_id: Option<String>,
}

impl MessageRouter {
    pub fn new(
        dispatcher: Dispatcher,
        runtime: Arc<RuntimeContext>,
        error_channel_id: Option<String>,
    ) -> Self {
        Self {
            dispatcher,
            runtime,
            error_channel_id,
        }
    }

    /// Run until every adapter stream has ended.
    pub async fn run(self: Arc<Self>, adapters: Vec<Arc<dyn ServiceAdapter>>) -> Result<()> {
        anyhow::ensure!(!adapters.is_empty(), "no service adapters configured");

        let mut streams = StreamMap::new();
        for adapter in adapters {
            let service = adapter.service();
            self.runtime.register_adapter(Arc::clone(&adapter));
            let stream = adapter
                .event_stream()
                .await
                .with_context(|| format!("Failed to open event stream for {}", service))?;
            streams.insert(service, stream);
            tracing::info!(service = %service, "Adapter connected");
        }

        tracing::info!(adapters = streams.len(), "Message router running");
        while let Some((_, message)) = streams.next().await {
            let router = Arc::clone(&self);
            tokio::spawn(async move {
                router.handle_message(message).await;
            });
        }
        tracing::info!("All adapter streams ended, router stopping");
        Ok(())
    }

    /// Process one inbound message end to end.
    pub async fn handle_message(&self, mut message: NormalizedMessage) {
        self.runtime.note_message_seen();
        metrics::record_message_seen(message.service.as_str());
        let ctx = self.runtime.dispatch_context();

        let from_self = self
            .runtime
            .adapter(message.service)
            .map(|a| a.is_self(&message.author.id))
            .unwrap_or(false);

        // Normal mode ignores the bot's own messages; self-test mode inverts
        // the filter so tagged questions can round-trip through the backend.
        if ctx.is_self_test() {
            if !from_self {
                tracing::debug!(
                    message_id = %message.id,
                    author = %message.author.id,
                    "Ignoring non-self message during self-test"
                );
                return;
            }
        } else if from_self {
            return;
        }

        let question_tag = protocol::parse_question(&message.clean_text)
            .map(|(id, body)| (id, body.to_string()));
        if let Some((id, body)) = &question_tag {
            tracing::debug!(question_id = id, "Unwrapping tagged test question");
            message.clean_text = body.clone();
        }

        let outcome = self.dispatcher.dispatch(&message, &ctx).await;
        let Outcome::Responded {
            module,
            text,
            hints,
        } = outcome
        else {
            tracing::debug!(message_id = %message.id, "No module responded");
            return;
        };

        let out_text = match question_tag {
            Some((id, _)) => protocol::format_response(id, &text),
            None => text,
        };

        match self
            .runtime
            .send(message.service, &message.channel, &out_text, &hints)
            .await
        {
            Ok(_) => {
                self.runtime.note_response_sent();
                tracing::info!(
                    module = %module,
                    service = %message.service,
                    channel = %message.channel.id,
                    "Response delivered"
                );
            }
            Err(e) => {
                self.runtime.note_delivery_failed();
                metrics::record_delivery_failure(message.service.as_str());
                tracing::error!(
                    module = %module,
                    service = %message.service,
                    channel = %message.channel.id,
                    error = %e,
                    "Failed to deliver response"
                );
                self.notify_delivery_failure(&message, &e.to_string()).await;
            }
        }
    }

    /// Best-effort note to the error channel; a failure here is only logged.
    async fn notify_delivery_failure(&self, message: &NormalizedMessage, error: &str) {
        let Some(channel_id) = &self.error_channel_id else {
            return;
        };
        let note = format!(
            "Failed to deliver a response to channel {}: {}",
            message.channel.id, error
        );
        if let Err(e) = self
            .runtime
            .send(
                message.service,
                &quorum_core::ChannelRef::new(channel_id.clone()),
                &note,
                &quorum_core::FormattingHints::plain(),
            )
            .await
        {
            tracing::debug!(error = %e, "Error-channel notification also failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModuleRegistry;
    use anyhow::Result;
    use async_trait::async_trait;
    use quorum_core::{
        Author, Candidate, ChannelRef, ChatModule, Confidence, CoreError, DeliveryReceipt,
        DispatchContext, FormattingHints, MessageStream, Service,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    struct CapturingAdapter {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl CapturingAdapter {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ServiceAdapter for CapturingAdapter {
        fn service(&self) -> Service {
            Service::Http
        }

        async fn event_stream(&self) -> Result<MessageStream> {
            Ok(Box::pin(tokio_stream::empty()))
        }

        async fn send(
            &self,
            channel: &ChannelRef,
            text: &str,
            _hints: &FormattingHints,
        ) -> Result<DeliveryReceipt, CoreError> {
            self.sent
                .lock()
                .unwrap()
                .push((channel.id.clone(), text.to_string()));
            Ok(DeliveryReceipt::now(Service::Http, channel.id.clone()))
        }

        fn bot_user_id(&self) -> &str {
            "bot"
        }
    }

    struct EchoModule;

    #[async_trait]
    impl ChatModule for EchoModule {
        fn name(&self) -> &str {
            "echo"
        }

        async fn evaluate(
            &self,
            message: &NormalizedMessage,
            _ctx: &DispatchContext,
        ) -> Result<Candidate> {
            if message.clean_text.starts_with("say ") {
                Ok(Candidate::reply(
                    Confidence::MAX,
                    message.clean_text["say ".len()..].to_string(),
                    "echo",
                ))
            } else {
                Ok(Candidate::none())
            }
        }
    }

    fn router_with_adapter() -> (Arc<MessageRouter>, Arc<CapturingAdapter>) {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(EchoModule)).unwrap();
        let runtime = Arc::new(RuntimeContext::new());
        let adapter = Arc::new(CapturingAdapter::new());
        runtime.register_adapter(adapter.clone() as Arc<dyn ServiceAdapter>);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::clone(&runtime),
            Duration::from_secs(5),
        );
        let router = Arc::new(MessageRouter::new(dispatcher, runtime, None));
        (router, adapter)
    }

    fn message(author_id: &str, text: &str) -> NormalizedMessage {
        NormalizedMessage::builder(Service::Http)
            .id("evt")
            .raw_text(text)
            .author(Author::new(author_id, author_id))
            .channel(ChannelRef::new("C1"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_reply_is_delivered_to_origin_channel() {
        let (router, adapter) = router_with_adapter();
        router.handle_message(message("u1", "say hello")).await;
        assert_eq!(adapter.sent(), vec![("C1".to_string(), "hello".to_string())]);
    }

    #[tokio::test]
    async fn test_unanswered_message_sends_nothing() {
        let (router, adapter) = router_with_adapter();
        router.handle_message(message("u1", "irrelevant")).await;
        assert!(adapter.sent().is_empty());
    }

    #[tokio::test]
    async fn test_self_message_ignored_in_normal_mode() {
        let (router, adapter) = router_with_adapter();
        router.handle_message(message("bot", "say hello")).await;
        assert!(adapter.sent().is_empty());
    }

    #[tokio::test]
    async fn test_only_self_messages_processed_in_self_test_mode() {
        let (router, adapter) = router_with_adapter();
        let _guard = router.runtime.begin_self_test().unwrap();
        router.handle_message(message("u1", "say hello")).await;
        assert!(adapter.sent().is_empty());
        router.handle_message(message("bot", "say hello")).await;
        assert_eq!(adapter.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_tagged_question_gets_tagged_response() {
        let (router, adapter) = router_with_adapter();
        let _guard = router.runtime.begin_self_test().unwrap();
        router
            .handle_message(message("bot", "TEST_QUESTION 4: say pong"))
            .await;
        assert_eq!(
            adapter.sent(),
            vec![("C1".to_string(), "TEST_RESPONSE 4: pong".to_string())]
        );
    }

    #[tokio::test]
    async fn test_untagged_reply_stays_untagged() {
        let (router, adapter) = router_with_adapter();
        router.handle_message(message("u1", "say pong")).await;
        assert_eq!(adapter.sent()[0].1, "pong");
    }

    #[tokio::test]
    async fn test_counters_track_traffic() {
        let (router, _adapter) = router_with_adapter();
        router.handle_message(message("u1", "say hello")).await;
        router.handle_message(message("u1", "irrelevant")).await;
        let stats = router.runtime.stats();
        assert_eq!(stats.messages_seen, 2);
        assert_eq!(stats.responses_sent, 1);
    }
}
