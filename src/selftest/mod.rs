// ABOUTME: Self-test harness module: drives declared test questions through
// ABOUTME: the live dispatcher and backends, then scores the observed replies.

pub mod protocol;
pub mod session;
pub mod similarity;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use quorum_core::{
    metrics, Candidate, ChannelRef, ChatModule, Confidence, CoreError, DispatchContext,
    FormattingHints, IntegrationTestCase, NormalizedMessage, Role, Service,
};

use crate::runtime::RuntimeContext;
use session::{DispatchSession, PlannedCase, SessionReport};

pub const MODULE_NAME: &str = "selftest";

/// Clean-text phrases that trigger an integration run.
pub const TRIGGER_PHRASES: [&str; 2] = ["test yourself", "test modules"];

/// Reply to any trigger received while a run is already active.
pub const BUSY_MESSAGE: &str =
    "I am running my integration test right now and I cannot handle your request until I am finished";

/// Acknowledgement text for a recorded tagged response.
pub const LOGGED_RESPONSE_MESSAGE: &str = "LOGGED_TEST_RESPONSE";

pub const WRONG_CHANNEL_MESSAGE: &str = "Self-tests can only be run from the control channel";

pub fn not_operator_message(author_name: &str) -> String {
    format!("You are not a trusted operator, {}", author_name)
}

/// Timing and authorization knobs for the harness, taken from config.
#[derive(Debug, Clone)]
pub struct SelfTestSettings {
    pub control_channel_id: String,
    pub operator_ids: HashSet<String>,
    /// Settle window after the last question so replies can round-trip
    pub settle: Duration,
    /// Hard wall-clock ceiling for a whole run
    pub run_ceiling: Duration,
}

/// The harness itself, registered as an ordinary responder module.
///
/// It is the one module that makes the bot ask itself questions: while a run
/// is active the router accepts only self-authored messages, so every tagged
/// question loops back through a real adapter, gets dispatched normally, and
/// the tagged reply lands back here to be recorded.
pub struct SelfTestModule {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Arc<RuntimeContext>,
    settings: SelfTestSettings,
    plan: Vec<PlannedCase>,
    session: Mutex<Option<DispatchSession>>,
}

impl SelfTestModule {
    /// `plan` carries the declared test cases of every previously constructed
    /// module; the harness appends its own busy-reply cases.
    pub fn new(
        runtime: Arc<RuntimeContext>,
        settings: SelfTestSettings,
        mut plan: Vec<PlannedCase>,
    ) -> Self {
        for case in Self::own_test_cases() {
            plan.push(PlannedCase {
                module: MODULE_NAME.to_string(),
                case,
            });
        }
        Self {
            inner: Arc::new(Inner {
                runtime,
                settings,
                plan,
                session: Mutex::new(None),
            }),
        }
    }

    fn own_test_cases() -> Vec<IntegrationTestCase> {
        TRIGGER_PHRASES
            .iter()
            .map(|phrase| IntegrationTestCase::exact(*phrase, BUSY_MESSAGE))
            .collect()
    }

    fn is_trigger(text: &str) -> bool {
        let lowered = text.to_lowercase();
        TRIGGER_PHRASES.iter().any(|p| lowered.contains(p))
    }

    fn is_operator(&self, message: &NormalizedMessage) -> bool {
        self.inner.settings.operator_ids.contains(&message.author.id)
            || message.author.has_role(Role::TRUSTED_OPERATOR)
    }
}

#[async_trait]
impl ChatModule for SelfTestModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    async fn evaluate(
        &self,
        message: &NormalizedMessage,
        ctx: &DispatchContext,
    ) -> Result<Candidate> {
        // A tagged reply coming back through the backend: record it against
        // its originating question. Only meaningful while a run is active.
        if let Some((question_id, body)) = protocol::parse_response(&message.clean_text) {
            if !ctx.is_self_test() {
                return Ok(Candidate::none());
            }
            let inner = Arc::clone(&self.inner);
            let body = body.trim().to_string();
            return Ok(Candidate::deferred(
                Confidence::new(8),
                format!("recording the reply to test question {}", question_id),
                Box::pin(async move {
                    inner.record_response(question_id, body);
                    Ok(Some(LOGGED_RESPONSE_MESSAGE.to_string()))
                }),
            ));
        }

        if !Self::is_trigger(&message.clean_text) {
            return Ok(Candidate::none());
        }

        if ctx.is_self_test() {
            return Ok(Candidate::reply(
                Confidence::new(9),
                BUSY_MESSAGE,
                "a self-test run is already active",
            ));
        }

        if message.channel.id != self.inner.settings.control_channel_id {
            return Ok(Candidate::reply(
                Confidence::MAX,
                WRONG_CHANNEL_MESSAGE,
                format!(
                    "{} tried to start a self-test outside the control channel",
                    message.author.name
                ),
            ));
        }

        if !self.is_operator(message) {
            return Ok(Candidate::reply(
                Confidence::MAX,
                not_operator_message(&message.author.name),
                format!(
                    "{} tried to start a self-test without the trusted-operator capability",
                    message.author.name
                ),
            ));
        }

        let inner = Arc::clone(&self.inner);
        let service = message.service;
        let channel = message.channel.clone();
        Ok(Candidate::deferred(
            Confidence::MAX,
            format!("{} asked for an integration test run", message.author.name),
            Box::pin(async move { inner.run(service, channel).await }),
        ))
    }

    fn test_cases(&self) -> Vec<IntegrationTestCase> {
        Self::own_test_cases()
    }
}

impl Inner {
    fn record_response(&self, question_id: usize, body: String) {
        let mut session = self.session.lock().expect("session lock poisoned");
        match session.as_mut() {
            Some(session) => {
                if session.record_response(question_id, body) {
                    tracing::info!(question_id, "Recorded test response");
                } else {
                    tracing::warn!(question_id, "Test response for unknown question id");
                }
            }
            None => tracing::warn!(question_id, "Test response received with no active run"),
        }
    }

    /// Execute one full run: COLLECTING -> AWAITING -> SCORING -> REPORTING.
    ///
    /// The mode guard is held for the whole run and restores normal mode on
    /// every exit path, including the wall-clock ceiling being hit.
    async fn run(self: Arc<Self>, service: Service, channel: ChannelRef) -> Result<Option<String>> {
        let guard = match self.runtime.begin_self_test() {
            Ok(guard) => guard,
            // Lost the race to another trigger: refuse, leave the live run alone.
            Err(CoreError::SelfTestActive) => return Ok(Some(BUSY_MESSAGE.to_string())),
            Err(e) => return Err(e.into()),
        };

        if self.plan.is_empty() {
            tracing::warn!("No integration test cases declared, nothing to score");
            return Ok(Some(
                "No module declares any integration test cases; nothing to run".to_string(),
            ));
        }

        {
            let mut session = self.session.lock().expect("session lock poisoned");
            *session = Some(DispatchSession::from_plan(&self.plan));
        }
        tracing::info!(cases = self.plan.len(), "Self-test run starting");

        let collected = tokio::time::timeout(
            self.settings.run_ceiling,
            self.collect_and_settle(service, &channel),
        )
        .await;
        if collected.is_err() {
            tracing::warn!(
                ceiling = ?self.settings.run_ceiling,
                "{}",
                CoreError::SelfTestTimeout
            );
        }

        let report = self.score_and_report(service, &channel).await;
        drop(guard);

        metrics::record_self_test_score(report.ratio());
        tracing::info!(
            passed = report.passed,
            total = report.total,
            "Self-test run finished"
        );
        Ok(Some(report.summary_line()))
    }

    /// COLLECTING: send every planned question tagged with its correlation
    /// id, in strict id order, then AWAITING: sleep the settle window.
    async fn collect_and_settle(&self, service: Service, channel: &ChannelRef) {
        for (question_id, planned) in self.plan.iter().enumerate() {
            let tagged = protocol::format_question(question_id, &planned.case.question);
            {
                let mut session = self.session.lock().expect("session lock poisoned");
                if let Some(session) = session.as_mut() {
                    session.mark_sent(question_id);
                }
            }
            if let Err(e) = self
                .runtime
                .send(service, channel, &tagged, &FormattingHints::plain())
                .await
            {
                tracing::warn!(
                    question_id,
                    module = %planned.module,
                    error = %e,
                    "Failed to deliver test question"
                );
            }
            tokio::time::sleep(planned.case.wait).await;
        }
        tokio::time::sleep(self.settings.settle).await;
    }

    /// SCORING and REPORTING: close the session, score it, and send one
    /// status line per case plus the overall score to the control channel.
    async fn score_and_report(&self, service: Service, channel: &ChannelRef) -> SessionReport {
        let session = {
            let mut slot = self.session.lock().expect("session lock poisoned");
            slot.take()
        };
        let Some(mut session) = session else {
            return SessionReport { passed: 0, total: 0 };
        };

        let report = session.score();
        for entry in session.entries() {
            if let Err(e) = self
                .runtime
                .send(
                    service,
                    channel,
                    &entry.status_line(),
                    &FormattingHints::plain(),
                )
                .await
            {
                tracing::warn!(
                    question_id = entry.question_id,
                    error = %e,
                    "Failed to deliver test status line"
                );
            }
        }
        report
    }
}
