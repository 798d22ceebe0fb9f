// ABOUTME: Operator control routines: ping, stats, reboot. Fixed-phrase
// ABOUTME: commands matched against the cleaned message text.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use quorum_core::{
    Candidate, ChatModule, Confidence, DispatchContext, IntegrationTestCase, NormalizedMessage,
    Role,
};

use crate::runtime::RuntimeContext;

pub const MODULE_NAME: &str = "controls";

pub const PING_RESPONSE: &str = "I'm alive!";
pub const REBOOT_DENIED: &str = "You're not my supervisor!";
pub const REBOOT_ACK: &str = "Leaving this world behind, see you on the other side";

/// Answers operator housekeeping commands at full confidence.
///
/// Commands are bare lowercase words matched against the whole cleaned text,
/// so "ping" triggers and "pinging the server" does not.
pub struct ControlsModule {
    runtime: Arc<RuntimeContext>,
    control_channel_id: String,
    operator_ids: HashSet<String>,
    module_names: Vec<String>,
}

impl ControlsModule {
    pub fn new(
        runtime: Arc<RuntimeContext>,
        control_channel_id: impl Into<String>,
        operator_ids: HashSet<String>,
        module_names: Vec<String>,
    ) -> Self {
        Self {
            runtime,
            control_channel_id: control_channel_id.into(),
            operator_ids,
            module_names,
        }
    }

    fn is_operator(&self, message: &NormalizedMessage) -> bool {
        self.operator_ids.contains(&message.author.id)
            || message.author.has_role(Role::TRUSTED_OPERATOR)
    }

    fn stats_text(&self) -> String {
        let stats = self.runtime.stats();
        format!(
            "Uptime: {}s\nModules: {}\nMessages seen: {}\nResponses sent: {}\nModule faults: {}\nDeliveries failed: {}",
            self.runtime.uptime().as_secs(),
            self.module_names.join(", "),
            stats.messages_seen,
            stats.responses_sent,
            stats.module_faults,
            stats.deliveries_failed,
        )
    }
}

#[async_trait]
impl ChatModule for ControlsModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    async fn evaluate(
        &self,
        message: &NormalizedMessage,
        ctx: &DispatchContext,
    ) -> Result<Candidate> {
        let command = message.clean_text.trim().to_lowercase();
        match command.as_str() {
            "ping" => Ok(Candidate::reply(
                Confidence::MAX,
                PING_RESPONSE,
                "ping command",
            )),
            "stats" => Ok(Candidate::reply(
                Confidence::MAX,
                self.stats_text(),
                "stats command",
            )),
            "reboot" => {
                if message.channel.id != self.control_channel_id || !self.is_operator(message) {
                    return Ok(Candidate::reply(
                        Confidence::MAX,
                        REBOOT_DENIED,
                        format!("{} asked for a reboot without authorization", message.author.name),
                    ));
                }
                if ctx.is_self_test() {
                    // A test question must never take the process down.
                    return Ok(Candidate::reply(
                        Confidence::MAX,
                        REBOOT_ACK,
                        "reboot acknowledged during a self-test run",
                    ));
                }
                Ok(Candidate::deferred(
                    Confidence::MAX,
                    format!("{} asked for a reboot", message.author.name),
                    Box::pin(async {
                        tracing::warn!("Reboot requested by an operator, exiting");
                        std::process::exit(0)
                    }),
                ))
            }
            _ => Ok(Candidate::none()),
        }
    }

    fn test_cases(&self) -> Vec<IntegrationTestCase> {
        vec![
            IntegrationTestCase::exact("ping", PING_RESPONSE),
            IntegrationTestCase::matching("stats", r"Uptime: \d+s"),
            // The bot itself is not an operator, so this must be refused.
            IntegrationTestCase::exact("reboot", REBOOT_DENIED),
        ]
    }
}
