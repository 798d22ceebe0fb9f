// ABOUTME: Responder module contract: cheap confidence-scored evaluation plus
// ABOUTME: deferred winner-only callbacks and statically declared test cases.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::CoreError;
use crate::message::NormalizedMessage;

/// Confidence that a module should answer a message, on a 0..=10 scale.
///
/// 0 means "cannot answer"; 10 means "certain, should pre-empt all others".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Confidence(u8);

impl Confidence {
    pub const NONE: Confidence = Confidence(0);
    pub const MAX: Confidence = Confidence(10);

    /// Values above 10 are clamped to 10.
    pub fn new(value: u8) -> Self {
        Self(value.min(10))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deferred response computation, invoked only for the winning candidate.
///
/// Bound with its arguments at evaluation time so expensive work (API calls,
/// database lookups) never penalizes non-winning modules. A `Some` return
/// overrides the candidate's text.
pub type ResponseCallback = BoxFuture<'static, Result<Option<String>>>;

/// The result of one module's evaluation of one message.
pub struct Candidate {
    pub confidence: Confidence,
    /// Response text; always empty when confidence is 0.
    pub text: String,
    /// Free-text rationale, for logs only — never user-facing.
    pub why: String,
    pub callback: Option<ResponseCallback>,
}

impl Candidate {
    /// "Cannot answer." No text, no side effects.
    pub fn none() -> Self {
        Self {
            confidence: Confidence::NONE,
            text: String::new(),
            why: String::new(),
            callback: None,
        }
    }

    /// An immediate text reply at the given confidence.
    ///
    /// A zero confidence degenerates to [`Candidate::none`], keeping the
    /// "empty text at confidence 0" invariant intact.
    pub fn reply(
        confidence: Confidence,
        text: impl Into<String>,
        why: impl Into<String>,
    ) -> Self {
        if confidence.is_none() {
            return Self::none();
        }
        Self {
            confidence,
            text: text.into(),
            why: why.into(),
            callback: None,
        }
    }

    /// A candidate whose text is produced by a winner-only callback.
    pub fn deferred(
        confidence: Confidence,
        why: impl Into<String>,
        callback: ResponseCallback,
    ) -> Self {
        if confidence.is_none() {
            return Self::none();
        }
        Self {
            confidence,
            text: String::new(),
            why: why.into(),
            callback: Some(callback),
        }
    }

    pub fn is_none(&self) -> bool {
        self.confidence.is_none()
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("confidence", &self.confidence)
            .field("text", &self.text)
            .field("why", &self.why)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Process-wide operating mode.
///
/// In `SelfTest` the bot's own messages become valid inputs to itself, so a
/// test question can round-trip through a real backend and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Normal,
    SelfTest,
}

/// The narrow runtime capability modules see during evaluation.
///
/// Modules get a mode snapshot instead of ambient global state; they hold no
/// back-reference to the registry.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub mode: OperatingMode,
}

impl DispatchContext {
    pub fn normal() -> Self {
        Self {
            mode: OperatingMode::Normal,
        }
    }

    pub fn self_test() -> Self {
        Self {
            mode: OperatingMode::SelfTest,
        }
    }

    pub fn is_self_test(&self) -> bool {
        self.mode == OperatingMode::SelfTest
    }
}

/// One integration test a module declares against itself.
///
/// Consumed only by the self-test harness, which sends `question` through a
/// real backend and scores the observed reply against the expectation.
#[derive(Debug, Clone)]
pub struct IntegrationTestCase {
    pub question: String,
    pub expected_response: String,
    /// When set, a regex match on the received text wins over text comparison.
    pub expected_regex: Option<String>,
    /// In (0, 1]; exactly 1.0 requires an exact (whitespace-trimmed) match.
    pub minimum_allowed_similarity: f64,
    /// How long the harness waits after sending this question.
    pub wait: Duration,
}

impl IntegrationTestCase {
    pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);

    /// A case requiring an exact (whitespace-trimmed) reply.
    pub fn exact(question: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            expected_response: expected.into(),
            expected_regex: None,
            minimum_allowed_similarity: 1.0,
            wait: Self::DEFAULT_WAIT,
        }
    }

    /// A case scored by normalized string similarity against `expected`.
    pub fn fuzzy(
        question: impl Into<String>,
        expected: impl Into<String>,
        minimum_allowed_similarity: f64,
    ) -> Self {
        Self {
            question: question.into(),
            expected_response: expected.into(),
            expected_regex: None,
            minimum_allowed_similarity,
            wait: Self::DEFAULT_WAIT,
        }
    }

    /// A case scored by a regex match on the received text.
    pub fn matching(question: impl Into<String>, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        Self {
            question: question.into(),
            expected_response: format!("RegEx: {}", pattern),
            expected_regex: Some(pattern),
            minimum_allowed_similarity: 1.0,
            wait: Self::DEFAULT_WAIT,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Validate this case at startup. Invalid declarations are fatal.
    pub fn validate(&self, module: &str) -> Result<(), CoreError> {
        if self.question.trim().is_empty() {
            return Err(CoreError::MisconfiguredTestCase {
                module: module.to_string(),
                reason: "question is empty".to_string(),
            });
        }
        if !(self.minimum_allowed_similarity > 0.0 && self.minimum_allowed_similarity <= 1.0) {
            return Err(CoreError::MisconfiguredTestCase {
                module: module.to_string(),
                reason: format!(
                    "minimum_allowed_similarity must be in (0, 1], got {}",
                    self.minimum_allowed_similarity
                ),
            });
        }
        if let Some(pattern) = &self.expected_regex {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(CoreError::MisconfiguredTestCase {
                    module: module.to_string(),
                    reason: format!("expectation regex does not compile: {}", e),
                });
            }
        }
        Ok(())
    }
}

/// A registered responder.
///
/// `evaluate` is a cheap, side-effect-free predicate: it must return promptly
/// and leave expensive work to the candidate's callback. An `Err` from
/// `evaluate` is treated by the dispatcher as confidence 0 for this module
/// only, recorded for observability, and never propagated to other modules.
#[async_trait]
pub trait ChatModule: Send + Sync {
    /// Stable name, used as the registry key.
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        message: &NormalizedMessage,
        ctx: &DispatchContext,
    ) -> Result<Candidate>;

    /// Integration tests this module declares against itself.
    fn test_cases(&self) -> Vec<IntegrationTestCase> {
        Vec::new()
    }
}
