// ABOUTME: Error taxonomy shared by the dispatcher, adapters, and harness.
// ABOUTME: Per-message faults stay contained; startup faults abort the process.

use thiserror::Error;

use crate::message::Service;

/// Contract-level failures of the quorum core.
///
/// `MalformedMessage`, `ModuleFault`, and `DeliveryFailed` are per-message
/// faults and never propagate past the dispatch boundary. `DuplicateModuleName`
/// and `MisconfiguredTestCase` are startup-fatal: the process refuses to start
/// rather than run with an inconsistent module set.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("module '{module}' faulted: {source}")]
    ModuleFault {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("delivery to {service} failed: {reason}")]
    DeliveryFailed { service: Service, reason: String },

    #[error("duplicate module name: {0}")]
    DuplicateModuleName(String),

    #[error("misconfigured test case in module '{module}': {reason}")]
    MisconfiguredTestCase { module: String, reason: String },

    #[error("a self-test run is already active")]
    SelfTestActive,

    #[error("self-test run exceeded its wall-clock ceiling")]
    SelfTestTimeout,
}

impl CoreError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    pub fn delivery(service: Service, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            service,
            reason: reason.into(),
        }
    }

    /// Whether this error must abort startup rather than be logged and dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateModuleName(_) | Self::MisconfiguredTestCase { .. }
        )
    }
}
