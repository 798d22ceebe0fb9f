// ABOUTME: Backend-agnostic core for the quorum chat assistant.
// ABOUTME: Message model, responder contract, adapter contract, error taxonomy.

pub mod adapter;
pub mod error;
pub mod message;
pub mod metrics;
pub mod module;

// Re-export the contract surface for convenient access
pub use adapter::{DeliveryReceipt, FormattingHints, MessageStream, ServiceAdapter};
pub use error::CoreError;
pub use message::{Author, ChannelRef, NormalizedMessage, NormalizedMessageBuilder, Role, Service};
pub use module::{
    Candidate, ChatModule, Confidence, DispatchContext, IntegrationTestCase, OperatingMode,
    ResponseCallback,
};
