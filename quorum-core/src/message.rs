// ABOUTME: Backend-agnostic normalized message model shared by all services.
// ABOUTME: Built once by a service adapter at ingestion, immutable afterward.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Originating chat backend for a message.
///
/// Open for extension: adapters for new backends add variants here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Service {
    Discord,
    Slack,
    Http,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Discord => "discord",
            Service::Slack => "slack",
            Service::Http => "http",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability/role attached to a message author (e.g., "trusted-operator").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Role(pub String);

impl Role {
    /// Holders of this role may trigger self-test runs and control routines.
    pub const TRUSTED_OPERATOR: &'static str = "trusted-operator";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of a message author as reported by the originating backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Unique backend-assigned identifier (e.g., U12345678)
    pub id: String,
    /// Login/handle name
    pub name: String,
    /// Display name, if the backend distinguishes it
    pub display_name: Option<String>,
    /// Roles/capabilities held by the author
    pub roles: BTreeSet<Role>,
}

impl Author {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            display_name: None,
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(Role::new(role));
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }
}

/// Reference to the channel a message was sent in.
///
/// `name` is absent for direct messages; `server` is absent for backends
/// without a guild/workspace notion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: String,
    pub name: Option<String>,
    pub server: Option<String>,
}

impl ChannelRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            server: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            server: None,
        }
    }
}

/// Immutable, backend-agnostic representation of one inbound chat event.
///
/// Constructed exactly once by a service adapter via [`NormalizedMessageBuilder`];
/// the dispatcher and modules only ever borrow it. The core never persists it.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    /// Opaque backend-assigned event identifier
    pub id: String,
    /// Original content as the platform delivered it
    pub raw_text: String,
    /// Content with platform markup stripped
    pub clean_text: String,
    pub author: Author,
    pub channel: ChannelRef,
    pub service: Service,
    /// Users referenced by the message, in order of appearance
    pub mentions: Vec<Author>,
    /// Opaque per-service side-channel (e.g., Discord reaction payloads)
    pub extra: Option<serde_json::Value>,
}

impl NormalizedMessage {
    pub fn builder(service: Service) -> NormalizedMessageBuilder {
        NormalizedMessageBuilder::new(service)
    }

    /// Two messages belong to the same conversational thread iff both the
    /// service and the channel id match.
    pub fn same_thread(&self, other: &NormalizedMessage) -> bool {
        self.service == other.service && self.channel.id == other.channel.id
    }
}

/// Builder for [`NormalizedMessage`].
///
/// Construction fails with `MalformedMessage` when the author id or channel id
/// is missing, rather than producing a partially populated message.
pub struct NormalizedMessageBuilder {
    service: Service,
    id: String,
    raw_text: String,
    clean_text: Option<String>,
    author: Option<Author>,
    channel: Option<ChannelRef>,
    mentions: Vec<Author>,
    extra: Option<serde_json::Value>,
}

impl NormalizedMessageBuilder {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            id: String::new(),
            raw_text: String::new(),
            clean_text: None,
            author: None,
            channel: None,
            mentions: Vec::new(),
            extra: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn raw_text(mut self, text: impl Into<String>) -> Self {
        self.raw_text = text.into();
        self
    }

    /// Markup-stripped text. Defaults to the raw text when not set.
    pub fn clean_text(mut self, text: impl Into<String>) -> Self {
        self.clean_text = Some(text.into());
        self
    }

    pub fn author(mut self, author: Author) -> Self {
        self.author = Some(author);
        self
    }

    pub fn channel(mut self, channel: ChannelRef) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn mention(mut self, user: Author) -> Self {
        self.mentions.push(user);
        self
    }

    pub fn extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn build(self) -> Result<NormalizedMessage, CoreError> {
        let author = self
            .author
            .ok_or_else(|| CoreError::malformed("author is required"))?;
        if author.id.trim().is_empty() {
            return Err(CoreError::malformed("author id is empty"));
        }
        let channel = self
            .channel
            .ok_or_else(|| CoreError::malformed("channel is required"))?;
        if channel.id.trim().is_empty() {
            return Err(CoreError::malformed("channel id is empty"));
        }
        let clean_text = self.clean_text.unwrap_or_else(|| self.raw_text.clone());
        Ok(NormalizedMessage {
            id: self.id,
            raw_text: self.raw_text,
            clean_text,
            author,
            channel,
            service: self.service,
            mentions: self.mentions,
            extra: self.extra,
        })
    }
}
