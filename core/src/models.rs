//! Conversation data model
//!
//! A [`Conversation`] is a flat list of [`Message`]s: the active timeline.
//! Alternate futures live inside the [`VersionSet`] of each edited message, as
//! owned copies of the messages that followed each version.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::conversation::VersionSet;
use crate::error::ProviderErrorKind;

/// Title given to conversations that have no messages yet.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Number of characters of the first message used as the conversation title.
pub const TITLE_MAX_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Inline image sent along with a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    /// Base64 payload without a `data:` URL prefix.
    pub data: String,
}

/// Text plus optional image attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(text: impl Into<String>, images: Vec<ImageAttachment>) -> Self {
        Self {
            text: text.into(),
            images,
        }
    }

    /// True when there is neither non-blank text nor an attachment.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}

/// Source reference attached to a generated response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: Content,
    /// Set while a response is being streamed into this message.
    #[serde(default)]
    pub streaming: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Present when the generation that filled this message failed.
    #[serde(default)]
    pub error: Option<ProviderErrorKind>,
    #[serde(default)]
    pub versions: Option<VersionSet>,
}

impl Message {
    pub fn user(content: Content) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content,
            streaming: false,
            created_at: now,
            completed_at: Some(now),
            citations: Vec::new(),
            error: None,
            versions: None,
        }
    }

    /// Completed assistant message, mostly useful for seeding timelines.
    pub fn assistant(content: Content) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content,
            streaming: false,
            created_at: now,
            completed_at: Some(now),
            citations: Vec::new(),
            error: None,
            versions: None,
        }
    }

    /// Empty assistant message that a generation will stream into.
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: Content::default(),
            streaming: true,
            created_at: Utc::now(),
            completed_at: None,
            citations: Vec::new(),
            error: None,
            versions: None,
        }
    }

    /// Number of versions this message has; unedited messages have one.
    pub fn version_count(&self) -> usize {
        self.versions.as_ref().map_or(1, VersionSet::len)
    }

    /// Zero-based index of the displayed version.
    pub fn active_version(&self) -> usize {
        self.versions.as_ref().map_or(0, VersionSet::active_index)
    }

    /// Whether this message may be sent to a provider as history.
    pub fn is_history_eligible(&self) -> bool {
        !self.streaming && self.error.is_none() && !self.content.is_empty()
    }
}

/// Lightweight view of a conversation for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    /// The active timeline.
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn position(&self, message_id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    pub fn message(&self, message_id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            title: self.title.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Derive a conversation title from the text of its first message: its
/// first `max_chars` characters as written. Blank text gives no title.
pub fn title_from_text(text: &str, max_chars: usize) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        Some(format!("{head}..."))
    } else {
        Some(head)
    }
}
