//! Timeline navigation: append, fork and version switching
//!
//! The navigator is the only code that changes the structure of a
//! conversation. Each operation validates all of its preconditions before it
//! touches anything, so a refused request leaves the conversation unchanged.

use tracing::debug;
use uuid::Uuid;

use super::ledger::Direction;
use super::ledger::VersionSet;
use crate::error::Result;
use crate::error::RetconErr;
use crate::models::Content;
use crate::models::Conversation;
use crate::models::Message;
use crate::models::Role;
use crate::models::TITLE_MAX_CHARS;
use crate::models::title_from_text;

/// A user turn waiting for its assistant response.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTurn {
    /// Assistant message the response will be streamed into.
    pub placeholder_id: Uuid,
    /// Messages preceding the prompt, in timeline order.
    pub history: Vec<Message>,
    /// Content of the user message being answered.
    pub prompt: Content,
}

/// Mutates one conversation's timeline and version ledger.
pub struct Navigator<'a> {
    conversation: &'a mut Conversation,
    generation_in_flight: bool,
    title_max_chars: usize,
}

impl<'a> Navigator<'a> {
    /// `generation_in_flight` must reflect the coordinator's session table for
    /// this conversation at the time of the call.
    pub const fn new(conversation: &'a mut Conversation, generation_in_flight: bool) -> Self {
        Self {
            conversation,
            generation_in_flight,
            title_max_chars: TITLE_MAX_CHARS,
        }
    }

    pub const fn with_title_max_chars(mut self, max_chars: usize) -> Self {
        self.title_max_chars = max_chars;
        self
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.generation_in_flight {
            return Err(RetconErr::Busy(self.conversation.id));
        }
        Ok(())
    }

    /// Append a new user message followed by an assistant placeholder.
    pub fn append(&mut self, content: Content) -> Result<PendingTurn> {
        self.ensure_idle()?;
        if content.is_empty() {
            return Err(RetconErr::InvalidInput(
                "message needs text or at least one image".to_string(),
            ));
        }

        if self.conversation.messages.is_empty()
            && let Some(title) = title_from_text(&content.text, self.title_max_chars)
        {
            self.conversation.title = title;
        }

        let history = self.conversation.messages.clone();
        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id;
        self.conversation.messages.push(Message::user(content.clone()));
        self.conversation.messages.push(placeholder);

        debug!(
            conversation = %self.conversation.id,
            placeholder = %placeholder_id,
            "appended user turn"
        );
        Ok(PendingTurn {
            placeholder_id,
            history,
            prompt: content,
        })
    }

    /// Replace the content of an earlier user message with `new_content`,
    /// stashing everything after it under the version being replaced.
    pub fn fork(&mut self, message_id: Uuid, new_content: Content) -> Result<PendingTurn> {
        let index = self
            .conversation
            .position(message_id)
            .ok_or(RetconErr::MessageNotFound(message_id))?;
        if self.conversation.messages[index].role != Role::User {
            return Err(RetconErr::InvalidInput(
                "only user messages can be edited".to_string(),
            ));
        }
        self.ensure_idle()?;
        if new_content.is_empty() {
            return Err(RetconErr::InvalidInput(
                "edited message needs text or at least one image".to_string(),
            ));
        }

        let continuation = self.conversation.messages.split_off(index + 1);
        let history = self.conversation.messages[..index].to_vec();

        let message = &mut self.conversation.messages[index];
        let mut versions = match message.versions.take() {
            Some(versions) => versions,
            None => VersionSet::seed(message.content.clone(), message.created_at),
        };
        versions.stash_active(continuation);
        let active = versions.push_active(new_content.clone());
        message.versions = Some(versions);
        message.content = new_content.clone();

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id;
        self.conversation.messages.push(placeholder);

        debug!(
            conversation = %self.conversation.id,
            message = %message_id,
            version = active,
            "forked timeline"
        );
        Ok(PendingTurn {
            placeholder_id,
            history,
            prompt: new_content,
        })
    }

    /// Move one version back or forward on `message_id` and restore the
    /// continuation that belongs to the target version.
    pub fn switch_version(&mut self, message_id: Uuid, direction: Direction) -> Result<()> {
        let index = self
            .conversation
            .position(message_id)
            .ok_or(RetconErr::MessageNotFound(message_id))?;
        self.ensure_idle()?;
        let target = match &self.conversation.messages[index].versions {
            Some(versions) => versions.step(direction)?,
            None => {
                return Err(RetconErr::OutOfRange {
                    index: direction.offset(),
                    len: 1,
                });
            }
        };

        let current = self.conversation.messages.split_off(index + 1);
        let message = &mut self.conversation.messages[index];
        let mut restored = Vec::new();
        if let Some(versions) = message.versions.as_mut() {
            versions.stash_active(current);
            // `step` already validated the target.
            restored = versions.activate(target)?;
            message.content = versions.active().content.clone();
        }
        self.conversation.messages.extend(restored);

        debug!(
            conversation = %self.conversation.id,
            message = %message_id,
            version = target,
            "switched version"
        );
        Ok(())
    }
}
