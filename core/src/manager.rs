//! Public entry point for conversation operations
//!
//! [`ConversationManager`] ties the store, the navigator and the generation
//! coordinator together. Every structural change runs while the session table
//! is locked, so the busy check and the mutation it guards cannot interleave
//! with a generation starting or finishing. Lock order is always session
//! table first, then conversations.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::conversation::Direction;
use crate::conversation::Navigator;
use crate::conversation::PendingTurn;
use crate::error::Result;
use crate::generation::GenerationCoordinator;
use crate::generation::GenerationEvent;
use crate::generation::GenerationHandle;
use crate::generation::SessionTable;
use crate::models::Content;
use crate::models::Conversation;
use crate::models::ConversationSummary;
use crate::models::Message;
use crate::models::TITLE_MAX_CHARS;
use crate::provider::ContinuationRequest;
use crate::provider::ModelProvider;
use crate::store::ConversationStore;

/// Result of a send or an edit: the rebuilt timeline and the generation that
/// is filling its trailing placeholder.
pub struct Turn {
    pub conversation_id: Uuid,
    pub placeholder_id: Uuid,
    pub timeline: Vec<Message>,
    pub generation: GenerationHandle,
}

#[derive(Clone)]
pub struct ConversationManager {
    store: ConversationStore,
    coordinator: GenerationCoordinator,
    title_max_chars: usize,
}

impl ConversationManager {
    pub fn new(store: ConversationStore, provider: Arc<dyn ModelProvider>) -> Self {
        let coordinator = GenerationCoordinator::new(store.clone(), provider);
        Self {
            store,
            coordinator,
            title_max_chars: TITLE_MAX_CHARS,
        }
    }

    pub const fn with_title_max_chars(mut self, max_chars: usize) -> Self {
        self.title_max_chars = max_chars;
        self
    }

    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub async fn new_conversation(&self, title: Option<String>) -> Conversation {
        self.store.create(title).await
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.store.list().await
    }

    pub async fn conversation(&self, id: Uuid) -> Result<Conversation> {
        self.store.get(id).await
    }

    pub async fn most_recent(&self) -> Option<Conversation> {
        self.store.most_recent().await
    }

    /// Append a user message and start generating the reply.
    pub async fn send_message(&self, conversation_id: Uuid, content: Content) -> Result<Turn> {
        let mut sessions = self.coordinator.sessions().await;
        let busy = sessions.is_busy(conversation_id);
        let max_chars = self.title_max_chars;
        let (pending, timeline) = self
            .store
            .update(conversation_id, |conversation| {
                let pending = Navigator::new(conversation, busy)
                    .with_title_max_chars(max_chars)
                    .append(content)?;
                Ok((pending, conversation.messages.clone()))
            })
            .await?;
        self.start(&mut sessions, conversation_id, pending, timeline)
    }

    /// Fork the conversation at `message_id` with new content and generate a
    /// reply for the new version.
    pub async fn edit_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        content: Content,
    ) -> Result<Turn> {
        let mut sessions = self.coordinator.sessions().await;
        let busy = sessions.is_busy(conversation_id);
        let (pending, timeline) = self
            .store
            .update(conversation_id, |conversation| {
                let pending = Navigator::new(conversation, busy).fork(message_id, content)?;
                Ok((pending, conversation.messages.clone()))
            })
            .await?;
        self.start(&mut sessions, conversation_id, pending, timeline)
    }

    /// Show the neighbouring version of `message_id` and its continuation.
    /// Returns the rebuilt timeline.
    pub async fn switch_version(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        direction: Direction,
    ) -> Result<Vec<Message>> {
        let sessions = self.coordinator.sessions().await;
        let busy = sessions.is_busy(conversation_id);
        self.store
            .update(conversation_id, |conversation| {
                Navigator::new(conversation, busy).switch_version(message_id, direction)?;
                Ok(conversation.messages.clone())
            })
            .await
    }

    /// Delete a conversation. A generation still streaming into it is
    /// dropped when it next tries to write.
    pub async fn delete_conversation(&self, conversation_id: Uuid) -> Result<()> {
        self.store.delete(conversation_id).await
    }

    pub async fn clear_all(&self) {
        self.store.clear_all().await;
    }

    pub async fn is_generating(&self, conversation_id: Uuid) -> bool {
        self.coordinator.is_busy(conversation_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.coordinator.subscribe()
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }

    fn start(
        &self,
        sessions: &mut SessionTable,
        conversation_id: Uuid,
        pending: PendingTurn,
        timeline: Vec<Message>,
    ) -> Result<Turn> {
        let session = sessions.register(conversation_id, pending.placeholder_id)?;
        let request = ContinuationRequest::new(conversation_id, pending.history, pending.prompt);
        let generation = self.coordinator.spawn(conversation_id, session, request);
        Ok(Turn {
            conversation_id,
            placeholder_id: pending.placeholder_id,
            timeline,
            generation,
        })
    }
}
