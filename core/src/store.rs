//! In-memory conversation store backed by a pluggable [`Persistence`]
//!
//! The store owns the ordered list of conversations (most recently created
//! first). Structural changes go through [`ConversationStore::update`], which
//! bumps `updated_at` and writes the whole list back out. Streaming deltas use
//! [`ConversationStore::apply_to_message`], which never touches the disk.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::error::RetconErr;
use crate::models::Conversation;
use crate::models::ConversationSummary;
use crate::models::Message;

/// Durable storage for the full conversation list.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self) -> Result<Vec<Conversation>>;

    /// Overwrite the stored list with `conversations`.
    async fn save(&self, conversations: &[Conversation]) -> Result<()>;
}

/// Volatile persistence for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemoryPersistence {
    saved: Mutex<Vec<Conversation>>,
    saves: AtomicUsize,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last list written by `save`.
    pub async fn snapshot(&self) -> Vec<Conversation> {
        self.saved.lock().await.clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Persistence for InMemoryPersistence {
    async fn load(&self) -> Result<Vec<Conversation>> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, conversations: &[Conversation]) -> Result<()> {
        *self.saved.lock().await = conversations.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ConversationStore {
    conversations: Arc<RwLock<Vec<Conversation>>>,
    persistence: Arc<dyn Persistence>,
}

impl ConversationStore {
    /// Load the stored conversations and wrap them in a store.
    pub async fn open(persistence: Arc<dyn Persistence>) -> Result<Self> {
        let conversations = persistence.load().await?;
        info!("Loaded {} conversations", conversations.len());
        Ok(Self {
            conversations: Arc::new(RwLock::new(conversations)),
            persistence,
        })
    }

    pub async fn list(&self) -> Vec<ConversationSummary> {
        self.conversations
            .read()
            .await
            .iter()
            .map(Conversation::summary)
            .collect()
    }

    /// Snapshot of one conversation.
    pub async fn get(&self, id: Uuid) -> Result<Conversation> {
        self.conversations
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(RetconErr::ConversationNotFound(id))
    }

    /// The conversation with the latest `updated_at`, if any.
    pub async fn most_recent(&self) -> Option<Conversation> {
        self.conversations
            .read()
            .await
            .iter()
            .max_by_key(|c| c.updated_at)
            .cloned()
    }

    /// Create an empty conversation at the front of the list.
    pub async fn create(&self, title: Option<String>) -> Conversation {
        let conversation = Conversation::new(title);
        let mut conversations = self.conversations.write().await;
        conversations.insert(0, conversation.clone());
        self.persist(&conversations).await;
        debug!(conversation = %conversation.id, "created conversation");
        conversation
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let index = conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or(RetconErr::ConversationNotFound(id))?;
        conversations.remove(index);
        self.persist(&conversations).await;
        info!(conversation = %id, "deleted conversation");
        Ok(())
    }

    pub async fn clear_all(&self) {
        let mut conversations = self.conversations.write().await;
        let removed = conversations.len();
        conversations.clear();
        self.persist(&conversations).await;
        info!("Cleared {removed} conversations");
    }

    /// Run a structural mutation on one conversation and persist the result.
    ///
    /// When `f` fails nothing is saved and `updated_at` is left alone; `f` is
    /// expected to leave the conversation untouched in that case.
    pub async fn update<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Conversation) -> Result<T>,
    ) -> Result<T> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(RetconErr::ConversationNotFound(id))?;
        let value = f(conversation)?;
        conversation.touch();
        self.persist(&conversations).await;
        Ok(value)
    }

    /// Mutate one message in place without saving. Returns `false` when the
    /// conversation or the message is gone.
    pub async fn apply_to_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        f: impl FnOnce(&mut Message),
    ) -> bool {
        let mut conversations = self.conversations.write().await;
        let Some(message) = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .and_then(|c| c.message_mut(message_id))
        else {
            return false;
        };
        f(message);
        true
    }

    /// Like [`Self::apply_to_message`], then bump `updated_at` and save.
    pub async fn finalize_message(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        f: impl FnOnce(&mut Message),
    ) -> bool {
        let mut conversations = self.conversations.write().await;
        let Some(conversation) = conversations.iter_mut().find(|c| c.id == conversation_id)
        else {
            return false;
        };
        let Some(message) = conversation.message_mut(message_id) else {
            return false;
        };
        f(message);
        conversation.touch();
        self.persist(&conversations).await;
        true
    }

    /// Save the current state, reporting failures to the caller.
    pub async fn flush(&self) -> Result<()> {
        let conversations = self.conversations.read().await;
        self.persistence.save(&conversations).await
    }

    async fn persist(&self, conversations: &[Conversation]) {
        if let Err(e) = self.persistence.save(conversations).await {
            error!("Failed to persist conversations: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Content;
    use pretty_assertions::assert_eq;

    struct FailingPersistence;

    #[async_trait::async_trait]
    impl Persistence for FailingPersistence {
        async fn load(&self) -> Result<Vec<Conversation>> {
            Ok(Vec::new())
        }

        async fn save(&self, _conversations: &[Conversation]) -> Result<()> {
            Err(RetconErr::Persistence("disk full".to_string()))
        }
    }

    async fn store_with_memory() -> (ConversationStore, Arc<InMemoryPersistence>) {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = ConversationStore::open(persistence.clone()).await.unwrap();
        (store, persistence)
    }

    #[tokio::test]
    async fn create_inserts_at_front_and_saves() {
        let (store, persistence) = store_with_memory().await;
        let first = store.create(None).await;
        let second = store.create(Some("Second".to_string())).await;

        let ids: Vec<_> = store.list().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(persistence.save_count(), 2);
        assert_eq!(persistence.snapshot().await.len(), 2);
        assert_eq!(store.get(first.id).await.unwrap().title, "New Chat");
    }

    #[tokio::test]
    async fn update_failure_skips_save() {
        let (store, persistence) = store_with_memory().await;
        let conversation = store.create(None).await;
        let saves = persistence.save_count();

        let result: Result<()> = store
            .update(conversation.id, |_| {
                Err(RetconErr::InvalidInput("nope".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(persistence.save_count(), saves);
        assert_eq!(
            store.get(conversation.id).await.unwrap().updated_at,
            conversation.updated_at
        );
    }

    #[tokio::test]
    async fn apply_to_message_does_not_save() {
        let (store, persistence) = store_with_memory().await;
        let conversation = store.create(None).await;
        let message = Message::placeholder();
        let message_id = message.id;
        store
            .update(conversation.id, |c| {
                c.messages.push(message);
                Ok(())
            })
            .await
            .unwrap();
        let saves = persistence.save_count();

        assert!(
            store
                .apply_to_message(conversation.id, message_id, |m| m.content.text.push_str("hi"))
                .await
        );
        assert_eq!(persistence.save_count(), saves);
        assert!(
            !store
                .apply_to_message(conversation.id, Uuid::new_v4(), |_| {})
                .await
        );

        assert!(
            store
                .finalize_message(conversation.id, message_id, |m| m.streaming = false)
                .await
        );
        assert_eq!(persistence.save_count(), saves + 1);
        let saved = persistence.snapshot().await;
        assert_eq!(saved[0].messages[0].content, Content::text("hi"));
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let (store, _persistence) = store_with_memory().await;
        let a = store.create(None).await;
        store.create(None).await;

        store.delete(a.id).await.unwrap();
        assert!(store.get(a.id).await.unwrap_err().is_not_found());
        assert!(store.delete(a.id).await.unwrap_err().is_not_found());

        store.clear_all().await;
        assert!(store.list().await.is_empty());
        assert!(store.most_recent().await.is_none());
    }

    #[tokio::test]
    async fn save_failures_are_logged_not_returned() {
        let store = ConversationStore::open(Arc::new(FailingPersistence))
            .await
            .unwrap();
        let conversation = store.create(None).await;
        store
            .update(conversation.id, |c| {
                c.title = "Renamed".to_string();
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(store.get(conversation.id).await.unwrap().title, "Renamed");
        assert!(matches!(
            store.flush().await,
            Err(RetconErr::Persistence(_))
        ));
    }
}
