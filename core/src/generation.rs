//! Streaming generation coordinator
//!
//! Each send or edit registers a [`GenerationSession`] for its conversation and
//! spawns a task that streams the provider's response into the assistant
//! placeholder. At most one session exists per conversation; the table is the
//! source of truth for "busy".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::error::ProviderErrorKind;
use crate::error::Result;
use crate::error::RetconErr;
use crate::provider::ContinuationRequest;
use crate::provider::ModelProvider;
use crate::provider::ResponseEvent;
use crate::store::ConversationStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An in-flight generation for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSession {
    pub session_id: Uuid,
    pub placeholder_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Conversation id to in-flight session.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<Uuid, GenerationSession>,
}

impl SessionTable {
    pub fn is_busy(&self, conversation_id: Uuid) -> bool {
        self.sessions.contains_key(&conversation_id)
    }

    pub fn get(&self, conversation_id: Uuid) -> Option<&GenerationSession> {
        self.sessions.get(&conversation_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn register(
        &mut self,
        conversation_id: Uuid,
        placeholder_id: Uuid,
    ) -> Result<GenerationSession> {
        if self.is_busy(conversation_id) {
            return Err(RetconErr::Busy(conversation_id));
        }
        let session = GenerationSession {
            session_id: Uuid::new_v4(),
            placeholder_id,
            started_at: Utc::now(),
        };
        self.sessions.insert(conversation_id, session);
        Ok(session)
    }

    /// Remove the session only if it is still `session_id`.
    pub fn release(&mut self, conversation_id: Uuid, session_id: Uuid) -> bool {
        match self.sessions.get(&conversation_id) {
            Some(current) if current.session_id == session_id => {
                self.sessions.remove(&conversation_id);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEventKind {
    Delta(String),
    /// Number of citations added by one batch.
    Citations(usize),
    Completed,
    Failed(ProviderErrorKind),
}

/// Progress notification for subscribers such as a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationEvent {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub kind: GenerationEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    /// The error message was written into the placeholder.
    Failed(ProviderErrorKind),
    /// The conversation or placeholder disappeared while streaming.
    Discarded,
}

/// Handle to a spawned generation task.
pub struct GenerationHandle {
    pub conversation_id: Uuid,
    pub placeholder_id: Uuid,
    pub session_id: Uuid,
    task: JoinHandle<GenerationOutcome>,
}

impl GenerationHandle {
    /// Wait for the response to be fully applied and the session released.
    pub async fn wait(self) -> Result<GenerationOutcome> {
        Ok(self.task.await?)
    }
}

/// Drives provider streams into placeholder messages.
#[derive(Clone)]
pub struct GenerationCoordinator {
    sessions: Arc<Mutex<SessionTable>>,
    provider: Arc<dyn ModelProvider>,
    store: ConversationStore,
    events: broadcast::Sender<GenerationEvent>,
}

impl GenerationCoordinator {
    pub fn new(store: ConversationStore, provider: Arc<dyn ModelProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: Arc::new(Mutex::new(SessionTable::default())),
            provider,
            store,
            events,
        }
    }

    /// Lock the session table. Callers that mutate a conversation based on
    /// its busy state must hold this guard across the check and the mutation.
    pub async fn sessions(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions.lock().await
    }

    pub async fn is_busy(&self, conversation_id: Uuid) -> bool {
        self.sessions.lock().await.is_busy(conversation_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.events.subscribe()
    }

    /// Start streaming into the placeholder of an already registered session.
    pub fn spawn(
        &self,
        conversation_id: Uuid,
        session: GenerationSession,
        request: ContinuationRequest,
    ) -> GenerationHandle {
        let coordinator = self.clone();
        let task =
            tokio::spawn(async move { coordinator.run(conversation_id, session, request).await });
        GenerationHandle {
            conversation_id,
            placeholder_id: session.placeholder_id,
            session_id: session.session_id,
            task,
        }
    }

    async fn run(
        self,
        conversation_id: Uuid,
        session: GenerationSession,
        request: ContinuationRequest,
    ) -> GenerationOutcome {
        let message_id = session.placeholder_id;
        debug!(
            conversation = %conversation_id,
            provider = %self.provider.name(),
            "generation started"
        );

        let outcome = match self.stream_into(conversation_id, message_id, request).await {
            Ok(true) => self.complete(conversation_id, message_id).await,
            Ok(false) => GenerationOutcome::Discarded,
            Err(err) => self.fail(conversation_id, message_id, err).await,
        };
        if outcome == GenerationOutcome::Discarded {
            debug!(
                conversation = %conversation_id,
                message = %message_id,
                "placeholder gone; dropping late response"
            );
        }

        self.sessions
            .lock()
            .await
            .release(conversation_id, session.session_id);
        outcome
    }

    /// Apply events until the stream ends. `Ok(false)` means the target
    /// message no longer exists.
    async fn stream_into(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        request: ContinuationRequest,
    ) -> std::result::Result<bool, ProviderError> {
        let mut stream = self.provider.request_continuation(request).await?;
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::OutputTextDelta(delta) => {
                    let applied = self
                        .store
                        .apply_to_message(conversation_id, message_id, |m| {
                            m.content.text.push_str(&delta);
                        })
                        .await;
                    if !applied {
                        return Ok(false);
                    }
                    self.publish(conversation_id, message_id, GenerationEventKind::Delta(delta));
                }
                ResponseEvent::Citations(citations) => {
                    let count = citations.len();
                    let applied = self
                        .store
                        .apply_to_message(conversation_id, message_id, |m| {
                            m.citations.extend(citations);
                        })
                        .await;
                    if !applied {
                        return Ok(false);
                    }
                    self.publish(
                        conversation_id,
                        message_id,
                        GenerationEventKind::Citations(count),
                    );
                }
                ResponseEvent::Completed => break,
            }
        }
        Ok(true)
    }

    async fn complete(&self, conversation_id: Uuid, message_id: Uuid) -> GenerationOutcome {
        let finalized = self
            .store
            .finalize_message(conversation_id, message_id, |m| {
                m.streaming = false;
                m.completed_at = Some(Utc::now());
            })
            .await;
        if !finalized {
            return GenerationOutcome::Discarded;
        }
        info!(conversation = %conversation_id, "generation completed");
        self.publish(conversation_id, message_id, GenerationEventKind::Completed);
        GenerationOutcome::Completed
    }

    async fn fail(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        err: ProviderError,
    ) -> GenerationOutcome {
        let kind = err.kind;
        warn!(conversation = %conversation_id, "generation failed: {err}");
        let finalized = self
            .store
            .finalize_message(conversation_id, message_id, |m| {
                m.content.text = kind.user_message().to_string();
                m.error = Some(kind);
                m.streaming = false;
            })
            .await;
        if !finalized {
            return GenerationOutcome::Discarded;
        }
        self.publish(conversation_id, message_id, GenerationEventKind::Failed(kind));
        GenerationOutcome::Failed(kind)
    }

    fn publish(&self, conversation_id: Uuid, message_id: Uuid, kind: GenerationEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(GenerationEvent {
            conversation_id,
            message_id,
            kind,
        });
    }
}
