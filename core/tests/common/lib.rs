//! Shared fixtures for retcon-core integration tests.

use std::collections::VecDeque;
use std::sync::Arc;

use retcon_core::ContinuationRequest;
use retcon_core::ConversationManager;
use retcon_core::ConversationStore;
use retcon_core::InMemoryPersistence;
use retcon_core::Message;
use retcon_core::ModelProvider;
use retcon_core::ProviderError;
use retcon_core::ProviderErrorKind;
use retcon_core::ResponseEvent;
use retcon_core::ResponseStream;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Holds a scripted response back until [`Gate::open`] is called.
#[derive(Clone, Default)]
pub struct Gate(Arc<Notify>);

impl Gate {
    pub fn open(&self) {
        self.0.notify_one();
    }
}

/// One canned reply.
pub struct ScriptedResponse {
    open_error: Option<ProviderError>,
    events: Vec<Result<ResponseEvent, ProviderError>>,
    gate: Option<Gate>,
}

impl ScriptedResponse {
    /// Stream `chunks` as text deltas, then complete.
    pub fn text(chunks: &[&str]) -> Self {
        let mut events: Vec<_> = chunks
            .iter()
            .map(|chunk| Ok(ResponseEvent::OutputTextDelta((*chunk).to_string())))
            .collect();
        events.push(Ok(ResponseEvent::Completed));
        Self {
            open_error: None,
            events,
            gate: None,
        }
    }

    /// Fail before any output is produced.
    pub fn open_error(kind: ProviderErrorKind, message: &str) -> Self {
        Self {
            open_error: Some(ProviderError::new(kind, message)),
            events: Vec::new(),
            gate: None,
        }
    }

    /// Stream `chunks`, then fail.
    pub fn fail_after(chunks: &[&str], kind: ProviderErrorKind, message: &str) -> Self {
        let mut events: Vec<_> = chunks
            .iter()
            .map(|chunk| Ok(ResponseEvent::OutputTextDelta((*chunk).to_string())))
            .collect();
        events.push(Err(ProviderError::new(kind, message)));
        Self {
            open_error: None,
            events,
            gate: None,
        }
    }

    /// Insert `event` just before the completion marker.
    pub fn with_event(mut self, event: ResponseEvent) -> Self {
        let at = self
            .events
            .iter()
            .position(|e| matches!(e, Ok(ResponseEvent::Completed)))
            .unwrap_or(self.events.len());
        self.events.insert(at, Ok(event));
        self
    }

    /// Keep the stream pending until the returned gate is opened.
    pub fn gated(mut self) -> (Self, Gate) {
        let gate = Gate::default();
        self.gate = Some(gate.clone());
        (self, gate)
    }
}

/// Provider that replays queued responses in order and records requests.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<ContinuationRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: impl IntoIterator<Item = ScriptedResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub async fn push(&self, response: ScriptedResponse) {
        self.responses.lock().await.push_back(response);
    }

    pub async fn requests(&self) -> Vec<ContinuationRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn request_continuation(
        &self,
        request: ContinuationRequest,
    ) -> Result<ResponseStream, ProviderError> {
        self.requests.lock().await.push(request);
        let Some(response) = self.responses.lock().await.pop_front() else {
            return Err(ProviderError::new(
                ProviderErrorKind::Unknown,
                "no scripted response left",
            ));
        };
        let ScriptedResponse {
            open_error,
            events,
            gate,
        } = response;
        if let Some(err) = open_error {
            return Err(err);
        }
        Ok(Box::pin(async_stream::stream! {
            if let Some(gate) = gate {
                gate.0.notified().await;
            }
            for event in events {
                yield event;
            }
        }))
    }
}

/// Manager over in-memory persistence, returning the persistence for
/// inspecting saves.
pub async fn memory_manager(
    provider: Arc<ScriptedProvider>,
) -> (ConversationManager, Arc<InMemoryPersistence>) {
    let persistence = Arc::new(InMemoryPersistence::new());
    let store = ConversationStore::open(persistence.clone())
        .await
        .unwrap_or_else(|e| panic!("in-memory store failed to open: {e}"));
    (ConversationManager::new(store, provider), persistence)
}

/// Message texts in timeline order.
pub fn texts(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.content.text.clone()).collect()
}

/// Message ids in timeline order.
pub fn ids(messages: &[Message]) -> Vec<Uuid> {
    messages.iter().map(|m| m.id).collect()
}
