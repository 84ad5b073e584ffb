//! Model provider abstraction
//!
//! A provider turns a conversation history plus a prompt into a stream of
//! response events. The coordinator only ever talks to [`ModelProvider`];
//! transport details live in the implementations.

pub mod gemini;

pub use gemini::GeminiProvider;

use std::pin::Pin;

use futures::Stream;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::models::Citation;
use crate::models::Content;
use crate::models::Message;

/// One item of a streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    OutputTextDelta(String),
    Citations(Vec<Citation>),
    /// Explicit end of the response. A stream that simply ends is treated
    /// the same way.
    Completed,
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, ProviderError>> + Send>>;

/// Everything a provider needs to produce the next assistant message.
#[derive(Debug, Clone)]
pub struct ContinuationRequest {
    pub conversation_id: Uuid,
    /// Prior turns, already filtered down to messages worth sending.
    pub history: Vec<Message>,
    pub prompt: Content,
}

impl ContinuationRequest {
    /// Build a request, dropping history entries that are still streaming,
    /// failed, or carry no content.
    pub fn new(conversation_id: Uuid, history: Vec<Message>, prompt: Content) -> Self {
        let history = history
            .into_iter()
            .filter(Message::is_history_eligible)
            .collect();
        Self {
            conversation_id,
            history,
            prompt,
        }
    }
}

#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short identifier used in logs, e.g. `gemini:gemini-2.5-flash`.
    fn name(&self) -> String;

    /// Open a response stream. Errors returned here and errors yielded by the
    /// stream are handled identically by the caller.
    async fn request_continuation(
        &self,
        request: ContinuationRequest,
    ) -> Result<ResponseStream, ProviderError>;
}
