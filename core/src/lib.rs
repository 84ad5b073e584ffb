//! Branching conversation engine
//!
//! Users can edit any earlier turn of a conversation with a language model.
//! An edit forks the conversation: the old continuation is stashed under the
//! previous version of the message and a fresh response is generated for the
//! new one. Switching versions restores the matching continuation.

pub mod config;
pub mod conversation;
pub mod error;
pub mod generation;
pub mod manager;
pub mod models;
pub mod provider;
pub mod store;

pub use config::Config;
pub use config::StorageConfig;
pub use config::StorageFormat;
pub use conversation::Direction;
pub use conversation::Navigator;
pub use conversation::PendingTurn;
pub use conversation::Version;
pub use conversation::VersionSet;
pub use error::ProviderError;
pub use error::ProviderErrorKind;
pub use error::Result;
pub use error::RetconErr;
pub use generation::GenerationCoordinator;
pub use generation::GenerationEvent;
pub use generation::GenerationEventKind;
pub use generation::GenerationHandle;
pub use generation::GenerationOutcome;
pub use generation::GenerationSession;
pub use manager::ConversationManager;
pub use manager::Turn;
pub use models::Citation;
pub use models::Content;
pub use models::Conversation;
pub use models::ConversationSummary;
pub use models::ImageAttachment;
pub use models::Message;
pub use models::Role;
pub use provider::ContinuationRequest;
pub use provider::GeminiProvider;
pub use provider::ModelProvider;
pub use provider::ResponseEvent;
pub use provider::ResponseStream;
pub use store::ConversationStore;
pub use store::InMemoryPersistence;
pub use store::Persistence;
