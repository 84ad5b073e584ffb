use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, RetconErr>;

/// Category of a failed generation request.
///
/// The category, not the raw provider message, is what ends up in the
/// conversation: every kind maps to a fixed user-facing explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    InvalidKey,
    Forbidden,
    RateLimited,
    ModelUnavailable,
    Network,
    Unknown,
}

impl ProviderErrorKind {
    /// Categorize a failure from its HTTP status (if any) and message text.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        match status {
            Some(401) => return Self::InvalidKey,
            Some(403) => return Self::Forbidden,
            Some(429) => return Self::RateLimited,
            Some(404) => return Self::ModelUnavailable,
            _ => {}
        }

        let lower = message.to_lowercase();
        if lower.contains("api key not valid") || lower.contains("401") {
            Self::InvalidKey
        } else if lower.contains("403") {
            Self::Forbidden
        } else if lower.contains("429") {
            Self::RateLimited
        } else if lower.contains("404") || lower.contains("not found") {
            Self::ModelUnavailable
        } else if lower.contains("fetch failed")
            || lower.contains("connection")
            || lower.contains("timed out")
            || lower.contains("dns")
        {
            Self::Network
        } else {
            Self::Unknown
        }
    }

    /// Text written into the placeholder message when a generation fails.
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::InvalidKey => "Invalid API key. Please update your key.",
            Self::Forbidden => {
                "Access denied. Make sure the API key has no HTTP referrer or IP restrictions that block this client."
            }
            Self::RateLimited => {
                "Rate limit reached. Try again later, use a different key, or enable billing for the project."
            }
            Self::ModelUnavailable => {
                "The requested model is not available for this API key. Please check your project settings."
            }
            Self::Network => "Network error. Please check your internet connection and try again.",
            Self::Unknown => {
                "Sorry, something went wrong while generating a response. Please try again."
            }
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidKey => "invalid-key",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate-limited",
            Self::ModelUnavailable => "model-unavailable",
            Self::Network => "network-failure",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a model provider, either when opening the stream or
/// while it is being consumed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error whose kind is inferred from the status and message.
    pub fn classified(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ProviderErrorKind::classify(status, &message),
            message,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        let status = err.status().map(|s| s.as_u16());
        if status.is_none() && (err.is_connect() || err.is_timeout() || err.is_request()) {
            return Self::new(ProviderErrorKind::Network, err.to_string());
        }
        Self::classified(status, err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum RetconErr {
    /// An edit or new message with no text and no attachments, or an edit
    /// aimed at a message that is not a user turn.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A generation for this conversation has not resolved yet.
    #[error("a response is still being generated for conversation {0}")]
    Busy(Uuid),

    /// Version navigation past either end of a message's versions. `len` is
    /// zero when the requested offset was not a single step.
    #[error("{}", describe_out_of_range(.index, .len))]
    OutOfRange { index: i64, len: usize },

    #[error("no conversation with id: {0}")]
    ConversationNotFound(Uuid),

    #[error("no message with id: {0}")]
    MessageNotFound(Uuid),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),
}

fn describe_out_of_range(index: &i64, len: &usize) -> String {
    if *len == 0 {
        format!("version offset {index} is not a single step (use -1 or +1)")
    } else {
        format!("version index {index} is out of range (message has {len} versions)")
    }
}

impl RetconErr {
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConversationNotFound(_) | Self::MessageNotFound(_)
        )
    }

    /// Local-contract failures the caller is expected to prevent up front.
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::Busy(_)
                | Self::OutOfRange { .. }
                | Self::ConversationNotFound(_)
                | Self::MessageNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefers_status_codes() {
        assert_eq!(
            ProviderErrorKind::classify(Some(401), "whatever"),
            ProviderErrorKind::InvalidKey
        );
        assert_eq!(
            ProviderErrorKind::classify(Some(403), ""),
            ProviderErrorKind::Forbidden
        );
        assert_eq!(
            ProviderErrorKind::classify(Some(429), ""),
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            ProviderErrorKind::classify(Some(404), ""),
            ProviderErrorKind::ModelUnavailable
        );
    }

    #[test]
    fn classify_falls_back_to_message_text() {
        assert_eq!(
            ProviderErrorKind::classify(None, "API key not valid. Please pass a valid API key."),
            ProviderErrorKind::InvalidKey
        );
        assert_eq!(
            ProviderErrorKind::classify(None, "TypeError: fetch failed"),
            ProviderErrorKind::Network
        );
        assert_eq!(
            ProviderErrorKind::classify(None, "models/foo is not found for API version v1beta"),
            ProviderErrorKind::ModelUnavailable
        );
        assert_eq!(
            ProviderErrorKind::classify(Some(500), "internal"),
            ProviderErrorKind::Unknown
        );
    }

    #[test]
    fn out_of_range_messages() {
        assert_eq!(
            RetconErr::OutOfRange { index: 2, len: 2 }.to_string(),
            "version index 2 is out of range (message has 2 versions)"
        );
        let err = crate::conversation::Direction::try_from(3).unwrap_err();
        assert_eq!(
            err.to_string(),
            "version offset 3 is not a single step (use -1 or +1)"
        );
    }

    #[test]
    fn not_found_groups_both_variants() {
        assert!(RetconErr::ConversationNotFound(Uuid::new_v4()).is_not_found());
        assert!(RetconErr::MessageNotFound(Uuid::new_v4()).is_not_found());
        assert!(!RetconErr::Busy(Uuid::new_v4()).is_not_found());
        assert!(RetconErr::Busy(Uuid::new_v4()).is_contract_violation());
        assert!(
            !RetconErr::Provider(ProviderError::new(ProviderErrorKind::Unknown, "x"))
                .is_contract_violation()
        );
    }
}
