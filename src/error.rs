//! Error taxonomy for the publish/subscribe session core
//!
//! Every failure a caller can observe is a [`ClientError`]. Asynchronous
//! broker failures are additionally surfaced as lifecycle events; this type
//! is what synchronous calls return.

use crate::config::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+").expect("valid secret pattern")
});

static URL_USERINFO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://[^/@\s]+:[^/@\s]+@").expect("valid userinfo pattern"));

const MAX_MESSAGE_LEN: usize = 500;

/// Main error type for session, subscription and publish operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Already connected: a session is live")]
    AlreadyConnected,

    #[error("Not connected to the message broker")]
    NotConnected,

    #[error("Already subscribed to {topic}")]
    AlreadySubscribed { topic: String },

    #[error("Not subscribed to {topic}")]
    NotSubscribed { topic: String },

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Operation already pending for {topic}")]
    OperationPending { topic: String },

    #[error("Connection failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("Connection timed out waiting for the broker")]
    ConnectTimeout,

    #[error("Subscription error on {topic}: {reason}")]
    SubscriptionError { topic: String, reason: String },

    #[error("Publish failed: {reason}")]
    PublishFailed { reason: String },

    #[error("Session construction failed: {reason}")]
    ConstructionError { reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session manager is no longer running")]
    SessionClosed,
}

impl ClientError {
    pub fn already_subscribed<S: Into<String>>(topic: S) -> Self {
        Self::AlreadySubscribed {
            topic: topic.into(),
        }
    }

    pub fn not_subscribed<S: Into<String>>(topic: S) -> Self {
        Self::NotSubscribed {
            topic: topic.into(),
        }
    }

    pub fn invalid_topic<T: Into<String>, S: Into<String>>(topic: T, reason: S) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn operation_pending<S: Into<String>>(topic: S) -> Self {
        Self::OperationPending {
            topic: topic.into(),
        }
    }

    /// Create a connect failure, redacting anything that looks like a credential
    pub fn connect_failed<S: AsRef<str>>(reason: S) -> Self {
        Self::ConnectFailed {
            reason: sanitize_error_message(reason.as_ref()),
        }
    }

    pub fn subscription_error<T: Into<String>, S: AsRef<str>>(topic: T, reason: S) -> Self {
        Self::SubscriptionError {
            topic: topic.into(),
            reason: sanitize_error_message(reason.as_ref()),
        }
    }

    pub fn publish_failed<S: AsRef<str>>(reason: S) -> Self {
        Self::PublishFailed {
            reason: sanitize_error_message(reason.as_ref()),
        }
    }

    pub fn construction_error<S: AsRef<str>>(reason: S) -> Self {
        Self::ConstructionError {
            reason: sanitize_error_message(reason.as_ref()),
        }
    }

    /// Warnings are caller mistakes that leave state untouched; everything
    /// else is a failure
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ClientError::AlreadyConnected
                | ClientError::NotConnected
                | ClientError::AlreadySubscribed { .. }
                | ClientError::NotSubscribed { .. }
                | ClientError::OperationPending { .. }
                | ClientError::InvalidTopic { .. }
        )
    }
}

/// Redact credentials and cap the length of a message before it is logged
/// or handed to an observer
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = URL_USERINFO_PATTERN
        .replace_all(&sanitized, "://***@")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
