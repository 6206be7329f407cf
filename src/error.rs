//! Error taxonomy for enrollwatch.
//!
//! Startup failures (`ConfigError`, `ConnectionError`) are fatal to the
//! process. Failures on the per-record delivery path (`DeliveryError`,
//! `SchedulerUnavailable`) are logged where they happen and never propagate.

use thiserror::Error;

/// Missing or invalid required settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting `{0}` is not set")]
    Missing(&'static str),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to read credential file {path}: {source}")]
    CredentialFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("service credential is not valid JSON: {0}")]
    CredentialJson(#[from] serde_json::Error),

    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Figment(Box::new(err))
    }
}

/// The document store could not be reached or refused the credential.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid service credential: {0}")]
    InvalidCredential(String),

    #[error("authentication with the document store failed: {0}")]
    Authentication(String),

    #[error("document store unreachable: {0}")]
    Unreachable(String),

    #[error("change feed worker failed to start: {0}")]
    Worker(String),
}

/// Outcome of a failed delivery attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The messaging API answered and refused the message.
    #[error("messaging API rejected the message ({code}): {description}")]
    TransportRejected { code: i64, description: String },

    /// Anything else, including network faults and unreadable responses.
    #[error("unexpected delivery failure: {0}")]
    Unexpected(String),
}

impl DeliveryError {
    /// Short label used for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            DeliveryError::TransportRejected { .. } => "rejected",
            DeliveryError::Unexpected(_) => "unexpected",
        }
    }
}

/// The main loop has stopped and no longer accepts tasks.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("main loop is no longer running")]
pub struct SchedulerUnavailable;
