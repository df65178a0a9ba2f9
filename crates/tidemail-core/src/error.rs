//! Error types for the core library.

use thiserror::Error;

use crate::config::credentials::CredentialError;
use crate::delivery::DeliveryError;
use crate::remote::RemoteError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote mailbox operation failed.
    #[error("IMAP error: {0}")]
    Remote(#[from] RemoteError),

    /// Message could not be parsed or a part could not be resolved.
    #[error("MIME error: {0}")]
    Mime(#[from] tidemail_mime::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cache file, cache entry, message or mailbox does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connecting or authenticating took too long.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The background slot is occupied by another task.
    #[error("Another task is running: {0}")]
    Busy(String),

    /// Search query was empty or malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Message delivery failed.
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// The user declined a confirmation.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl From<tempfile::PersistError> for Error {
    fn from(e: tempfile::PersistError) -> Self {
        Self::Io(e.error)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
