//! Outgoing mail capability.

use async_trait::async_trait;

/// Errors reported by a [`Deliver`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The transport could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server refused one or more recipients or the message.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The message lacks what delivery needs, such as recipients.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Hands a finished message to a transport such as SMTP.
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Delivers a raw RFC 5322 message.
    async fn deliver(&self, message: &[u8]) -> Result<(), DeliveryError>;
}
