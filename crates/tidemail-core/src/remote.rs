//! Remote mailbox capability.
//!
//! The core never speaks the IMAP wire protocol itself. A [`Connector`]
//! opens sessions and a [`MailboxClient`] runs UID-based commands on them;
//! both are supplied by the embedding application (or by a mock in tests).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ImapConfig;
use crate::flag::{Flag, Flags};

/// Message unique identifier within a mailbox.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An envelope address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Local part.
    pub mailbox: Option<String>,
    /// Domain.
    pub host: Option<String>,
}

impl Address {
    /// Creates an address from its parts.
    #[must_use]
    pub fn new(name: Option<&str>, mailbox: &str, host: &str) -> Self {
        Self {
            name: name.map(str::to_string),
            mailbox: Some(mailbox.to_string()),
            host: Some(host.to_string()),
        }
    }

    /// `mailbox@host`, or whichever half is known.
    #[must_use]
    pub fn addr_spec(&self) -> String {
        match (&self.mailbox, &self.host) {
            (Some(m), Some(h)) => format!("{m}@{h}"),
            (Some(m), None) => m.clone(),
            (None, Some(h)) => h.clone(),
            (None, None) => String::new(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = self.addr_spec();
        match &self.name {
            Some(name) if !name.is_empty() => {
                let name = tidemail_mime::encoding::decode_eword(name);
                write!(f, "{name} <{spec}>")
            }
            _ => f.write_str(&spec),
        }
    }
}

/// The envelope of a message as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Raw Date header.
    pub date: Option<String>,
    /// Raw (possibly RFC 2047 encoded) subject.
    pub subject: Option<String>,
    /// From addresses.
    pub from: Vec<Address>,
    /// To addresses.
    pub to: Vec<Address>,
    /// Cc addresses.
    pub cc: Vec<Address>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
}

/// Result of selecting a mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages.
    pub exists: u32,
    /// UIDVALIDITY value.
    pub uid_validity: Option<u32>,
    /// Predicted next UID.
    pub uid_next: Option<u32>,
}

/// What to fetch for each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItems {
    /// UID, ENVELOPE and FLAGS.
    Summary,
    /// UID and the full message (`BODY[]`).
    Body,
}

/// Data returned for one message by a UID FETCH.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchData {
    /// Message UID.
    pub uid: Uid,
    /// Flags, when requested.
    pub flags: Option<Flags>,
    /// Envelope, when requested.
    pub envelope: Option<Envelope>,
    /// Raw message, when requested.
    pub body: Option<Vec<u8>>,
}

/// Flag change for a UID STORE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// `+FLAGS`.
    AddFlags(Vec<Flag>),
    /// `-FLAGS`.
    RemoveFlags(Vec<Flag>),
}

/// A mailbox returned by LIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxInfo {
    /// Full mailbox name.
    pub name: String,
    /// Hierarchy delimiter.
    pub delimiter: Option<char>,
    /// Mailbox attributes such as `\Noselect`.
    pub attributes: Vec<String>,
}

/// Errors reported by the remote mailbox capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Transport failure; the session is unusable.
    #[error("connection error: {0}")]
    Io(String),

    /// The server did not answer in time.
    #[error("timed out")]
    Timeout,

    /// The server refused the command (`NO`).
    #[error("server said NO: {0}")]
    No(String),

    /// The server rejected the command (`BAD`).
    #[error("server said BAD: {0}")]
    Bad(String),

    /// The server sent something that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Whether the session must be torn down after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout | Self::Protocol(_))
    }
}

/// Result type for remote operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// An open, possibly authenticated IMAP session.
#[async_trait]
pub trait MailboxClient: Send {
    /// Logs in.
    async fn authenticate(&mut self, username: &str, password: &str) -> RemoteResult<()>;

    /// Selects a mailbox.
    async fn select(&mut self, mailbox: &str) -> RemoteResult<MailboxStatus>;

    /// Runs `UID SEARCH` with the given criteria.
    async fn uid_search(&mut self, criteria: &str) -> RemoteResult<Vec<Uid>>;

    /// Runs `UID FETCH`.
    async fn uid_fetch(&mut self, uids: &[Uid], items: FetchItems) -> RemoteResult<Vec<FetchData>>;

    /// Runs `UID STORE`, returning the flags the server reported back.
    async fn uid_store(&mut self, uids: &[Uid], action: StoreAction)
    -> RemoteResult<Vec<(Uid, Flags)>>;

    /// Runs `UID COPY`.
    async fn uid_copy(&mut self, uids: &[Uid], mailbox: &str) -> RemoteResult<()>;

    /// Runs `EXPUNGE`.
    async fn expunge(&mut self) -> RemoteResult<()>;

    /// Runs `LIST`.
    async fn list(&mut self, reference: &str, pattern: &str) -> RemoteResult<Vec<MailboxInfo>>;

    /// Runs `CREATE`.
    async fn create(&mut self, mailbox: &str) -> RemoteResult<()>;

    /// Runs `APPEND`.
    async fn append(&mut self, mailbox: &str, flags: &Flags, message: &[u8]) -> RemoteResult<()>;

    /// Runs `NOOP`.
    async fn noop(&mut self) -> RemoteResult<()>;

    /// Runs `LOGOUT`.
    async fn logout(&mut self) -> RemoteResult<()>;
}

/// Opens IMAP sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to the configured server. Authentication happens separately.
    async fn connect(&self, config: &ImapConfig) -> RemoteResult<Box<dyn MailboxClient>>;
}
