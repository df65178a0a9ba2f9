//! # tidemail-core
//!
//! Mailbox state for the tidemail client.
//!
//! This crate provides:
//! - **Summary cache** - per-mailbox message list with crash-safe saves
//! - **Sync engine** - incremental UID synchronization with UIDVALIDITY checks
//! - **Mail cache** - content-addressed store of raw messages
//! - **Search index** - `SQLite` full-text and thread index
//! - **Background tasks** - single-slot runner and IMAP keep-alive
//! - **Session** - reading, flagging, refiling and sending mail
//!
//! The IMAP wire protocol, SMTP and OpenPGP are reached through the
//! [`remote`], [`delivery`] and [`tidemail_mime::Crypto`] traits.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod connection;
pub mod delivery;
mod error;
pub mod flag;
pub mod index;
pub mod remote;
pub mod session;
pub mod summary;
pub mod sync;
pub mod tasks;

pub use cache::MailCache;
pub use config::credentials;
pub use config::{
    AccountConfig, AuthType, Config, CredentialError, CredentialResult, ImapConfig, Security,
    ValidationError, ValidationResult, validate_config,
};
pub use connection::{Connection, ConnectionGuard};
pub use delivery::{Deliver, DeliveryError};
pub use error::{Error, Result};
pub use flag::{Flag, Flags};
pub use index::{IndexRecord, SearchIndex, SearchPage};
pub use remote::{
    Address, Connector, Envelope, FetchData, FetchItems, MailboxClient, MailboxInfo, MailboxStatus,
    RemoteError, RemoteResult, StoreAction, Uid,
};
pub use session::Session;
pub use summary::{Summary, SummaryItem};
pub use sync::{Confirm, SyncEngine, SyncOutcome, SyncReport, SyncState};
pub use tasks::{TaskRunner, TaskStatus, spawn_keep_alive};
