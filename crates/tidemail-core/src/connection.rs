//! Shared IMAP session.
//!
//! At most one session exists per account. It is opened on first use,
//! authenticated, and dropped after any transport-level failure so the next
//! command reconnects. All commands go through [`Connection::lock`], which
//! serializes them on a tokio mutex.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::ImapConfig;
use crate::flag::Flags;
use crate::remote::{
    Connector, FetchData, FetchItems, MailboxClient, MailboxInfo, MailboxStatus, RemoteError,
    RemoteResult, StoreAction, Uid,
};
use crate::{Error, Result};

type Slot = Option<Box<dyn MailboxClient>>;

/// A lazily opened, shared IMAP session.
pub struct Connection {
    connector: Arc<dyn Connector>,
    config: ImapConfig,
    timeout: Duration,
    client: Mutex<Slot>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.config.host)
            .field("username", &self.config.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection that opens sessions through `connector`.
    ///
    /// `timeout` bounds connecting plus authenticating.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: ImapConfig, timeout: Duration) -> Self {
        Self {
            connector,
            config,
            timeout,
            client: Mutex::new(None),
        }
    }

    /// Takes the session lock, connecting and authenticating first if no
    /// session is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if connecting takes too long, or the
    /// remote error if connecting or logging in fails.
    pub async fn lock(&self) -> Result<ConnectionGuard<'_>> {
        let mut slot = self.client.lock().await;
        if slot.is_none() {
            let client = tokio::time::timeout(self.timeout, self.open())
                .await
                .map_err(|_| Error::Timeout(format!("connecting to {}", self.config.host)))??;
            *slot = Some(client);
        }
        Ok(ConnectionGuard { slot })
    }

    async fn open(&self) -> Result<Box<dyn MailboxClient>> {
        debug!("Connecting to {}:{}", self.config.host, self.config.port);
        let mut client = self.connector.connect(&self.config).await?;
        client
            .authenticate(&self.config.username, &self.config.password)
            .await?;
        info!("Logged in to {} as {}", self.config.host, self.config.username);
        Ok(client)
    }

    /// Whether a session is currently open.
    pub async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Sends NOOP if a session is open; never connects.
    ///
    /// Returns whether a NOOP was sent.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the NOOP fails.
    pub async fn noop_if_connected(&self) -> Result<bool> {
        let slot = self.client.lock().await;
        if slot.is_none() {
            return Ok(false);
        }
        ConnectionGuard { slot }.noop().await?;
        Ok(true)
    }

    /// Logs out and drops the session, if any.
    pub async fn disconnect(&self) {
        let mut slot = self.client.lock().await;
        if let Some(mut client) = slot.take() {
            if let Err(e) = client.logout().await {
                debug!("Logout failed: {e}");
            }
            info!("Disconnected from {}", self.config.host);
        }
    }
}

/// Exclusive access to the open session.
///
/// A command that fails at the transport level closes the session.
pub struct ConnectionGuard<'a> {
    slot: MutexGuard<'a, Slot>,
}

impl ConnectionGuard<'_> {
    fn client(&mut self) -> RemoteResult<&mut (dyn MailboxClient + 'static)> {
        self.slot
            .as_deref_mut()
            .ok_or_else(|| RemoteError::Io("connection closed".to_string()))
    }

    fn check<T>(&mut self, result: RemoteResult<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            warn!("Dropping IMAP session: {e}");
            *self.slot = None;
        }
        Ok(result?)
    }

    /// Selects a mailbox.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let result = match self.client() {
            Ok(c) => c.select(mailbox).await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `UID SEARCH`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn uid_search(&mut self, criteria: &str) -> Result<Vec<Uid>> {
        let result = match self.client() {
            Ok(c) => c.uid_search(criteria).await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `UID FETCH`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn uid_fetch(&mut self, uids: &[Uid], items: FetchItems) -> Result<Vec<FetchData>> {
        let result = match self.client() {
            Ok(c) => c.uid_fetch(uids, items).await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `UID STORE`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn uid_store(
        &mut self,
        uids: &[Uid],
        action: StoreAction,
    ) -> Result<Vec<(Uid, Flags)>> {
        let result = match self.client() {
            Ok(c) => c.uid_store(uids, action).await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `UID COPY`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn uid_copy(&mut self, uids: &[Uid], mailbox: &str) -> Result<()> {
        let result = match self.client() {
            Ok(c) => c.uid_copy(uids, mailbox).await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `EXPUNGE`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn expunge(&mut self) -> Result<()> {
        let result = match self.client() {
            Ok(c) => c.expunge().await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `LIST`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<MailboxInfo>> {
        let result = match self.client() {
            Ok(c) => c.list(reference, pattern).await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `CREATE`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn create(&mut self, mailbox: &str) -> Result<()> {
        let result = match self.client() {
            Ok(c) => c.create(mailbox).await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `APPEND`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn append(&mut self, mailbox: &str, flags: &Flags, message: &[u8]) -> Result<()> {
        let result = match self.client() {
            Ok(c) => c.append(mailbox, flags, message).await,
            Err(e) => Err(e),
        };
        self.check(result)
    }

    /// Runs `NOOP`.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn noop(&mut self) -> Result<()> {
        let result = match self.client() {
            Ok(c) => c.noop().await,
            Err(e) => Err(e),
        };
        self.check(result)
    }
}
