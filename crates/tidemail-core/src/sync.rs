//! Incremental UID synchronization of a mailbox summary.
//!
//! A sync selects the mailbox, compares the server's UID set against the
//! summary, and fetches envelopes for the missing UIDs in batches. Each
//! batch is merged under one summary lock, so a reader sees either none or
//! all of a batch. A changed UIDVALIDITY invalidates every cached UID and
//! needs the user's consent before the summary is rebuilt.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionGuard};
use crate::remote::{FetchItems, Uid};
use crate::summary::{Summary, SummaryItem};
use crate::{Error, Result};

/// Asks the user a yes/no question.
#[async_trait]
pub trait Confirm: Send + Sync {
    /// Returns true if the user agreed.
    async fn confirm(&self, question: &str) -> bool;
}

/// A fixed answer.
#[async_trait]
impl Confirm for bool {
    async fn confirm(&self, question: &str) -> bool {
        debug!("Answering {self} to: {question}");
        *self
    }
}

/// Where a sync currently is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Nothing running.
    #[default]
    Idle,
    /// Opening or reusing the session.
    Connecting,
    /// Selecting the mailbox.
    Selecting,
    /// Searching and fetching missing envelopes.
    FetchingDeltas,
    /// Adding a fetched batch to the summary.
    Merging,
    /// Summary written to disk.
    Saved,
    /// The last sync stopped with this error.
    Failed(String),
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Selecting => f.write_str("selecting"),
            Self::FetchingDeltas => f.write_str("fetching"),
            Self::Merging => f.write_str("merging"),
            Self::Saved => f.write_str("saved"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// How a sync ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The summary is up to date and saved.
    Synced,
    /// UIDVALIDITY changed and the user kept the stale summary.
    UidValidityDeclined,
    /// A network or protocol error stopped the sync.
    Failed(String),
}

/// Result of [`SyncEngine::fetch_summary`].
#[derive(Debug)]
pub struct SyncReport {
    /// The summary, including every batch merged before a failure.
    pub summary: Arc<Summary>,
    /// UIDs added by this sync.
    pub added: usize,
    /// How the sync ended.
    pub outcome: SyncOutcome,
}

/// Brings mailbox summaries up to date.
#[derive(Debug)]
pub struct SyncEngine {
    connection: Arc<Connection>,
    batch_size: usize,
    thread_replies: bool,
    state: watch::Sender<SyncState>,
}

impl SyncEngine {
    /// Creates an engine fetching `batch_size` envelopes per request.
    #[must_use]
    pub fn new(connection: Arc<Connection>, batch_size: usize, thread_replies: bool) -> Self {
        Self {
            connection,
            batch_size: batch_size.max(1),
            thread_replies,
            state: watch::Sender::new(SyncState::Idle),
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Watches state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SyncState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            debug!("Sync state {previous} -> {next}");
        }
    }

    /// Synchronizes `mailbox` into the summary cached at `path`.
    ///
    /// With `all`, the cached summary is ignored and rebuilt. Otherwise this
    /// is [`SyncEngine::sync_summary`] on the cached summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the cached summary cannot be read or the updated
    /// summary cannot be saved.
    pub async fn fetch_summary(
        &self,
        mailbox: &str,
        path: &Path,
        all: bool,
        confirm: &dyn Confirm,
    ) -> Result<SyncReport> {
        let summary = if all {
            Summary::new(mailbox)
        } else {
            Summary::load_or_new(mailbox, path)?
        };
        self.sync_summary(mailbox, Arc::new(summary), path, confirm)
            .await
    }

    /// Merges the server's new messages of `mailbox` into `summary`.
    ///
    /// Items already present keep their local state, so a summary that is
    /// shared with readers can be passed in while it is in use. On success
    /// the summary is saved to `path`. A network failure leaves the cache
    /// file alone and reports [`SyncOutcome::Failed`] with whatever was
    /// merged. An accepted UIDVALIDITY change returns a new summary in the
    /// report.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated summary cannot be saved.
    pub async fn sync_summary(
        &self,
        mailbox: &str,
        mut summary: Arc<Summary>,
        path: &Path,
        confirm: &dyn Confirm,
    ) -> Result<SyncReport> {
        summary.set_threading(self.thread_replies);
        let mut added = 0;

        let outcome = match self.merge_remote(&mut summary, mailbox, confirm, &mut added).await {
            Ok(outcome) => outcome,
            Err(e @ (Error::Remote(_) | Error::Timeout(_))) => {
                let reason = e.to_string();
                warn!("Sync of {mailbox} failed after {added} new messages: {reason}");
                self.transition(SyncState::Failed(reason.clone()));
                return Ok(SyncReport {
                    summary,
                    added,
                    outcome: SyncOutcome::Failed(reason),
                });
            }
            Err(e) => {
                self.transition(SyncState::Failed(e.to_string()));
                return Err(e);
            }
        };

        if outcome == SyncOutcome::Synced {
            if let Err(e) = summary.save(path) {
                self.transition(SyncState::Failed(e.to_string()));
                return Err(e);
            }
            self.transition(SyncState::Saved);
            info!("Synced {mailbox}: {added} new, {} total", summary.len());
        }
        self.transition(SyncState::Idle);
        Ok(SyncReport {
            summary,
            added,
            outcome,
        })
    }

    async fn merge_remote(
        &self,
        summary: &mut Arc<Summary>,
        mailbox: &str,
        confirm: &dyn Confirm,
        added: &mut usize,
    ) -> Result<SyncOutcome> {
        self.transition(SyncState::Connecting);
        let mut conn = self.connection.lock().await?;

        self.transition(SyncState::Selecting);
        let status = conn.select(mailbox).await?;
        if let (Some(recorded), Some(current)) = (summary.uidvalidity(), status.uid_validity)
            && recorded != current
        {
            // Other commands and keep-alive run while the user decides.
            drop(conn);
            let question = format!(
                "UIDVALIDITY of {mailbox} changed from {recorded} to {current}. Discard the cached summary?"
            );
            if !confirm.confirm(&question).await {
                info!("Keeping stale summary of {mailbox}");
                return Ok(SyncOutcome::UidValidityDeclined);
            }
            warn!("UIDVALIDITY of {mailbox} changed, rebuilding summary");
            *summary = Arc::new(Summary::new(mailbox).with_threading(self.thread_replies));

            // The selection may have moved while the lock was released.
            self.transition(SyncState::Connecting);
            conn = self.connection.lock().await?;
            self.transition(SyncState::Selecting);
            let reselected = conn.select(mailbox).await?;
            return self
                .fetch_missing(&mut conn, &**summary, mailbox, reselected.uid_validity, added)
                .await;
        }
        self.fetch_missing(&mut conn, &**summary, mailbox, status.uid_validity, added)
            .await
    }

    /// Fetches every UID of the selected `mailbox` that `summary` lacks.
    async fn fetch_missing(
        &self,
        conn: &mut ConnectionGuard<'_>,
        summary: &Summary,
        mailbox: &str,
        uid_validity: Option<u32>,
        added: &mut usize,
    ) -> Result<SyncOutcome> {
        self.transition(SyncState::FetchingDeltas);
        let known: HashSet<Uid> = summary.uids().into_iter().collect();
        let mut missing: Vec<Uid> = conn
            .uid_search("ALL")
            .await?
            .into_iter()
            .filter(|uid| !known.contains(uid))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        debug!("{} of {mailbox} not in summary", missing.len());

        for batch in missing.chunks(self.batch_size) {
            let fetched = conn.uid_fetch(batch, FetchItems::Summary).await?;
            self.transition(SyncState::Merging);
            let items = fetched.into_iter().filter_map(|data| {
                let envelope = data.envelope?;
                let item =
                    SummaryItem::from_envelope(data.uid, &envelope, data.flags.unwrap_or_default());
                Some((item, envelope.in_reply_to))
            });
            *added += summary.add_items(items).len();
            self.transition(SyncState::FetchingDeltas);
        }

        if let Some(uidvalidity) = uid_validity {
            summary.set_uidvalidity(uidvalidity);
        }
        Ok(SyncOutcome::Synced)
    }
}
