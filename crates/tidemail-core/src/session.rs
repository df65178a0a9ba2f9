//! Mail session: the current mailbox, its summary, and the operations a
//! front end performs on them.
//!
//! A [`Session`] owns the collaborators (connection, mail cache, search
//! index, optional crypto) and the current selection. Selection state sits
//! behind a mutex so an `Arc<Session>` can be handed to background tasks.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tidemail_mime::{Crypto, Message, PartPath, Renderer};
use tracing::{debug, info, warn};

use crate::cache::{MailCache, create_private_dir};
use crate::config::Config;
use crate::connection::Connection;
use crate::delivery::Deliver;
use crate::flag::{Flag, Flags};
use crate::index::{IndexRecord, SearchIndex, SearchPage};
use crate::remote::{Connector, FetchItems, MailboxInfo, StoreAction, Uid};
use crate::summary::{Summary, SummaryItem};
use crate::sync::{Confirm, SyncEngine, SyncOutcome};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Selection {
    mailbox: Option<String>,
    summary: Option<Arc<Summary>>,
    uid: Option<Uid>,
}

/// An account's open mail session.
pub struct Session {
    config: Config,
    connection: Arc<Connection>,
    cache: MailCache,
    index: SearchIndex,
    sync: SyncEngine,
    crypto: Option<Arc<dyn Crypto>>,
    selection: Mutex<Selection>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.config.account.name)
            .field("connection", &self.connection)
            .field("cache", &self.cache)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session from its parts.
    #[must_use]
    pub fn new(
        config: Config,
        connection: Arc<Connection>,
        cache: MailCache,
        index: SearchIndex,
    ) -> Self {
        let sync = SyncEngine::new(
            Arc::clone(&connection),
            config.fetch_batch_size,
            config.thread_replies,
        );
        Self {
            config,
            connection,
            cache,
            index,
            sync,
            crypto: None,
            selection: Mutex::new(Selection::default()),
        }
    }

    /// Opens the account described by `config`: resolves credentials,
    /// creates the data directory and opens the search index. No network
    /// traffic happens until the first command.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or the data directory or
    /// index cannot be created.
    pub async fn open(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let imap = config.imap_with_credentials()?;
        create_private_dir(&config.account_dir())?;
        let connection = Arc::new(Connection::new(connector, imap, config.connect_timeout()));
        let cache = MailCache::new(config.mail_dir());
        let index = SearchIndex::new(&config.index_path()).await?;
        info!("Opened account {}", config.account.name);
        Ok(Self::new(config, connection, cache, index))
    }

    /// Decrypts and verifies messages with `crypto` when rendering.
    #[must_use]
    pub fn with_crypto(mut self, crypto: Arc<dyn Crypto>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    fn selection(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The shared IMAP connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The mail cache.
    #[must_use]
    pub const fn cache(&self) -> &MailCache {
        &self.cache
    }

    /// The search index.
    #[must_use]
    pub const fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// The sync engine, for observing sync state.
    #[must_use]
    pub const fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    /// The current mailbox.
    #[must_use]
    pub fn current_mailbox(&self) -> Option<String> {
        self.selection().mailbox.clone()
    }

    /// The current mailbox's summary.
    #[must_use]
    pub fn summary(&self) -> Option<Arc<Summary>> {
        self.selection().summary.clone()
    }

    /// The message the user is looking at.
    #[must_use]
    pub fn current_uid(&self) -> Option<Uid> {
        self.selection().uid
    }

    /// Points at `uid`, or at nothing if it is not in the summary.
    pub fn set_current_uid(&self, uid: Option<Uid>) {
        let mut selection = self.selection();
        let known = uid.filter(|uid| {
            selection
                .summary
                .as_ref()
                .is_some_and(|summary| summary.contains(*uid))
        });
        selection.uid = known;
    }

    fn current(&self) -> Result<(String, Arc<Summary>)> {
        let selection = self.selection();
        match (&selection.mailbox, &selection.summary) {
            (Some(mailbox), Some(summary)) => Ok((mailbox.clone(), Arc::clone(summary))),
            _ => Err(Error::NotFound("no mailbox selected".to_string())),
        }
    }

    fn install(&self, mailbox: &str, summary: Arc<Summary>) {
        let mut selection = self.selection();
        if selection.mailbox.as_deref() != Some(mailbox) {
            selection.uid = None;
        }
        if let Some(uid) = selection.uid
            && !summary.contains(uid)
        {
            debug!("Current message {uid} is gone");
            selection.uid = None;
        }
        selection.mailbox = Some(mailbox.to_string());
        selection.summary = Some(summary);
    }

    fn save_summary(&self, mailbox: &str, summary: &Summary) -> Result<()> {
        summary.save(&self.config.summary_path(mailbox))
    }

    /// Makes `mailbox` current using its cached summary, without contacting
    /// the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the cached summary cannot be read.
    pub fn open_mailbox(&self, mailbox: &str) -> Result<Arc<Summary>> {
        let summary = Summary::load_or_new(mailbox, &self.config.summary_path(mailbox))?
            .with_threading(self.config.thread_replies);
        let summary = Arc::new(summary);
        self.install(mailbox, Arc::clone(&summary));
        Ok(summary)
    }

    /// Synchronizes `mailbox` and makes it current.
    ///
    /// When `mailbox` is already current its live summary is merged into,
    /// so local flag changes and cache links made meanwhile are kept. With
    /// `all` the summary is rebuilt from the server.
    ///
    /// Returns the number of new messages and how the sync ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary cache cannot be read or saved.
    pub async fn sync_mailbox(
        &self,
        mailbox: &str,
        all: bool,
        confirm: &dyn Confirm,
    ) -> Result<(usize, SyncOutcome)> {
        let path = self.config.summary_path(mailbox);
        let live = {
            let selection = self.selection();
            selection
                .summary
                .clone()
                .filter(|_| !all && selection.mailbox.as_deref() == Some(mailbox))
        };
        let summary = match live {
            Some(summary) => summary,
            None if all => Arc::new(Summary::new(mailbox)),
            None => Arc::new(Summary::load_or_new(mailbox, &path)?),
        };
        let report = self.sync.sync_summary(mailbox, summary, &path, confirm).await?;
        self.install(mailbox, report.summary);
        Ok((report.added, report.outcome))
    }

    fn is_spam(&self, mailbox: &str) -> bool {
        self.config.spam_mailbox.as_deref() == Some(mailbox)
    }

    /// Returns the raw message `uid` of the current mailbox and whether it
    /// came from the network.
    ///
    /// A cached copy is used when present. Otherwise the message is fetched,
    /// stored in the mail cache, indexed and linked from the summary; the
    /// spam mailbox is never cached or indexed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no mailbox is selected or the server
    /// has no such message, or the error of the failing step.
    pub async fn read_mail(&self, uid: Uid) -> Result<(Vec<u8>, bool)> {
        let (mailbox, summary) = self.current()?;
        let item = summary
            .get(uid)
            .ok_or_else(|| Error::NotFound(format!("message {uid} in {mailbox}")))?;
        self.set_current_uid(Some(uid));

        if let Some(cache_id) = &item.cache_id
            && self.cache.contains(cache_id)
        {
            return Ok((self.cache.read(cache_id)?, false));
        }

        let raw = {
            let mut conn = self.connection.lock().await?;
            conn.select(&mailbox).await?;
            conn.uid_fetch(&[uid], FetchItems::Body).await?
        }
        .into_iter()
        .find(|data| data.uid == uid)
        .and_then(|data| data.body)
        .ok_or_else(|| Error::NotFound(format!("no such mail: {uid}")))?;
        summary.update(uid, |item| item.set_flag(Flag::Seen));

        if self.is_spam(&mailbox) {
            debug!("Not caching message {uid} from spam mailbox {mailbox}");
            return Ok((raw, true));
        }

        let cache_id = self.cache.write(&raw)?;
        let message = Message::parse(raw.clone());
        self.index
            .index(&cache_id, &self.cache.path(&cache_id)?, &message)
            .await?;
        summary.update(uid, |item| item.cache_id = Some(cache_id));
        self.save_summary(&mailbox, &summary)?;
        Ok((raw, true))
    }

    fn renderer(&self) -> Renderer<'_> {
        let renderer = Renderer::new(self.config.display_header_fields.iter().cloned());
        match &self.crypto {
            Some(crypto) => renderer.with_crypto(crypto.as_ref()),
            None => renderer,
        }
    }

    /// Renders message `uid` for display.
    ///
    /// # Errors
    ///
    /// Returns the error of [`Session::read_mail`].
    pub async fn render_mail(&self, uid: Uid) -> Result<String> {
        let (raw, _) = self.read_mail(uid).await?;
        Ok(self.renderer().render(&Message::parse(raw)))
    }

    /// Quotes message `uid` for a reply.
    ///
    /// # Errors
    ///
    /// Returns the error of [`Session::read_mail`].
    pub async fn quote_reply(&self, uid: Uid) -> Result<String> {
        let (raw, _) = self.read_mail(uid).await?;
        Ok(self.renderer().quote_reply(&Message::parse(raw)))
    }

    /// Writes the decoded body of part `path` of message `uid` into `dir`
    /// (the configured save directory by default), named after the part's
    /// filename. An existing file is replaced only if `confirm` agrees.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if overwriting was declined, a MIME
    /// error if the part does not exist, or an I/O error.
    pub async fn save_part(
        &self,
        uid: Uid,
        path: &PartPath,
        dir: Option<&Path>,
        confirm: &dyn Confirm,
    ) -> Result<PathBuf> {
        let (raw, _) = self.read_mail(uid).await?;
        let message = Message::parse(raw);
        let part = self.renderer().dig_part(&message, path)?;
        let data = part.decode_body()?;

        let name = part
            .filename()
            .as_deref()
            .and_then(safe_file_name)
            .unwrap_or_else(|| format!("{uid}-{path}"));
        let dir = dir.unwrap_or(self.config.save_directory.as_path());
        let dest = dir.join(name);
        if dest.exists()
            && !confirm
                .confirm(&format!("{} exists. Overwrite?", dest.display()))
                .await
        {
            return Err(Error::Cancelled(format!("not overwriting {}", dest.display())));
        }
        std::fs::create_dir_all(dir)?;
        std::fs::write(&dest, data)?;
        info!("Saved part {path} of {uid} to {}", dest.display());
        Ok(dest)
    }

    async fn store_remote(
        &self,
        mailbox: &str,
        uid: Uid,
        action: StoreAction,
    ) -> Result<Option<Flags>> {
        let mut conn = self.connection.lock().await?;
        conn.select(mailbox).await?;
        let flags = conn
            .uid_store(&[uid], action)
            .await?
            .into_iter()
            .find(|(u, _)| *u == uid)
            .map(|(_, flags)| flags);
        Ok(flags)
    }

    async fn change_flag(
        &self,
        uid: Uid,
        flag: Flag,
        add: bool,
        update_server: bool,
    ) -> Result<Flags> {
        let (mailbox, summary) = self.current()?;
        if !summary.contains(uid) {
            return Err(Error::NotFound(format!("message {uid} in {mailbox}")));
        }

        let mut server_flags = None;
        if update_server {
            let action = if add {
                StoreAction::AddFlags(vec![flag.clone()])
            } else {
                StoreAction::RemoveFlags(vec![flag.clone()])
            };
            match self.store_remote(&mailbox, uid, action).await {
                Ok(Some(flags)) => server_flags = Some(flags),
                Ok(None) => debug!("Server returned no flags for {uid}, updating locally"),
                Err(e) => warn!("Could not store {flag} on {uid}, updating locally: {e}"),
            }
        }

        let flags = summary
            .update(uid, |item| {
                match server_flags {
                    Some(flags) => item.set_flags(flags),
                    None if add => item.set_flag(flag),
                    None => item.unset_flag(&flag),
                }
                item.flags().clone()
            })
            .ok_or_else(|| Error::NotFound(format!("message {uid} in {mailbox}")))?;
        self.save_summary(&mailbox, &summary)?;
        Ok(flags)
    }

    /// Sets `flag` on `uid`, first on the server when `update_server` is
    /// set. The server's resulting flags replace the local ones; if the
    /// server cannot be reached the change is made locally only. The
    /// summary cache is saved either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message is not in the summary, or
    /// an error if the summary cannot be saved.
    pub async fn set_flag(&self, uid: Uid, flag: Flag, update_server: bool) -> Result<Flags> {
        self.change_flag(uid, flag, true, update_server).await
    }

    /// Removes `flag` from `uid`; see [`Session::set_flag`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message is not in the summary.
    pub async fn unset_flag(&self, uid: Uid, flag: Flag, update_server: bool) -> Result<Flags> {
        self.change_flag(uid, flag, false, update_server).await
    }

    /// Flips `flag` on `uid`; see [`Session::set_flag`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message is not in the summary.
    pub async fn toggle_flag(&self, uid: Uid, flag: Flag, update_server: bool) -> Result<Flags> {
        let (mailbox, summary) = self.current()?;
        let set = summary
            .get(uid)
            .ok_or_else(|| Error::NotFound(format!("message {uid} in {mailbox}")))?
            .flags()
            .contains(&flag);
        self.change_flag(uid, flag, !set, update_server).await
    }

    /// Moves `uids` to `dest`: copy, mark deleted, expunge, and drop them
    /// from the summary. Cached bodies stay, since the messages still exist.
    ///
    /// Returns the number of summary items removed.
    ///
    /// # Errors
    ///
    /// Returns the remote error if any server step fails, in which case the
    /// summary is left unchanged.
    pub async fn refile(&self, uids: &[Uid], dest: &str) -> Result<usize> {
        let (mailbox, summary) = self.current()?;
        if uids.is_empty() {
            return Ok(0);
        }
        {
            let mut conn = self.connection.lock().await?;
            conn.select(&mailbox).await?;
            conn.uid_copy(uids, dest).await?;
            conn.uid_store(uids, StoreAction::AddFlags(vec![Flag::Deleted]))
                .await?;
            conn.expunge().await?;
        }
        let removed = summary.delete_item_if(|item| uids.contains(&item.uid));
        self.after_removal(&mailbox, &summary)?;
        info!("Refiled {} messages from {mailbox} to {dest}", removed.len());
        Ok(removed.len())
    }

    /// Refiles `uids` to the archive mailbox, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the remote error if listing, creating or refiling fails.
    pub async fn archive(&self, uids: &[Uid]) -> Result<usize> {
        let archive = self.config.archive_mailbox.clone();
        {
            let mut conn = self.connection.lock().await?;
            if conn.list("", &archive).await?.is_empty() {
                info!("Creating mailbox {archive}");
                conn.create(&archive).await?;
            }
        }
        self.refile(uids, &archive).await
    }

    /// Expunges the current mailbox and forgets every message flagged
    /// deleted, including its cached body and index entry.
    ///
    /// Returns the number of summary items removed.
    ///
    /// # Errors
    ///
    /// Returns the remote error if EXPUNGE fails, or an error if the summary
    /// cannot be saved.
    pub async fn expunge_deleted(&self) -> Result<usize> {
        let (mailbox, summary) = self.current()?;
        {
            let mut conn = self.connection.lock().await?;
            conn.select(&mailbox).await?;
            conn.expunge().await?;
        }
        let removed = summary.delete_item_if(|item| item.flags().is_deleted());
        self.forget_bodies(&summary, &removed).await?;
        self.after_removal(&mailbox, &summary)?;
        info!("Expunged {} messages from {mailbox}", removed.len());
        Ok(removed.len())
    }

    /// Drops cache entries and index records no remaining item refers to.
    async fn forget_bodies(&self, summary: &Summary, removed: &[SummaryItem]) -> Result<()> {
        let still_used: Vec<String> = summary
            .uids()
            .into_iter()
            .filter_map(|uid| summary.get(uid).and_then(|item| item.cache_id))
            .collect();
        for cache_id in removed.iter().filter_map(|item| item.cache_id.as_ref()) {
            if still_used.contains(cache_id) {
                continue;
            }
            self.cache.remove(cache_id)?;
            self.index.remove(cache_id).await?;
        }
        Ok(())
    }

    fn after_removal(&self, mailbox: &str, summary: &Arc<Summary>) -> Result<()> {
        self.save_summary(mailbox, summary)?;
        self.install(mailbox, Arc::clone(summary));
        Ok(())
    }

    /// Lists every mailbox on the server.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn list_mailboxes(&self) -> Result<Vec<MailboxInfo>> {
        let mut conn = self.connection.lock().await?;
        conn.list("", "*").await
    }

    /// Delivers `raw` and, when an outbox is configured, appends a copy
    /// there marked seen. A failed append is logged, since the message has
    /// already gone out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] if delivery fails.
    pub async fn send(&self, raw: &[u8], deliver: &dyn Deliver) -> Result<()> {
        deliver.deliver(raw).await?;
        info!("Message delivered");
        if let Some(outbox) = &self.config.outbox {
            let appended = match self.connection.lock().await {
                Ok(mut conn) => {
                    conn.append(outbox, &Flags::from_vec(vec![Flag::Seen]), raw)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = appended {
                warn!("Could not save sent message to {outbox}: {e}");
            }
        }
        Ok(())
    }

    /// Searches the index with the configured page size.
    ///
    /// # Errors
    ///
    /// Returns the error of [`SearchIndex::search`].
    pub async fn search(&self, query: &str, page: usize) -> Result<SearchPage> {
        self.index
            .search(query, page, self.config.search_page_size)
            .await
    }

    /// The conversation containing cache entry `cache_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the entry is not indexed.
    pub async fn thread_of(&self, cache_id: &str) -> Result<Vec<IndexRecord>> {
        let record = self
            .index
            .get(cache_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("indexed message {cache_id}")))?;
        self.index.thread(&record.thread_id).await
    }
}

/// The last path component of `name`, if it is a usable file name.
fn safe_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    (!base.is_empty() && base != "." && base != "..").then(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(safe_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_file_name("C:\\tmp\\a.txt").as_deref(), Some("a.txt"));
        assert_eq!(safe_file_name("dir/"), None);
        assert_eq!(safe_file_name(".."), None);
    }
}
