//! Per-mailbox summary cache.
//!
//! A [`Summary`] is the list of a mailbox's messages as shown to the user:
//! one [`SummaryItem`] per UID, optionally threaded by In-Reply-To. It is
//! shared between the UI and background sync, so all state sits behind a
//! single mutex that is never held across an `.await`.
//!
//! On disk the summary is JSON. Saving takes an exclusive lock on a sibling
//! `.lock` file, keeps the previous file as `.old`, and replaces the cache
//! through a temporary file and a rename, so a failed save leaves the
//! previous cache intact.

use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tidemail_mime::encoding::decode_eword;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::cache::create_private_dir;
use crate::flag::{Flag, Flags};
use crate::remote::{Address, Envelope, Uid};
use crate::{Error, Result};

/// Bumped whenever the persisted layout changes.
const FORMAT_VERSION: u32 = 1;

/// Lines are cut to this many display columns.
const LINE_WIDTH: usize = 78;

const FROM_WIDTH: usize = 16;

/// Replies deeper than this are not indented further.
const MAX_INDENT_LEVEL: usize = 8;

/// One message in a summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryItem {
    /// Message UID.
    pub uid: Uid,
    /// Envelope date; the Unix epoch when unparsable.
    pub date: DateTime<Utc>,
    /// Sender addresses.
    pub from: Vec<Address>,
    /// Raw, possibly RFC 2047 encoded, subject.
    pub subject: String,
    /// Current flags.
    flags: Flags,
    /// Mail cache id once the message body has been fetched.
    pub cache_id: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
    /// Replies attached under this item when threading is enabled.
    pub replies: Vec<Uid>,
    #[serde(skip)]
    line: OnceCell<String>,
}

impl SummaryItem {
    /// Creates an item.
    #[must_use]
    pub fn new(uid: Uid, date: DateTime<Utc>, from: Vec<Address>, subject: &str, flags: Flags) -> Self {
        Self {
            uid,
            date,
            from,
            subject: subject.to_string(),
            flags,
            cache_id: None,
            message_id: None,
            replies: Vec::new(),
            line: OnceCell::new(),
        }
    }

    /// Builds an item from a fetched envelope.
    #[must_use]
    pub fn from_envelope(uid: Uid, envelope: &Envelope, flags: Flags) -> Self {
        let date = envelope
            .date
            .as_deref()
            .and_then(parse_date)
            .unwrap_or(DateTime::UNIX_EPOCH);
        let mut item = Self::new(
            uid,
            date,
            envelope.from.clone(),
            envelope.subject.as_deref().unwrap_or_default(),
            flags,
        );
        item.message_id = envelope.message_id.clone();
        item
    }

    /// Current flags.
    #[must_use]
    pub const fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Adds a flag locally.
    pub fn set_flag(&mut self, flag: Flag) {
        self.flags.insert(flag);
        self.invalidate();
    }

    /// Removes a flag locally.
    pub fn unset_flag(&mut self, flag: &Flag) {
        self.flags.remove(flag);
        self.invalidate();
    }

    /// Flips a flag locally and returns whether it is now set.
    pub fn toggle_flag(&mut self, flag: Flag) -> bool {
        if self.flags.contains(&flag) {
            self.unset_flag(&flag);
            false
        } else {
            self.set_flag(flag);
            true
        }
    }

    /// Replaces the flag set, typically with the server's answer.
    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
        self.invalidate();
    }

    /// Forgets the memoized line.
    pub fn invalidate(&mut self) {
        self.line = OnceCell::new();
    }

    /// The rendered summary line at `level` of reply nesting.
    ///
    /// `"{uid} {mark}{MM/DD HH:MM} {indent}[ {from} ] {subject}\n"`, where
    /// the mark is `$` for flagged, `u` for unseen and a space otherwise.
    /// The result is memoized until the next flag change.
    pub fn line(&self, level: usize) -> &str {
        self.line.get_or_init(|| self.render_line(level))
    }

    fn render_line(&self, level: usize) -> String {
        let mark = if self.flags.is_flagged() {
            '$'
        } else if self.flags.is_seen() {
            ' '
        } else {
            'u'
        };
        let indent = "  ".repeat(level.min(MAX_INDENT_LEVEL));
        let from = fit(&self.sender(), FROM_WIDTH);
        let prefix = format!(
            "{} {}{} {}[ {} ] ",
            self.uid,
            mark,
            self.date.format("%m/%d %H:%M"),
            indent,
            from
        );
        let room = LINE_WIDTH.saturating_sub(display_width(&prefix));
        let subject = fit(&decode_eword(&self.subject), room);
        format!("{prefix}{subject}\n")
    }

    /// `Name <mailbox@host>`, `mailbox@host` or `Unknown sender`.
    #[must_use]
    pub fn sender(&self) -> String {
        self.from
            .first()
            .map(ToString::to_string)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown sender".to_string())
    }
}

/// Parses an RFC 2822 date, ignoring a trailing `(comment)`.
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let s = match s.rfind('(') {
        Some(i) if s.ends_with(')') => s[..i].trim_end(),
        _ => s,
    };
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[derive(Debug, Default)]
struct SummaryData {
    mailbox: String,
    roots: Vec<Uid>,
    uid_table: BTreeMap<Uid, SummaryItem>,
    message_id_table: HashMap<String, Uid>,
    last_uid: u32,
    uidvalidity: Option<u32>,
    thread_replies: bool,
}

/// Persisted form; tables are rebuilt on load.
#[derive(Serialize, Deserialize)]
struct SummaryFile {
    version: u32,
    mailbox: String,
    uidvalidity: Option<u32>,
    last_uid: u32,
    roots: Vec<Uid>,
    items: Vec<SummaryItem>,
}

impl SummaryData {
    fn add(&mut self, item: SummaryItem, in_reply_to: Option<&str>) -> bool {
        let uid = item.uid;
        if self.uid_table.contains_key(&uid) {
            return false;
        }
        if let Some(id) = &item.message_id {
            self.message_id_table.insert(id.clone(), uid);
        }
        let parent = in_reply_to
            .filter(|_| self.thread_replies)
            .and_then(|id| self.message_id_table.get(id.trim()).copied())
            .filter(|parent| *parent != uid);
        match parent.and_then(|p| self.uid_table.get_mut(&p)) {
            Some(parent) => parent.replies.push(uid),
            None => self.roots.push(uid),
        }
        self.last_uid = self.last_uid.max(uid.0);
        self.uid_table.insert(uid, item);
        true
    }

    fn remove(&mut self, uid: Uid) -> Option<SummaryItem> {
        let item = self.uid_table.remove(&uid)?;
        let replies = item.replies.clone();
        if let Some(pos) = self.roots.iter().position(|u| *u == uid) {
            self.roots.splice(pos..=pos, replies.iter().copied());
        } else if let Some(parent) = self
            .uid_table
            .values_mut()
            .find(|p| p.replies.contains(&uid))
            && let Some(pos) = parent.replies.iter().position(|u| *u == uid)
        {
            parent.replies.splice(pos..=pos, replies.iter().copied());
        }
        for reply in &replies {
            self.invalidate_subtree(*reply);
        }
        if let Some(id) = &item.message_id
            && self.message_id_table.get(id) == Some(&uid)
        {
            let survivor = self
                .uid_table
                .values()
                .find(|other| other.message_id.as_ref() == Some(id))
                .map(|other| other.uid);
            match survivor {
                Some(other) => self.message_id_table.insert(id.clone(), other),
                None => self.message_id_table.remove(id),
            };
        }
        Some(item)
    }

    fn invalidate_subtree(&mut self, uid: Uid) {
        let mut stack = vec![uid];
        while let Some(uid) = stack.pop() {
            if let Some(item) = self.uid_table.get_mut(&uid) {
                item.invalidate();
                stack.extend(item.replies.iter().copied());
            }
        }
    }

    fn write_lines(&self, uids: &[Uid], level: usize, out: &mut String) {
        for uid in uids {
            if let Some(item) = self.uid_table.get(uid) {
                out.push_str(item.line(level));
                self.write_lines(&item.replies, level + 1, out);
            }
        }
    }

    fn to_file(&self) -> SummaryFile {
        SummaryFile {
            version: FORMAT_VERSION,
            mailbox: self.mailbox.clone(),
            uidvalidity: self.uidvalidity,
            last_uid: self.last_uid,
            roots: self.roots.clone(),
            items: self.uid_table.values().cloned().collect(),
        }
    }

    fn from_file(file: SummaryFile) -> Self {
        let mut data = Self {
            mailbox: file.mailbox,
            roots: file.roots,
            last_uid: file.last_uid,
            uidvalidity: file.uidvalidity,
            ..Self::default()
        };
        for item in file.items {
            if let Some(id) = &item.message_id {
                data.message_id_table.insert(id.clone(), item.uid);
            }
            data.uid_table.insert(item.uid, item);
        }
        data.thread_replies = data.uid_table.values().any(|i| !i.replies.is_empty());
        data
    }
}

/// A mailbox summary shared between tasks.
#[derive(Debug, Default)]
pub struct Summary {
    inner: Mutex<SummaryData>,
}

impl Summary {
    /// Creates an empty summary for `mailbox`.
    #[must_use]
    pub fn new(mailbox: &str) -> Self {
        Self {
            inner: Mutex::new(SummaryData {
                mailbox: mailbox.to_string(),
                ..SummaryData::default()
            }),
        }
    }

    /// Enables or disables attaching replies under their parent for items
    /// added from now on.
    #[must_use]
    pub fn with_threading(self, thread_replies: bool) -> Self {
        self.set_threading(thread_replies);
        self
    }

    /// Like [`Summary::with_threading`], for a summary that is already
    /// shared.
    pub fn set_threading(&self, thread_replies: bool) {
        self.lock().thread_replies = thread_replies;
    }

    fn lock(&self) -> MutexGuard<'_, SummaryData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads a summary cache under a shared file lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no cache exists, or an error if it
    /// cannot be read or decoded.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let lock = open_lock(path)?;
        lock.lock_shared()?;
        let contents = std::fs::read(path);
        lock.unlock()?;
        let contents = contents.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        let file: SummaryFile = serde_json::from_slice(&contents)?;
        if file.version != FORMAT_VERSION {
            return Err(Error::Config(format!(
                "summary cache {} has format version {}",
                path.display(),
                file.version
            )));
        }
        Ok(Self {
            inner: Mutex::new(SummaryData::from_file(file)),
        })
    }

    /// Loads a summary cache, or starts an empty one if none exists.
    ///
    /// An unreadable cache falls back to its `.old` backup, then to an
    /// empty summary.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than a missing file.
    pub fn load_or_new(mailbox: &str, path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(summary) => Ok(summary),
            Err(Error::NotFound(_)) => Ok(Self::new(mailbox)),
            Err(Error::Serde(_) | Error::Config(_)) => {
                tracing::warn!("Summary cache {} is unreadable, trying backup", path.display());
                Self::load(&backup_path(path)).or_else(|_| Ok(Self::new(mailbox)))
            }
            Err(e) => Err(e),
        }
    }

    /// Writes the summary to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; the previous cache file is then
    /// left as it was.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::NotFound(path.display().to_string()))?;
        create_private_dir(parent)?;

        let lock = open_lock(path)?;
        lock.lock()?;
        let result = self.write_locked(path, parent);
        lock.unlock()?;
        result
    }

    fn write_locked(&self, path: &Path, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec(&self.lock().to_file())?;
        if path.is_file() {
            std::fs::copy(path, backup_path(path))?;
        }
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        tracing::debug!("Saved summary to {}", path.display());
        Ok(())
    }

    /// Adds an item, threading it under the message it replies to when
    /// threading is enabled. Returns false if the UID is already present.
    pub fn add_item(&self, item: SummaryItem, in_reply_to: Option<&str>) -> bool {
        self.lock().add(item, in_reply_to)
    }

    /// Adds a batch under one lock acquisition, skipping UIDs already
    /// present. Returns the UIDs that were added.
    pub fn add_items<I>(&self, items: I) -> Vec<Uid>
    where
        I: IntoIterator<Item = (SummaryItem, Option<String>)>,
    {
        let mut data = self.lock();
        items
            .into_iter()
            .filter_map(|(item, in_reply_to)| {
                let uid = item.uid;
                data.add(item, in_reply_to.as_deref()).then_some(uid)
            })
            .collect()
    }

    /// Removes every item matching `pred`. Replies of a removed item take
    /// its place. Returns the removed items.
    pub fn delete_item_if<F>(&self, mut pred: F) -> Vec<SummaryItem>
    where
        F: FnMut(&SummaryItem) -> bool,
    {
        let mut data = self.lock();
        let doomed: Vec<Uid> = data
            .uid_table
            .values()
            .filter(|item| pred(item))
            .map(|item| item.uid)
            .collect();
        let removed: Vec<SummaryItem> = doomed.into_iter().filter_map(|uid| data.remove(uid)).collect();
        if let Some(max) = data.uid_table.keys().next_back() {
            data.last_uid = max.0;
        }
        removed
    }

    /// Returns a copy of the item with `uid`.
    #[must_use]
    pub fn get(&self, uid: Uid) -> Option<SummaryItem> {
        self.lock().uid_table.get(&uid).cloned()
    }

    /// Runs `f` on the item with `uid` under the lock.
    pub fn update<R>(&self, uid: Uid, f: impl FnOnce(&mut SummaryItem) -> R) -> Option<R> {
        self.lock().uid_table.get_mut(&uid).map(f)
    }

    /// UIDs of every item, ascending.
    #[must_use]
    pub fn uids(&self) -> Vec<Uid> {
        self.lock().uid_table.keys().copied().collect()
    }

    /// Top-level UIDs in display order.
    #[must_use]
    pub fn roots(&self) -> Vec<Uid> {
        self.lock().roots.clone()
    }

    /// Whether an item with `uid` exists.
    #[must_use]
    pub fn contains(&self, uid: Uid) -> bool {
        self.lock().uid_table.contains_key(&uid)
    }

    /// Looks up a UID by Message-ID.
    #[must_use]
    pub fn uid_for_message_id(&self, message_id: &str) -> Option<Uid> {
        self.lock().message_id_table.get(message_id).copied()
    }

    /// Number of items, replies included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().uid_table.len()
    }

    /// Whether the summary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().uid_table.is_empty()
    }

    /// Every item's line, replies indented under their parents.
    #[must_use]
    pub fn to_text(&self) -> String {
        let data = self.lock();
        let mut out = String::new();
        data.write_lines(&data.roots, 0, &mut out);
        out
    }

    /// Mailbox name.
    #[must_use]
    pub fn mailbox(&self) -> String {
        self.lock().mailbox.clone()
    }

    /// Highest UID ever added.
    #[must_use]
    pub fn last_uid(&self) -> Uid {
        Uid(self.lock().last_uid)
    }

    /// Recorded UIDVALIDITY.
    #[must_use]
    pub fn uidvalidity(&self) -> Option<u32> {
        self.lock().uidvalidity
    }

    /// Records the UIDVALIDITY the items belong to.
    pub fn set_uidvalidity(&self, uidvalidity: u32) {
        self.lock().uidvalidity = Some(uidvalidity);
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn backup_path(path: &Path) -> PathBuf {
    sibling(path, ".old")
}

fn open_lock(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sibling(path, ".lock"))?)
}

/// Display columns of `c`; control characters take none.
fn char_width(c: char) -> usize {
    UnicodeWidthChar::width(c).unwrap_or(0)
}

fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Cuts `s` to at most `width` columns.
fn truncate(s: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = char_width(c);
        if used + w > width {
            break;
        }
        used += w;
        out.push(c);
    }
    out
}

/// Cuts or pads `s` to exactly `width` columns.
pub(crate) fn fit(s: &str, width: usize) -> String {
    let mut out = truncate(s, width);
    let used = display_width(&out);
    out.extend(std::iter::repeat_n(' ', width - used));
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn item(uid: u32, message_id: Option<&str>) -> SummaryItem {
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let mut item = SummaryItem::new(
            Uid(uid),
            date,
            vec![Address::new(Some("Alice"), "alice", "example.com")],
            &format!("message {uid}"),
            Flags::from_vec(vec![Flag::Seen]),
        );
        item.message_id = message_id.map(str::to_string);
        item
    }

    #[test]
    fn test_line_format() {
        let line = item(7, None).render_line(0);
        let expected = format!("{:<78}\n", "7  03/09 14:05 [ Alice <alice@exa ] message 7");
        assert_eq!(line, expected);
    }

    #[test]
    fn test_lines_share_one_width() {
        let short = item(3, None);
        let mut long = item(4, None);
        long.subject = "a much longer subject than the other one 🚀".to_string();
        for line in [short.render_line(0), long.render_line(1)] {
            assert_eq!(display_width(line.trim_end_matches('\n')), LINE_WIDTH);
        }
    }

    #[test]
    fn test_line_marks_and_unknown_sender() {
        let mut it = item(1, None);
        it.from.clear();
        it.set_flags(Flags::new());
        let expected = format!("{:<78}\n", "1 u03/09 14:05 [ Unknown sender   ] message 1");
        assert_eq!(it.line(0), expected);
        it.set_flag(Flag::Flagged);
        assert!(it.line(0).starts_with("1 $03/09"));
    }

    #[test]
    fn test_line_width_with_wide_subject() {
        let mut it = item(12345, None);
        it.subject = "=?utf-8?B?".to_string() + "5pel5pys6Kqe" + "?=" + &"長".repeat(60);
        let line = it.render_line(2);
        assert!(line.contains("日本語"));
        assert!(display_width(line.trim_end_matches('\n')) <= LINE_WIDTH);
        assert!(line.contains("   [ "));
    }

    #[test]
    fn test_indent_is_capped() {
        let deep = item(1, None).render_line(20);
        let capped = item(1, None).render_line(MAX_INDENT_LEVEL);
        assert_eq!(deep, capped);
    }

    #[test]
    fn test_flag_round_trip_restores_flags() {
        let mut it = item(1, None);
        let original = it.flags().clone();
        let before = it.line(0).to_string();
        it.set_flag(Flag::Flagged);
        assert!(it.line(0).starts_with("1 $"));
        it.unset_flag(&Flag::Flagged);
        assert_eq!(it.flags(), &original);
        assert_eq!(it.line(0), before);
        assert!(it.toggle_flag(Flag::Answered));
        assert!(!it.toggle_flag(Flag::Answered));
    }

    #[test]
    fn test_parse_date() {
        let d = parse_date("Sat, 9 Mar 2024 15:05:00 +0100 (CET)").unwrap();
        assert_eq!(d, Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap());
        assert!(parse_date("yesterday").is_none());

        let env = Envelope {
            date: Some("garbage".to_string()),
            ..Envelope::default()
        };
        let it = SummaryItem::from_envelope(Uid(3), &env, Flags::new());
        assert_eq!(it.date, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_flat_by_default() {
        let summary = Summary::new("INBOX");
        assert!(summary.add_item(item(1, Some("<a@x>")), None));
        assert!(summary.add_item(item(2, Some("<b@x>")), Some("<a@x>")));
        assert!(!summary.add_item(item(2, None), None));
        assert_eq!(summary.roots(), vec![Uid(1), Uid(2)]);
        assert_eq!(summary.last_uid(), Uid(2));
        assert_eq!(summary.uid_for_message_id("<b@x>"), Some(Uid(2)));
    }

    #[test]
    fn test_threaded_replies() {
        let summary = Summary::new("INBOX").with_threading(true);
        summary.add_item(item(1, Some("<a@x>")), None);
        summary.add_item(item(2, Some("<b@x>")), Some("<a@x>"));
        summary.add_item(item(3, Some("<c@x>")), Some("<b@x>"));
        summary.add_item(item(4, None), Some("<unknown@x>"));
        assert_eq!(summary.roots(), vec![Uid(1), Uid(4)]);
        assert_eq!(summary.len(), 4);

        let text = summary.to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains(" 14:05   [ "));
        assert!(lines[2].contains(" 14:05     [ "));
        assert!(lines[3].starts_with("4 "));
    }

    #[test]
    fn test_delete_promotes_replies() {
        let summary = Summary::new("INBOX").with_threading(true);
        summary.add_item(item(1, Some("<a@x>")), None);
        summary.add_item(item(2, Some("<b@x>")), Some("<a@x>"));
        summary.add_item(item(3, Some("<c@x>")), Some("<b@x>"));
        summary.add_item(item(9, None), None);

        let removed = summary.delete_item_if(|it| it.uid == Uid(1) || it.uid == Uid(9));
        assert_eq!(removed.len(), 2);
        assert_eq!(summary.roots(), vec![Uid(2)]);
        assert_eq!(summary.get(Uid(2)).unwrap().replies, vec![Uid(3)]);
        assert_eq!(summary.last_uid(), Uid(3));
        assert_eq!(summary.uid_for_message_id("<a@x>"), None);
        assert!(summary.to_text().starts_with("2  03/09 14:05 [ "));
    }

    #[test]
    fn test_delete_keeps_duplicate_message_id_reachable() {
        let summary = Summary::new("INBOX");
        summary.add_item(item(1, Some("<dup@x>")), None);
        summary.add_item(item(2, Some("<dup@x>")), None);
        summary.add_item(item(3, Some("<other@x>")), None);

        summary.delete_item_if(|it| it.uid == Uid(2));
        assert_eq!(summary.uid_for_message_id("<dup@x>"), Some(Uid(1)));
        assert_eq!(summary.uid_for_message_id("<other@x>"), Some(Uid(3)));

        summary.delete_item_if(|it| it.uid == Uid(1));
        assert_eq!(summary.uid_for_message_id("<dup@x>"), None);
    }

    #[test]
    fn test_delete_everything_keeps_last_uid() {
        let summary = Summary::new("INBOX");
        summary.add_item(item(5, None), None);
        summary.delete_item_if(|_| true);
        assert!(summary.is_empty());
        assert_eq!(summary.last_uid(), Uid(5));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary").join("INBOX").join(".summary");
        let summary = Summary::new("INBOX").with_threading(true);
        summary.add_item(item(1, Some("<a@x>")), None);
        summary.add_item(item(2, None), Some("<a@x>"));
        summary.set_uidvalidity(100);
        summary.update(Uid(2), |it| it.cache_id = Some("ab".repeat(32)));
        summary.save(&path).unwrap();

        let loaded = Summary::load(&path).unwrap();
        assert_eq!(loaded.uids(), summary.uids());
        assert_eq!(loaded.last_uid(), summary.last_uid());
        assert_eq!(loaded.uidvalidity(), Some(100));
        assert_eq!(loaded.mailbox(), "INBOX");
        assert_eq!(loaded.to_text(), summary.to_text());
        assert_eq!(loaded.get(Uid(2)).unwrap().cache_id, Some("ab".repeat(32)));
        assert_eq!(loaded.uid_for_message_id("<a@x>"), Some(Uid(1)));
    }

    #[test]
    fn test_second_save_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".summary");
        let summary = Summary::new("INBOX");
        summary.add_item(item(1, None), None);
        summary.save(&path).unwrap();
        summary.add_item(item(2, None), None);
        summary.save(&path).unwrap();

        let old = Summary::load(&backup_path(&path)).unwrap();
        assert_eq!(old.uids(), vec![Uid(1)]);
        assert_eq!(Summary::load(&path).unwrap().uids(), vec![Uid(1), Uid(2)]);
        assert!(sibling(&path, ".lock").exists());
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".summary");
        assert!(matches!(Summary::load(&path), Err(Error::NotFound(_))));
        assert!(Summary::load_or_new("INBOX", &path).unwrap().is_empty());

        let summary = Summary::new("INBOX");
        summary.add_item(item(1, None), None);
        summary.save(&path).unwrap();
        summary.save(&path).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();
        let recovered = Summary::load_or_new("INBOX", &path).unwrap();
        assert_eq!(recovered.uids(), vec![Uid(1)]);
    }

    #[test]
    fn test_failed_save_leaves_previous_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".summary");
        let summary = Summary::new("INBOX");
        summary.add_item(item(1, None), None);
        summary.save(&path).unwrap();

        // A directory where the backup should go makes the copy fail.
        std::fs::create_dir(backup_path(&path)).unwrap();
        summary.add_item(item(2, None), None);
        assert!(summary.save(&path).is_err());
        assert_eq!(Summary::load(&path).unwrap().uids(), vec![Uid(1)]);
    }

    #[test]
    fn test_fit_and_truncate() {
        assert_eq!(fit("abc", 5), "abc  ");
        assert_eq!(fit("日本語", 5), "日本 ");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(display_width("a日"), 3);
    }

    #[test]
    fn test_emoji_and_combining_widths() {
        assert_eq!(char_width('🚀'), 2);
        assert_eq!(char_width('\u{301}'), 0);
        assert_eq!(char_width('✅'), 2);
        assert_eq!(fit("e\u{301}🚀x", 4), "e\u{301}🚀x");
    }

    proptest! {
        #[test]
        fn prop_distinct_uids_are_all_retrievable(
            uids in prop::collection::btree_set(1u32..10_000, 0..50),
            threaded in any::<bool>(),
        ) {
            let summary = Summary::new("INBOX").with_threading(threaded);
            let mut previous: Option<String> = None;
            for uid in &uids {
                let id = format!("<{uid}@x>");
                summary.add_item(item(*uid, Some(&id)), previous.as_deref());
                previous = Some(id);
            }
            prop_assert_eq!(summary.len(), uids.len());
            prop_assert_eq!(summary.to_text().lines().count(), uids.len());
            for uid in &uids {
                prop_assert!(summary.get(Uid(*uid)).is_some());
            }
            prop_assert_eq!(summary.last_uid().0, uids.iter().max().copied().unwrap_or(0));
        }
    }
}
