//! Full-text and thread index over cached messages.
//!
//! One row per mail cache entry, stored in SQLite. Header fields are
//! decoded to single-line UTF-8 before they are stored; lowercased copies of
//! the subject and body back case-insensitive word search.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tidemail_mime::Message;
use tidemail_mime::encoding::decode_eword;

use crate::summary::{fit, parse_date};
use crate::{Error, Result};

/// Thread ids with this prefix were assigned by tidemail and are kept as
/// they are when seen in References.
pub const SYNTHETIC_THREAD_PREFIX: &str = "<tidemail-thread-";

/// An indexed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Mail cache id.
    pub cache_id: String,
    /// Message-ID header, if any.
    pub message_id: Option<String>,
    /// Id shared by every message of a conversation.
    pub thread_id: String,
    /// Date header; the Unix epoch when missing or unparsable.
    pub date: DateTime<Utc>,
    /// Decoded subject.
    pub subject: String,
    /// Decoded From header.
    pub from: String,
    /// Decoded To header.
    pub to: String,
    /// Decoded Cc header.
    pub cc: String,
    /// Decoded List-Id header.
    pub list_id: String,
    /// Plain-text body.
    pub body: String,
    /// Path of the cached message file.
    pub path: PathBuf,
}

impl IndexRecord {
    /// `"MM/DD HH:MM [ from ] subject"`.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "{} [ {} ] {}",
            self.date.format("%m/%d %H:%M"),
            fit(&self.from, 16),
            self.subject
        )
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// Matches on this page, newest first.
    pub records: Vec<IndexRecord>,
    /// 1-based page number.
    pub current_page: usize,
    /// Number of pages.
    pub n_pages: usize,
    /// Number of matches over all pages.
    pub total: usize,
}

/// Decodes a header for storage: RFC 2047 words expanded, line breaks
/// removed.
fn clean_header(value: Option<&str>) -> String {
    value
        .map(|v| decode_eword(v).replace(['\r', '\n'], ""))
        .unwrap_or_default()
}

/// Escapes `%`, `_` and `\` for a LIKE pattern.
fn escape_like(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    for c in word.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn record_from_row(row: &SqliteRow) -> IndexRecord {
    let date: i64 = row.get("date");
    let path: String = row.get("path");
    IndexRecord {
        cache_id: row.get("cache_id"),
        message_id: row.get("message_id"),
        thread_id: row.get("thread_id"),
        date: DateTime::from_timestamp(date, 0).unwrap_or(DateTime::UNIX_EPOCH),
        subject: row.get("subject"),
        from: row.get("from_addr"),
        to: row.get("to_addr"),
        cc: row.get("cc_addr"),
        list_id: row.get("list_id"),
        body: row.get("body"),
        path: PathBuf::from(path),
    }
}

const COLUMNS: &str = "cache_id, message_id, thread_id, date, subject, from_addr, to_addr, \
                       cc_addr, list_id, body, path";

/// SQLite-backed search index.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    pool: SqlitePool,
}

impl SearchIndex {
    /// Opens (creating if needed) the index database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(path: &Path) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let index = Self { pool };
        index.initialize().await?;
        Ok(index)
    }

    /// Creates an in-memory index for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let index = Self { pool };
        index.initialize().await?;
        Ok(index)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                cache_id TEXT PRIMARY KEY NOT NULL,
                message_id TEXT,
                thread_id TEXT NOT NULL,
                date INTEGER NOT NULL DEFAULT 0,
                subject TEXT NOT NULL DEFAULT '',
                from_addr TEXT NOT NULL DEFAULT '',
                to_addr TEXT NOT NULL DEFAULT '',
                cc_addr TEXT NOT NULL DEFAULT '',
                list_id TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                path TEXT NOT NULL,
                subject_key TEXT NOT NULL DEFAULT '',
                body_key TEXT NOT NULL DEFAULT ''
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(r"CREATE INDEX IF NOT EXISTS idx_messages_message_id ON messages(message_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(r"CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, date)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Indexes a cached message. Returns false if `cache_id` was already
    /// indexed, in which case nothing changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn index(&self, cache_id: &str, path: &Path, message: &Message) -> Result<bool> {
        if self.get(cache_id).await?.is_some() {
            return Ok(false);
        }

        let message_id = message.message_id().filter(|id| !id.is_empty());
        let thread_id = self.thread_id_for(message, message_id, cache_id).await?;
        let date = message.date().and_then(parse_date).unwrap_or(DateTime::UNIX_EPOCH);
        let subject = clean_header(message.subject());
        let body = message.searchable_text();

        sqlx::query(
            r"
            INSERT OR IGNORE INTO messages
                (cache_id, message_id, thread_id, date, subject, from_addr, to_addr,
                 cc_addr, list_id, body, path, subject_key, body_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(cache_id)
        .bind(message_id)
        .bind(&thread_id)
        .bind(date.timestamp())
        .bind(&subject)
        .bind(clean_header(message.from()))
        .bind(clean_header(message.to()))
        .bind(clean_header(message.cc()))
        .bind(clean_header(message.list_id()))
        .bind(&body)
        .bind(path.display().to_string())
        .bind(subject.to_lowercase())
        .bind(body.to_lowercase())
        .execute(&self.pool)
        .await?;

        tracing::debug!(cache_id, thread_id, "indexed message");
        Ok(true)
    }

    /// Thread of the nearest known ancestor, else the message's own id.
    async fn thread_id_for(
        &self,
        message: &Message,
        message_id: Option<&str>,
        cache_id: &str,
    ) -> Result<String> {
        for parent in message.parent_ids() {
            if parent.starts_with(SYNTHETIC_THREAD_PREFIX) {
                return Ok(parent);
            }
            let row = sqlx::query(r"SELECT thread_id FROM messages WHERE message_id = ? LIMIT 1")
                .bind(&parent)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return Ok(row.get("thread_id"));
            }
        }
        Ok(message_id.unwrap_or(cache_id).to_string())
    }

    /// Searches subjects and bodies. Every whitespace-separated word must
    /// occur, case-insensitively, in the subject or the body. Results are
    /// newest first; `page` is 1-based.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] for a blank query, or an error if the
    /// database query fails.
    pub async fn search(&self, query: &str, page: usize, page_size: usize) -> Result<SearchPage> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| format!("%{}%", escape_like(&w.to_lowercase())))
            .collect();
        if words.is_empty() {
            return Err(Error::InvalidQuery("empty search query".to_string()));
        }
        let page_size = page_size.max(1);
        let page = page.max(1);

        let condition = vec![
            r"(subject_key LIKE ? ESCAPE '\' OR body_key LIKE ? ESCAPE '\')";
            words.len()
        ]
        .join(" AND ");

        let count_sql = format!("SELECT COUNT(*) AS count FROM messages WHERE {condition}");
        let mut count_query = sqlx::query(&count_sql);
        for word in &words {
            count_query = count_query.bind(word).bind(word);
        }
        let count: i64 = count_query.fetch_one(&self.pool).await?.get("count");
        let total = usize::try_from(count).unwrap_or_default();

        let select_sql = format!(
            "SELECT {COLUMNS} FROM messages WHERE {condition} \
             ORDER BY date DESC, cache_id LIMIT ? OFFSET ?"
        );
        let mut select_query = sqlx::query(&select_sql);
        for word in &words {
            select_query = select_query.bind(word).bind(word);
        }
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let offset = i64::try_from((page - 1).saturating_mul(page_size)).unwrap_or(i64::MAX);
        let rows = select_query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(SearchPage {
            records: rows.iter().map(record_from_row).collect(),
            current_page: page,
            n_pages: total.div_ceil(page_size),
            total,
        })
    }

    /// Every message of a thread, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn thread(&self, thread_id: &str) -> Result<Vec<IndexRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM messages WHERE thread_id = ? ORDER BY date, cache_id");
        let rows = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Looks up a record by cache id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, cache_id: &str) -> Result<Option<IndexRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM messages WHERE cache_id = ?");
        let row = sqlx::query(&sql)
            .bind(cache_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    /// Number of indexed messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn len(&self) -> Result<usize> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM messages")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("count");
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Whether the index is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drops a record; a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn remove(&self, cache_id: &str) -> Result<()> {
        sqlx::query(r"DELETE FROM messages WHERE cache_id = ?")
            .bind(cache_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mail(id: &str, date: &str, subject: &str, extra: &str, body: &str) -> Message {
        Message::parse(format!(
            "Message-ID: {id}\r\nDate: {date}\r\nFrom: Alice <alice@example.com>\r\n\
             To: bob@example.com\r\nSubject: {subject}\r\n{extra}\r\n{body}\r\n"
        ))
    }

    async fn add(index: &SearchIndex, cache_id: &str, message: &Message) -> bool {
        index
            .index(cache_id, Path::new("/cache").join(cache_id).as_path(), message)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_is_idempotent() {
        let index = SearchIndex::in_memory().await.unwrap();
        let m = mail("<1@x>", "Mon, 1 Jan 2024 10:00:00 +0000", "Hello", "", "body");
        assert!(add(&index, "aaa1", &m).await);
        assert!(!add(&index, "aaa1", &m).await);
        assert_eq!(index.len().await.unwrap(), 1);

        let record = index.get("aaa1").await.unwrap().unwrap();
        assert_eq!(record.subject, "Hello");
        assert_eq!(record.from, "Alice <alice@example.com>");
        assert_eq!(record.thread_id, "<1@x>");
        assert_eq!(record.path, PathBuf::from("/cache/aaa1"));
        assert_eq!(record.summary_line(), "01/01 10:00 [ Alice <alice@exa ] Hello");
    }

    #[tokio::test]
    async fn test_headers_are_decoded() {
        let index = SearchIndex::in_memory().await.unwrap();
        let m = Message::parse(
            "Subject: =?utf-8?B?w6l0w6k=?=\r\n  suite\r\nList-Id: <rust.lists.example>\r\n\r\nhi\r\n",
        );
        add(&index, "bbb1", &m).await;
        let record = index.get("bbb1").await.unwrap().unwrap();
        assert!(record.subject.starts_with("été"));
        assert!(!record.subject.contains('\n'));
        assert_eq!(record.list_id, "<rust.lists.example>");
        assert_eq!(record.message_id, None);
        assert_eq!(record.thread_id, "bbb1");
        assert_eq!(record.date, DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn test_thread_ids_follow_ancestors() {
        let index = SearchIndex::in_memory().await.unwrap();
        let root = mail("<r@x>", "Mon, 1 Jan 2024 10:00:00 +0000", "Plan", "", "start");
        let reply = mail(
            "<a@x>",
            "Mon, 1 Jan 2024 11:00:00 +0000",
            "Re: Plan",
            "In-Reply-To: <r@x>\r\n",
            "ok",
        );
        let nested = mail(
            "<b@x>",
            "Mon, 1 Jan 2024 12:00:00 +0000",
            "Re: Plan",
            "References: <r@x> <a@x> <missing@x>\r\n",
            "agreed",
        );
        let synthetic = mail(
            "<c@x>",
            "Mon, 1 Jan 2024 13:00:00 +0000",
            "Other",
            "References: <tidemail-thread-42@x>\r\n",
            "x",
        );
        add(&index, "ccc3", &nested).await;
        add(&index, "ccc1", &root).await;
        add(&index, "ccc2", &reply).await;
        add(&index, "ccc4", &synthetic).await;

        let thread = index.thread("<r@x>").await.unwrap();
        let ids: Vec<&str> = thread.iter().map(|r| r.cache_id.as_str()).collect();
        assert_eq!(ids, ["ccc1", "ccc2"]);

        // Indexed before its ancestors, so it started its own thread.
        assert_eq!(index.get("ccc3").await.unwrap().unwrap().thread_id, "<b@x>");
        assert_eq!(
            index.get("ccc4").await.unwrap().unwrap().thread_id,
            "<tidemail-thread-42@x>"
        );
    }

    #[tokio::test]
    async fn test_search_words_and_paging() {
        let index = SearchIndex::in_memory().await.unwrap();
        for day in 1..=5 {
            let m = mail(
                &format!("<{day}@x>"),
                &format!("Mon, {day} Jan 2024 10:00:00 +0000"),
                &format!("Report {day}"),
                "",
                if day % 2 == 0 { "Quarterly NUMBERS" } else { "nothing" },
            );
            add(&index, &format!("ddd{day}"), &m).await;
        }

        let page = index.search("report numbers", 1, 10).await.unwrap();
        assert_eq!(page.total, 2);
        let ids: Vec<&str> = page.records.iter().map(|r| r.cache_id.as_str()).collect();
        assert_eq!(ids, ["ddd4", "ddd2"]);

        let page = index.search("REPORT", 2, 2).await.unwrap();
        assert_eq!((page.total, page.n_pages, page.current_page), (5, 3, 2));
        assert_eq!(page.records[0].cache_id, "ddd3");

        assert_eq!(index.search("100%", 1, 10).await.unwrap().total, 0);
        assert!(matches!(
            index.search("   ", 1, 10).await,
            Err(Error::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let index = SearchIndex::in_memory().await.unwrap();
        let m = mail("<1@x>", "Mon, 1 Jan 2024 10:00:00 +0000", "Hello", "", "body");
        add(&index, "eee1", &m).await;
        index.remove("eee1").await.unwrap();
        index.remove("eee1").await.unwrap();
        assert!(index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_persistent_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let index = SearchIndex::new(&path).await.unwrap();
            let m = mail("<1@x>", "Mon, 1 Jan 2024 10:00:00 +0000", "Kept", "", "body");
            add(&index, "fff1", &m).await;
        }
        let index = SearchIndex::new(&path).await.unwrap();
        assert_eq!(index.search("kept", 1, 10).await.unwrap().total, 1);
    }
}
