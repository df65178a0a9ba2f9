//! Content-addressed store of raw messages.
//!
//! A message is stored under the SHA-256 of its header block, fanned out
//! by the first two hex digits: `<dir>/ab/abcdef...`. Entries are
//! immutable; a write goes to a temporary file in the target directory and
//! is renamed into place, so readers never see a partial file.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tidemail_mime::split_header_body;

use crate::{Error, Result};

/// On-disk mail cache.
#[derive(Debug, Clone)]
pub struct MailCache {
    dir: PathBuf,
}

impl MailCache {
    /// Opens (lazily creates) a cache rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache root.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Computes the cache id of a raw message: the hex SHA-256 of its
    /// header block including the terminating blank line.
    #[must_use]
    pub fn cache_id(raw: &[u8]) -> String {
        let (header, _) = split_header_body(raw);
        format!("{:x}", Sha256::digest(header))
    }

    /// The file path of a cache entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `cache_id` is not a lowercase hex
    /// digest.
    pub fn path(&self, cache_id: &str) -> Result<PathBuf> {
        validate_id(cache_id)?;
        Ok(self.dir.join(&cache_id[..2]).join(cache_id))
    }

    /// Whether an entry exists.
    #[must_use]
    pub fn contains(&self, cache_id: &str) -> bool {
        self.path(cache_id).is_ok_and(|p| p.is_file())
    }

    /// Stores a raw message and returns its cache id.
    ///
    /// An existing entry with the same id is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&self, raw: &[u8]) -> Result<String> {
        let cache_id = Self::cache_id(raw);
        let path = self.path(&cache_id)?;
        if path.is_file() {
            tracing::debug!(cache_id, "mail already cached");
            return Ok(cache_id);
        }
        let parent = path
            .parent()
            .ok_or_else(|| Error::NotFound(path.display().to_string()))?;
        create_private_dir(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(raw)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)?;
        tracing::debug!(cache_id, "cached mail");
        Ok(cache_id)
    }

    /// Reads an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the entry does not exist.
    pub fn read(&self, cache_id: &str) -> Result<Vec<u8>> {
        let path = self.path(cache_id)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(format!("cache entry {cache_id}")),
            _ => Error::Io(e),
        })
    }

    /// Deletes an entry; a missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, cache_id: &str) -> Result<()> {
        let path = self.path(cache_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_id(cache_id: &str) -> Result<()> {
    if cache_id.len() >= 3
        && cache_id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        Ok(())
    } else {
        Err(Error::NotFound(format!("invalid cache id {cache_id:?}")))
    }
}

/// Creates `dir` and missing parents, readable by the owner only.
pub(crate) fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MAIL: &[u8] = b"Message-ID: <1@example.com>\r\nSubject: hi\r\n\r\nbody one\r\n";

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MailCache::new(dir.path().join("mail"));
        let id = cache.write(MAIL).unwrap();
        assert_eq!(id.len(), 64);
        assert_eq!(cache.read(&id).unwrap(), MAIL);
        assert!(cache.contains(&id));
        assert_eq!(
            cache.path(&id).unwrap(),
            dir.path().join("mail").join(&id[..2]).join(&id)
        );
    }

    #[test]
    fn test_same_header_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MailCache::new(dir.path());
        let other = b"Message-ID: <1@example.com>\r\nSubject: hi\r\n\r\nanother body\r\n";
        let first = cache.write(MAIL).unwrap();
        let second = cache.write(other).unwrap();
        assert_eq!(first, second);
        // The first write wins; entries are immutable.
        assert_eq!(cache.read(&first).unwrap(), MAIL);
    }

    #[test]
    fn test_id_covers_blank_line() {
        let with_blank = MailCache::cache_id(b"A: 1\n\nbody");
        let without = MailCache::cache_id(b"A: 1\n");
        assert_ne!(with_blank, without);
        assert_eq!(with_blank, MailCache::cache_id(b"A: 1\n\nother"));
    }

    #[test]
    fn test_missing_and_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MailCache::new(dir.path());
        let missing = "ab".repeat(32);
        assert!(matches!(cache.read(&missing), Err(Error::NotFound(_))));
        assert!(matches!(cache.read("../etc/passwd"), Err(Error::NotFound(_))));
        assert!(!cache.contains("ZZZ"));
        cache.remove(&missing).unwrap();
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MailCache::new(dir.path());
        let id = cache.write(MAIL).unwrap();
        cache.remove(&id).unwrap();
        assert!(!cache.contains(&id));
    }

    #[cfg(unix)]
    #[test]
    fn test_directories_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache = MailCache::new(dir.path().join("mail"));
        let id = cache.write(MAIL).unwrap();
        let fan_out = cache.path(&id).unwrap().parent().unwrap().to_path_buf();
        let mode = std::fs::metadata(fan_out).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
