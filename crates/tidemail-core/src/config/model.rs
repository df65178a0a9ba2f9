//! Configuration model types.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::credentials;
use crate::{Error, Result};

/// Security/encryption mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// No encryption (not recommended).
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }
}

/// IMAP authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// `LOGIN` command.
    #[default]
    Login,
    /// `AUTHENTICATE PLAIN`.
    Plain,
    /// `AUTHENTICATE XOAUTH2`; the password field carries the token.
    XOAuth2,
}

/// IMAP server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (default: 993 for TLS, 143 for STARTTLS).
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication; empty means "ask the keyring".
    pub password: String,
    /// Authentication mechanism.
    pub auth_type: AuthType,
}

impl ImapConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None | Security::StartTls => 143,
            Security::Tls => 993,
        }
    }
}

/// One mail account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Account name; also names the account's data directory.
    pub name: String,
    /// Sender address used for outgoing mail.
    pub from: String,
    /// IMAP server settings.
    pub imap: ImapConfig,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of all persisted state.
    pub data_dir: PathBuf,
    /// The account to use.
    pub account: AccountConfig,
    /// Header fields shown above a rendered message, in order.
    pub display_header_fields: Vec<String>,
    /// Limit for connecting and authenticating.
    pub connect_timeout_secs: u64,
    /// Interval between keep-alive NOOPs.
    pub keep_alive_interval_secs: u64,
    /// Default directory for saved parts.
    pub save_directory: PathBuf,
    /// Messages read in this mailbox are neither cached nor indexed.
    pub spam_mailbox: Option<String>,
    /// Destination of `archive`.
    pub archive_mailbox: String,
    /// Mailbox receiving a copy of sent messages.
    pub outbox: Option<String>,
    /// Attach replies under their parent in the summary.
    pub thread_replies: bool,
    /// Envelopes fetched per UID FETCH during sync.
    pub fetch_batch_size: usize,
    /// Records per search result page.
    pub search_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tidemail"),
            account: AccountConfig::default(),
            display_header_fields: [
                "Subject",
                "Date",
                "From",
                "To",
                "Cc",
                "Reply-To",
                "User-Agent",
                "X-Mailer",
                "Content-Type",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            connect_timeout_secs: 10,
            keep_alive_interval_secs: 60,
            save_directory: PathBuf::from("/tmp"),
            spam_mailbox: None,
            archive_mailbox: "Archive".to_string(),
            outbox: None,
            thread_replies: false,
            fetch_batch_size: 1000,
            search_page_size: 100,
        }
    }
}

impl Config {
    /// `<config_dir>/tidemail/config.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tidemail")
            .join("config.json")
    }

    /// Loads the configuration from `path`; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes the configuration to `path` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Per-account data directory.
    #[must_use]
    pub fn account_dir(&self) -> PathBuf {
        self.data_dir.join(sanitize(&self.account.name))
    }

    /// Summary cache file for `mailbox`.
    #[must_use]
    pub fn summary_path(&self, mailbox: &str) -> PathBuf {
        self.account_dir()
            .join("summary")
            .join(sanitize(mailbox))
            .join(".summary")
    }

    /// Content-addressed mail cache directory.
    #[must_use]
    pub fn mail_dir(&self) -> PathBuf {
        self.account_dir().join("mail")
    }

    /// Search index database.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.account_dir().join("index.db")
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Keep-alive interval as a [`Duration`].
    #[must_use]
    pub const fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    /// The IMAP settings with the password filled in from the keyring when
    /// the configured one is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no password is configured or stored, or
    /// a credential error if the keyring cannot be read.
    pub fn imap_with_credentials(&self) -> Result<ImapConfig> {
        let mut imap = self.account.imap.clone();
        if imap.password.is_empty() {
            imap.password = credentials::get_imap_password(&self.account.name)?.ok_or_else(|| {
                Error::Config(format!("no IMAP password for account {:?}", self.account.name))
            })?;
        }
        if imap.port == 0 {
            imap.port = ImapConfig::default_port(imap.security);
        }
        Ok(imap)
    }
}

/// Turns a mailbox or account name into a relative path that stays below
/// its parent directory.
fn sanitize(name: &str) -> PathBuf {
    let path: PathBuf = Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if path.as_os_str().is_empty() {
        PathBuf::from("_")
    } else {
        path
    }
}
