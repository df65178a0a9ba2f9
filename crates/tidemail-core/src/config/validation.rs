//! Configuration validation.

use super::model::Config;

/// Validation error for the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Account name is empty.
    EmptyAccountName,
    /// Sender address format is invalid.
    InvalidFrom,
    /// IMAP host is empty.
    EmptyImapHost,
    /// IMAP username is empty.
    EmptyImapUsername,
    /// Connect timeout is zero.
    ZeroConnectTimeout,
    /// Keep-alive interval is zero.
    ZeroKeepAlive,
    /// Fetch batch size is zero.
    ZeroBatchSize,
    /// Search page size is zero.
    ZeroPageSize,
    /// Archive mailbox name is empty.
    EmptyArchiveMailbox,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyAccountName => "Account name is required",
            Self::InvalidFrom => "Invalid sender address format",
            Self::EmptyImapHost => "IMAP server is required",
            Self::EmptyImapUsername => "IMAP username is required",
            Self::ZeroConnectTimeout => "Connect timeout must be at least one second",
            Self::ZeroKeepAlive => "Keep-alive interval must be at least one second",
            Self::ZeroBatchSize => "Fetch batch size must be positive",
            Self::ZeroPageSize => "Search page size must be positive",
            Self::EmptyArchiveMailbox => "Archive mailbox is required",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyAccountName => "account.name",
            Self::InvalidFrom => "account.from",
            Self::EmptyImapHost => "account.imap.host",
            Self::EmptyImapUsername => "account.imap.username",
            Self::ZeroConnectTimeout => "connect_timeout_secs",
            Self::ZeroKeepAlive => "keep_alive_interval_secs",
            Self::ZeroBatchSize => "fetch_batch_size",
            Self::ZeroPageSize => "search_page_size",
            Self::EmptyArchiveMailbox => "archive_mailbox",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field(), self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a configuration.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate a configuration.
///
/// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all errors.
/// An empty password is valid: it is looked up in the keyring on connect.
///
/// # Errors
///
/// Returns a vector of `ValidationError` if any fields are invalid.
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut errors = Vec::new();

    if config.account.name.trim().is_empty() {
        errors.push(ValidationError::EmptyAccountName);
    }
    if !config.account.from.trim().is_empty() && !is_valid_email(&config.account.from) {
        errors.push(ValidationError::InvalidFrom);
    }
    if config.account.imap.host.trim().is_empty() {
        errors.push(ValidationError::EmptyImapHost);
    }
    if config.account.imap.username.trim().is_empty() {
        errors.push(ValidationError::EmptyImapUsername);
    }
    if config.connect_timeout_secs == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }
    if config.keep_alive_interval_secs == 0 {
        errors.push(ValidationError::ZeroKeepAlive);
    }
    if config.fetch_batch_size == 0 {
        errors.push(ValidationError::ZeroBatchSize);
    }
    if config.search_page_size == 0 {
        errors.push(ValidationError::ZeroPageSize);
    }
    if config.archive_mailbox.trim().is_empty() {
        errors.push(ValidationError::EmptyArchiveMailbox);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Basic email validation; accepts `Name <addr>` as well as a bare address.
fn is_valid_email(from: &str) -> bool {
    let from = from.trim();
    let email = match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from,
    };

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    !domain.is_empty() && domain.contains('.') && domain.split('.').all(|p| !p.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.account.name = "work".to_string();
        config.account.from = "Alice <alice@example.com>".to_string();
        config.account.imap.host = "imap.example.com".to_string();
        config.account.imap.username = "alice".to_string();
        config
    }

    #[test]
    fn test_valid_email() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("User Name <user@sub.example.com>"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("user"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user@@example.com"));
    }

    #[test]
    fn test_validate_default_config() {
        let errors = validate_config(&Config::default()).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptyAccountName));
        assert!(errors.contains(&ValidationError::EmptyImapHost));
        assert!(!errors.contains(&ValidationError::InvalidFrom));
    }

    #[test]
    fn test_validate_complete_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = valid_config();
        config.fetch_batch_size = 0;
        config.search_page_size = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors.iter().map(ValidationError::field).collect::<Vec<_>>(),
            ["fetch_batch_size", "search_page_size"]
        );
    }
}
