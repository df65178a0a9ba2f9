//! Secure credential storage using system keyring.
//!
//! Provides secure storage for IMAP passwords using the platform's
//! native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use keyring::Entry;
use tracing::{debug, warn};

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "tidemail";

/// Credential type identifier for IMAP passwords.
const IMAP_CREDENTIAL: &str = "imap";

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// Account name is required for credential operations.
    #[error("Account name is required for credential storage")]
    MissingAccountName,
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Generates the keyring entry key for a credential.
fn credential_key(account: &str, credential_type: &str) -> CredentialResult<String> {
    if account.trim().is_empty() {
        return Err(CredentialError::MissingAccountName);
    }
    Ok(format!("{SERVICE_NAME}_{credential_type}_{account}"))
}

/// Stores IMAP password securely in the system keyring.
///
/// # Errors
///
/// Returns an error if the account name is empty or the keyring operation
/// fails.
pub fn store_imap_password(account: &str, password: &str) -> CredentialResult<()> {
    let key = credential_key(account, IMAP_CREDENTIAL)?;
    let entry = Entry::new(SERVICE_NAME, &key)?;
    entry.set_password(password)?;
    debug!("Stored IMAP password for account {account}");
    Ok(())
}

/// Retrieves IMAP password from the system keyring.
///
/// # Errors
///
/// Returns an error if the account name is empty or the keyring operation
/// fails.
pub fn get_imap_password(account: &str) -> CredentialResult<Option<String>> {
    let key = credential_key(account, IMAP_CREDENTIAL)?;
    let entry = Entry::new(SERVICE_NAME, &key)?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => {
            debug!("No IMAP password found for account {account}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes the IMAP password for an account from the keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails (except for missing entries).
pub fn delete_imap_password(account: &str) -> CredentialResult<()> {
    let key = credential_key(account, IMAP_CREDENTIAL)?;
    let entry = Entry::new(SERVICE_NAME, &key)?;
    match entry.delete_credential() {
        Ok(()) => {
            debug!("Deleted IMAP password for account {account}");
            Ok(())
        }
        Err(keyring::Error::NoEntry) => {
            debug!("No IMAP password to delete for account {account}");
            Ok(())
        }
        Err(e) => {
            warn!("Failed to delete IMAP password: {e}");
            Err(e.into())
        }
    }
}
