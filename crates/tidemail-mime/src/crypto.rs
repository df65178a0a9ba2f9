//! Pluggable OpenPGP capability.
//!
//! The renderer never implements cryptography itself; it hands
//! `multipart/encrypted` and `multipart/signed` parts to a [`Crypto`]
//! implementation supplied by the caller.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::message::Part;

/// One signature found on a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Signer identity, usually the key's user id.
    pub signer: Option<String>,
    /// Key fingerprint, shown when no signer identity is known.
    pub fingerprint: String,
    /// Whether the signature verified.
    pub valid: bool,
}

impl Signature {
    /// The name shown in validity lines.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.signer.as_deref().unwrap_or(&self.fingerprint)
    }
}

/// The result of decrypting a message.
#[derive(Debug, Clone)]
pub struct Decrypted {
    /// The decrypted plaintext message.
    pub message: Message,
    /// Signatures verified while decrypting; empty when unsigned.
    pub signatures: Vec<Signature>,
}

/// Formats the validity line for a set of signatures:
/// `Good signature from a, b` or `Bad signature from ...`.
#[must_use]
pub fn validity_line(signatures: &[Signature]) -> String {
    let validity = if !signatures.is_empty() && signatures.iter().all(|s| s.valid) {
        "Good"
    } else {
        "Bad"
    };
    let from = signatures
        .iter()
        .map(Signature::display_name)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{validity} signature from {from}\n")
}

/// OpenPGP operations used by rendering and composing.
pub trait Crypto: Send + Sync {
    /// Decrypts a `multipart/encrypted` part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if decryption fails.
    fn decrypt(&self, part: &Part) -> Result<Decrypted>;

    /// Verifies a `multipart/signed` part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if verification cannot be performed.
    fn verify(&self, part: &Part) -> Result<Vec<Signature>>;

    /// Signs a raw message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] unless implemented.
    fn sign(&self, _raw: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Unsupported("sign"))
    }

    /// Encrypts a raw message for its recipients.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] unless implemented.
    fn encrypt(&self, _raw: &[u8], _recipients: &[String]) -> Result<Vec<u8>> {
        Err(Error::Unsupported("encrypt"))
    }
}
