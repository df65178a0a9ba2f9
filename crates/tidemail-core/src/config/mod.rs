//! Configuration module.
//!
//! Provides the client configuration, its validation, and keyring-backed
//! credential lookup.

pub mod credentials;
mod model;
mod validation;

pub use credentials::{CredentialError, CredentialResult};
pub use model::{AccountConfig, AuthType, Config, ImapConfig, Security};
pub use validation::{ValidationError, ValidationResult, validate_config};
