//! # tidemail-mime
//!
//! MIME parsing, text rendering and part addressing for email.
//!
//! ## Features
//!
//! - **Message parsing**: lenient MIME tree parsing with multipart and
//!   embedded `message/rfc822` support
//! - **Rendering**: readable text with `[path type]` tags for every part
//! - **Part addressing**: dotted paths that resolve back to rendered parts
//! - **Encoding/Decoding**: Base64, Quoted-Printable, RFC 2047 and RFC 2231
//! - **Charsets**: conversion of legacy charsets to UTF-8
//! - **PGP/MIME**: decryption and signature checks through a pluggable
//!   [`Crypto`] capability
//!
//! ## Quick Start
//!
//! ```ignore
//! use tidemail_mime::{Message, PartPath, Renderer};
//!
//! let message = Message::parse(raw_bytes);
//! let renderer = Renderer::new(["Subject", "From", "Date"]);
//! println!("{}", renderer.render(&message));
//!
//! // Every tag printed above can be resolved again.
//! let part = renderer.dig_part(&message, &PartPath::parse("2")?)?;
//! println!("{:?}", part.filename());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod crypto;
mod error;
mod header;
mod html;
mod message;
mod path;
mod render;

pub mod encoding;

pub use content_type::{ContentDisposition, ContentType};
pub use crypto::{Crypto, Decrypted, Signature, validity_line};
pub use error::{Error, Result};
pub use header::{Headers, split_header_body};
pub use html::html_to_text;
pub use message::{Message, Part, PartKind, TransferEncoding, extract_message_ids};
pub use path::PartPath;
pub use render::Renderer;
