//! Text rendering and part lookup.
//!
//! Rendering walks the tree once and prints a `[<path> <content-type>]` tag
//! for every part below the root. [`Renderer::dig_part`] walks the same
//! tree with the same rules, so any tag printed by [`Renderer::render`]
//! resolves to the part it was printed for:
//!
//! - children of a multipart are numbered from 1;
//! - an embedded `message/rfc822` does not take a path segment of its own,
//!   its children continue the path of the part that contains it;
//! - an encrypted message (the root or an embedded one) is replaced by its
//!   plaintext before its children are numbered.

use crate::crypto::{Crypto, validity_line};
use crate::error::{Error, Result};
use crate::html::html_to_text;
use crate::message::{Message, Part, PartKind};
use crate::path::PartPath;

const ENCRYPTED_BANNER: &str = "[PGP/MIME encrypted message]\n";
const SIGNATURE_BANNER: &str = "[PGP/MIME signature]\n";

/// Renders messages to text and resolves part paths.
pub struct Renderer<'a> {
    display_fields: Vec<String>,
    crypto: Option<&'a dyn Crypto>,
}

impl<'a> Renderer<'a> {
    /// Creates a renderer showing the given header fields, in order.
    #[must_use]
    pub fn new<I, S>(display_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            display_fields: display_fields.into_iter().map(Into::into).collect(),
            crypto: None,
        }
    }

    /// Enables decryption and signature checks through `crypto`.
    ///
    /// Without a crypto capability, encrypted and signed messages render as
    /// ordinary multiparts.
    #[must_use]
    pub fn with_crypto(mut self, crypto: &'a dyn Crypto) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Renders the configured header fields, a blank line and the body.
    #[must_use]
    pub fn render(&self, message: &Message) -> String {
        self.render_message(message.root(), &PartPath::root())
    }

    /// Renders only the configured header fields.
    #[must_use]
    pub fn render_header(&self, message: &Message) -> String {
        self.header_block(message.root())
    }

    /// Renders the readable body text for quoting in a reply.
    ///
    /// No headers and no part tags are printed; only the first
    /// alternative is used and attachments are skipped.
    #[must_use]
    pub fn render_body_text(&self, message: &Message) -> String {
        self.message_text(message.root())
    }

    /// Quotes the body for a reply, prefixing every line with `> `.
    #[must_use]
    pub fn quote_reply(&self, message: &Message) -> String {
        self.render_body_text(message)
            .lines()
            .map(|line| format!("> {line}\n"))
            .collect()
    }

    /// Resolves `path` to a part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if a segment is out of range, or the
    /// crypto error if an encrypted message on the way cannot be decrypted.
    pub fn dig_part(&self, message: &Message, path: &PartPath) -> Result<Part> {
        let mut current = self.enter_message(message.root())?;
        for &segment in path.segments() {
            if let PartKind::Message { message } = &current.kind {
                current = self.enter_message(message)?;
            }
            current = segment
                .checked_sub(1)
                .and_then(|i| current.children().get(i))
                .cloned()
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    /// The part that stands for a message when numbering its children: the
    /// plaintext for an encrypted message, the message itself otherwise.
    fn enter_message(&self, root: &Part) -> Result<Part> {
        if let Some(crypto) = self.crypto
            && root.is_encrypted()
        {
            let decrypted = crypto.decrypt(root)?;
            return self.enter_message(decrypted.message.root());
        }
        Ok(root.clone())
    }

    fn render_message(&self, root: &Part, path: &PartPath) -> String {
        let mut out = self.header_block(root);
        out.push('\n');
        out.push_str(&self.render_body(root, path));
        out
    }

    fn header_block(&self, root: &Part) -> String {
        self.display_fields
            .iter()
            .filter_map(|name| {
                root.headers
                    .get_decoded(name)
                    .map(|value| format!("{name}: {value}\n"))
            })
            .collect()
    }

    fn render_body(&self, root: &Part, path: &PartPath) -> String {
        if let Some(crypto) = self.crypto
            && root.is_encrypted()
        {
            return match crypto.decrypt(root) {
                Ok(decrypted) => {
                    let mut out = ENCRYPTED_BANNER.to_string();
                    out.push_str(&self.render_message(decrypted.message.root(), path));
                    if !decrypted.signatures.is_empty() {
                        out.push_str(SIGNATURE_BANNER);
                        out.push_str(&validity_line(&decrypted.signatures));
                    }
                    out
                }
                Err(e) => {
                    tracing::debug!(error = %e, "decryption failed");
                    broken(&e)
                }
            };
        }

        let mut out = match &root.kind {
            PartKind::Multipart { .. } => self.render_children(root, path),
            PartKind::Message { message } => self.render_message(message, path),
            PartKind::Leaf { .. } => match body_text(root) {
                Ok(mut text) => {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text
                }
                Err(e) => broken(&e),
            },
        };
        out.push_str(&self.signature(root));
        out
    }

    fn signature(&self, root: &Part) -> String {
        let Some(crypto) = self.crypto else {
            return String::new();
        };
        if !root.is_signed() {
            return String::new();
        }
        match crypto.verify(root) {
            Ok(signatures) if signatures.is_empty() => String::new(),
            Ok(signatures) => validity_line(&signatures),
            Err(e) => broken(&e),
        }
    }

    fn render_children(&self, part: &Part, path: &PartPath) -> String {
        let alternative = is_alternative(part);
        part.children()
            .iter()
            .enumerate()
            .map(|(i, child)| {
                let child_path = path.child(i + 1);
                let mut out = format!("[{child_path} {}]\n", child.content_type_label());
                if !alternative || i == 0 {
                    out.push_str(&self.render_content(child, &child_path));
                }
                out
            })
            .collect()
    }

    fn render_content(&self, part: &Part, path: &PartPath) -> String {
        match &part.kind {
            PartKind::Multipart { .. } => self.render_children(part, path),
            PartKind::Message { message } => self.render_message(message, path),
            PartKind::Leaf { .. } => {
                if part.is_attachment() {
                    return String::new();
                }
                match part.content_type() {
                    Ok(ct) if ct.is_text() => match text_content(part) {
                        Ok(text) => text,
                        Err(e) => broken(&e),
                    },
                    Ok(_) => String::new(),
                    Err(e) => broken(&e),
                }
            }
        }
    }

    fn message_text(&self, root: &Part) -> String {
        match self.enter_message(root) {
            Ok(root) => self.part_text(&root),
            Err(e) => broken(&e),
        }
    }

    fn part_text(&self, part: &Part) -> String {
        match &part.kind {
            PartKind::Multipart { parts } if is_alternative(part) => parts
                .first()
                .map(|first| self.part_text(first))
                .unwrap_or_default(),
            PartKind::Multipart { parts } => parts.iter().map(|p| self.part_text(p)).collect(),
            PartKind::Message { message } => self.message_text(message),
            PartKind::Leaf { .. } if part.is_attachment() => String::new(),
            PartKind::Leaf { .. } => match part.content_type() {
                Ok(ct) if ct.is_text() => text_content(part).unwrap_or_default(),
                _ => String::new(),
            },
        }
    }
}

fn is_alternative(part: &Part) -> bool {
    part.content_type()
        .is_ok_and(|ct| ct.is("multipart", "alternative"))
}

fn broken(error: &Error) -> String {
    format!("Broken part: {error}\n")
}

/// Decoded body of a non-multipart message; HTML converted.
fn body_text(part: &Part) -> Result<String> {
    let ct = part.content_type()?;
    let text = part.body_text()?;
    Ok(if ct.is("text", "html") {
        html_to_text(&text)
    } else {
        text
    })
}

/// Inline text of a text part, always ending with a newline.
fn text_content(part: &Part) -> Result<String> {
    let mut text = body_text(part)?;
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}
