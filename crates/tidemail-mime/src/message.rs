//! MIME message structure and handling.
//!
//! A message is a tree of [`Part`]s. Every node is one of three kinds:
//! a leaf with a (transfer-encoded) body, a multipart container, or an
//! embedded `message/rfc822` whose content is parsed into its own subtree.

use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{decode_base64, decode_eword, decode_quoted_printable, to_utf8};
use crate::error::{Error, Result};
use crate::header::{Headers, split_header_body};
use crate::html::html_to_text;
use bytes::Bytes;
use std::fmt;
use std::ops::Deref;

/// Parts nested deeper than this are kept as opaque leaves.
const MAX_DEPTH: usize = 32;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }

    /// Decodes `data` according to this encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if Base64 data is malformed.
    pub fn decode(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(data),
            Self::QuotedPrintable => Ok(decode_quoted_printable(data)),
            _ => Ok(data.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// What a [`Part`] contains.
#[derive(Debug, Clone)]
pub enum PartKind {
    /// A body part; `body` is still transfer-encoded.
    Leaf {
        /// Raw body bytes.
        body: Bytes,
    },
    /// A multipart container.
    Multipart {
        /// Child parts in order.
        parts: Vec<Part>,
    },
    /// An embedded `message/rfc822`.
    Message {
        /// The embedded message, parsed.
        message: Box<Part>,
    },
}

/// One node of a MIME tree.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part content.
    pub kind: PartKind,
    raw: Bytes,
}

impl Part {
    /// Creates a leaf part.
    #[must_use]
    pub fn leaf(headers: Headers, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            headers,
            raw: body.clone(),
            kind: PartKind::Leaf { body },
        }
    }

    /// Creates a multipart part from already built children.
    #[must_use]
    pub fn multipart(headers: Headers, parts: Vec<Self>) -> Self {
        Self {
            headers,
            kind: PartKind::Multipart { parts },
            raw: Bytes::new(),
        }
    }

    /// Parses a part (or a whole message) from raw bytes.
    ///
    /// Parsing is lenient: a multipart without a usable boundary, or with an
    /// unparsable content type, is kept as a leaf so it can still be shown.
    #[must_use]
    pub fn parse(raw: impl Into<Bytes>) -> Self {
        Self::parse_at(raw.into(), 0)
    }

    fn parse_at(raw: Bytes, depth: usize) -> Self {
        let (head, _) = split_header_body(&raw);
        let head_len = head.len();
        let headers = Headers::parse(head).unwrap_or_default();
        let body = raw.slice(head_len..);
        let kind = Self::parse_kind(&headers, body, depth);
        Self { headers, kind, raw }
    }

    fn parse_kind(headers: &Headers, body: Bytes, depth: usize) -> PartKind {
        let content_type = headers
            .get("content-type")
            .and_then(|v| ContentType::parse(v).ok());
        let Some(content_type) = content_type.filter(|_| depth < MAX_DEPTH) else {
            return PartKind::Leaf { body };
        };

        if content_type.is_multipart() {
            if let Some(boundary) = content_type.boundary() {
                let parts = split_multipart(&body, boundary)
                    .into_iter()
                    .map(|(start, end)| Self::parse_at(body.slice(start..end), depth + 1))
                    .collect();
                return PartKind::Multipart { parts };
            }
            tracing::debug!("multipart without boundary kept as leaf");
        } else if content_type.is_message() {
            let encoding = headers
                .get("content-transfer-encoding")
                .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);
            let inner = match encoding {
                TransferEncoding::Base64 | TransferEncoding::QuotedPrintable => {
                    match encoding.decode(&body) {
                        Ok(decoded) => Bytes::from(decoded),
                        Err(_) => return PartKind::Leaf { body },
                    }
                }
                _ => body,
            };
            return PartKind::Message {
                message: Box::new(Self::parse_at(inner, depth + 1)),
            };
        }

        PartKind::Leaf { body }
    }

    /// Returns the exact bytes this part was parsed from (headers and body).
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Gets the content type, defaulting to text/plain when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// The label shown in part tags: the decoded Content-Type value, or a
    /// `broken/type` marker when it cannot be parsed.
    #[must_use]
    pub fn content_type_label(&self) -> String {
        match self.headers.get("content-type") {
            None => "text/plain".to_string(),
            Some(value) => match ContentType::parse(value) {
                Ok(_) => decode_eword(value),
                Err(e) => format!("broken/type; error=\"{e}\""),
            },
        }
    }

    /// Gets the content disposition, if any.
    #[must_use]
    pub fn disposition(&self) -> Option<ContentDisposition> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Child parts of a multipart node; empty for other kinds.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        match &self.kind {
            PartKind::Multipart { parts } => parts,
            _ => &[],
        }
    }

    /// Checks for a multipart node.
    #[must_use]
    pub const fn is_multipart(&self) -> bool {
        matches!(self.kind, PartKind::Multipart { .. })
    }

    /// The embedded message of a `message/rfc822` node.
    #[must_use]
    pub fn embedded(&self) -> Option<&Self> {
        match &self.kind {
            PartKind::Message { message } => Some(message),
            _ => None,
        }
    }

    /// Checks for a PGP/MIME encrypted container.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.is_multipart()
            && self
                .content_type()
                .is_ok_and(|ct| ct.is("multipart", "encrypted"))
    }

    /// Checks for a PGP/MIME signed container.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.is_multipart()
            && self
                .content_type()
                .is_ok_and(|ct| ct.is("multipart", "signed"))
    }

    /// The decoded filename from Content-Disposition `filename` or
    /// Content-Type `name`.
    ///
    /// RFC 2231 values are decoded while parsing parameters; RFC 2047
    /// encoded words are decoded here. Undecodable input is returned
    /// literally.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        let from_disposition = self
            .disposition()
            .and_then(|d| d.filename().map(str::to_string));
        let name = from_disposition.or_else(|| {
            self.content_type()
                .ok()
                .and_then(|ct| ct.name().map(str::to_string))
        })?;
        Some(decode_eword(&name))
    }

    /// Checks whether this part is an attachment rather than inline
    /// content: an explicit `attachment` disposition, or a non-text leaf
    /// carrying a filename.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        if self.disposition().is_some_and(|d| d.is_attachment()) {
            return true;
        }
        matches!(self.kind, PartKind::Leaf { .. })
            && self.filename().is_some()
            && !self.content_type().is_ok_and(|ct| ct.is_text())
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// For an embedded message this is the message's raw bytes; a
    /// multipart has no body of its own.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails or the part is multipart.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match &self.kind {
            PartKind::Leaf { body } => self.transfer_encoding().decode(body),
            PartKind::Message { message } => Ok(message.raw.to_vec()),
            PartKind::Multipart { .. } => Err(Error::InvalidMultipart(
                "multipart parts have no body of their own".to_string(),
            )),
        }
    }

    /// Gets the decoded body as UTF-8 text with LF line endings.
    ///
    /// The declared charset is converted to UTF-8; unmappable bytes become
    /// `?`.
    ///
    /// # Errors
    ///
    /// Returns an error if transfer decoding fails or the content type is
    /// invalid.
    pub fn body_text(&self) -> Result<String> {
        let content_type = self.content_type()?;
        let decoded = self.decode_body()?;
        Ok(to_utf8(&decoded, content_type.charset()).replace("\r\n", "\n"))
    }

    /// Flattened searchable text across the whole subtree.
    ///
    /// Embedded messages contribute their subject and body, attachments
    /// only their filename; anything that fails to decode contributes
    /// nothing.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        match &self.kind {
            PartKind::Multipart { parts } => parts
                .iter()
                .map(Self::searchable_text)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            PartKind::Message { message } => {
                let subject = message.headers.get_decoded("subject").unwrap_or_default();
                let body = message.searchable_text();
                [subject, body]
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            PartKind::Leaf { .. } => {
                if self.is_attachment() {
                    return self.filename().unwrap_or_default();
                }
                match self.content_type() {
                    Ok(ct) if ct.is("text", "html") => {
                        self.body_text().map(|html| html_to_text(&html)).unwrap_or_default()
                    }
                    Ok(ct) if ct.is_text() => self.body_text().unwrap_or_default(),
                    _ => String::new(),
                }
            }
        }
    }
}

/// A parsed message: the root of a MIME tree plus envelope accessors.
#[derive(Debug, Clone)]
pub struct Message {
    root: Part,
}

impl Message {
    /// Parses a message from raw bytes.
    #[must_use]
    pub fn parse(raw: impl Into<Bytes>) -> Self {
        Self {
            root: Part::parse(raw),
        }
    }

    /// Wraps an existing part (for example a decrypted payload).
    #[must_use]
    pub const fn from_part(root: Part) -> Self {
        Self { root }
    }

    /// The root part.
    #[must_use]
    pub const fn root(&self) -> &Part {
        &self.root
    }

    /// Consumes the message, returning the root part.
    #[must_use]
    pub fn into_root(self) -> Part {
        self.root
    }

    /// Gets the From header.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.root.headers.get("from")
    }

    /// Gets the To header.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.root.headers.get("to")
    }

    /// Gets the Cc header.
    #[must_use]
    pub fn cc(&self) -> Option<&str> {
        self.root.headers.get("cc")
    }

    /// Gets the Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.root.headers.get("subject")
    }

    /// Gets the Date header.
    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.root.headers.get("date")
    }

    /// Gets the List-Id header.
    #[must_use]
    pub fn list_id(&self) -> Option<&str> {
        self.root.headers.get("list-id")
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.root.headers.get("message-id").map(str::trim)
    }

    /// Message ids from In-Reply-To and References, nearest ancestor first.
    #[must_use]
    pub fn parent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let mut push_all = |value: &str| {
            for id in extract_message_ids(value) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        };
        if let Some(in_reply_to) = self.root.headers.get("in-reply-to") {
            push_all(in_reply_to);
        }
        if let Some(references) = self.root.headers.get("references") {
            let mut refs = extract_message_ids(references);
            refs.reverse();
            for id in refs {
                push_all(&id);
            }
        }
        ids
    }
}

impl Deref for Message {
    type Target = Part;

    fn deref(&self) -> &Part {
        &self.root
    }
}

/// Extracts `<...>` message ids from a header value.
#[must_use]
pub fn extract_message_ids(value: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start..].find('>') else {
            break;
        };
        ids.push(rest[start..=start + len].to_string());
        rest = &rest[start + len + 1..];
    }
    ids
}

/// Finds the byte ranges of the parts of a multipart body.
///
/// The preamble and epilogue are dropped; a missing closing delimiter ends
/// the last part at the end of the body.
fn split_multipart(body: &[u8], boundary: &str) -> Vec<(usize, usize)> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| pos + i);
        let line = trim_line_end(&body[pos..line_end]);

        if let Some(suffix) = line.strip_prefix(delimiter)
            && (suffix.is_empty() || suffix == b"--")
        {
            if let Some(s) = start {
                let mut end = pos;
                if end > s && body[end - 1] == b'\n' {
                    end -= 1;
                    if end > s && body[end - 1] == b'\r' {
                        end -= 1;
                    }
                }
                ranges.push((s, end));
            }
            if suffix == b"--" {
                return ranges;
            }
            start = Some((line_end + 1).min(body.len()));
        }
        pos = line_end + 1;
    }

    if let Some(s) = start
        && s < body.len()
    {
        ranges.push((s, body.len()));
    }
    ranges
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    const MIXED: &str = concat!(
        "From: sender@example.com\r\n",
        "Subject: Test\r\n",
        "Message-ID: <root@example.com>\r\n",
        "Content-Type: multipart/mixed; boundary=\"abc123\"\r\n",
        "\r\n",
        "preamble\r\n",
        "--abc123\r\n",
        "Content-Type: text/plain; charset=iso-8859-1\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "caf=E9\r\n",
        "--abc123\r\n",
        "Content-Type: application/pdf; name=\"report.pdf\"\r\n",
        "Content-Disposition: attachment\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "JVBERi0=\r\n",
        "--abc123--\r\n",
        "epilogue\r\n",
    );

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_single_part() {
        let message = Message::parse(&b"Subject: Hi\r\n\r\nHello, World!\r\n"[..]);
        assert_eq!(message.subject(), Some("Hi"));
        assert!(!message.is_multipart());
        assert_eq!(message.body_text().unwrap(), "Hello, World!\n");
    }

    #[test]
    fn test_multipart_structure() {
        let message = Message::parse(MIXED.as_bytes().to_vec());
        let parts = message.children();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].body_text().unwrap(), "café");
        assert!(parts[1].is_attachment());
        assert_eq!(parts[1].filename().as_deref(), Some("report.pdf"));
        assert_eq!(parts[1].decode_body().unwrap(), b"%PDF-");
    }

    #[test]
    fn test_part_raw_is_exact() {
        let message = Message::parse(MIXED.as_bytes().to_vec());
        let raw = message.children()[0].raw();
        assert!(raw.starts_with(b"Content-Type: text/plain"));
        assert!(raw.ends_with(b"caf=E9"));
    }

    #[test]
    fn test_missing_closing_boundary() {
        let raw = "Content-Type: multipart/mixed; boundary=b\n\n--b\n\none\n--b\n\ntwo\n";
        let message = Message::parse(raw.as_bytes().to_vec());
        assert_eq!(message.children().len(), 2);
        assert_eq!(message.children()[1].body_text().unwrap(), "two\n");
    }

    #[test]
    fn test_multipart_without_boundary_is_leaf() {
        let message = Message::parse(&b"Content-Type: multipart/mixed\n\nbody"[..]);
        assert!(!message.is_multipart());
    }

    #[test]
    fn test_embedded_message() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=outer\n\n",
            "--outer\n",
            "Content-Type: message/rfc822\n\n",
            "Subject: inner\n",
            "Content-Type: text/plain\n\n",
            "inner body\n",
            "--outer--\n",
        );
        let message = Message::parse(raw.as_bytes().to_vec());
        let embedded = message.children()[0].embedded().unwrap();
        assert_eq!(embedded.headers.get("subject"), Some("inner"));
        assert_eq!(embedded.body_text().unwrap(), "inner body");
    }

    #[test]
    fn test_content_type_label() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "image/png; name=\"=?utf-8?B?SMOpbGxv?=.png\"");
        let part = Part::leaf(headers, Bytes::new());
        assert_eq!(part.content_type_label(), "image/png; name=\"Héllo.png\"");

        let mut headers = Headers::new();
        headers.add("Content-Type", "nonsense");
        let part = Part::leaf(headers, Bytes::new());
        assert!(part.content_type_label().starts_with("broken/type; error="));

        assert_eq!(Part::leaf(Headers::new(), Bytes::new()).content_type_label(), "text/plain");
    }

    #[test]
    fn test_parent_ids() {
        let raw = concat!(
            "In-Reply-To: <b@x>\n",
            "References: <a@x> <b@x>\n\n",
            "body",
        );
        let message = Message::parse(raw.as_bytes().to_vec());
        assert_eq!(message.parent_ids(), vec!["<b@x>", "<a@x>"]);
    }

    #[test]
    fn test_searchable_text() {
        let message = Message::parse(MIXED.as_bytes().to_vec());
        assert_eq!(message.searchable_text(), "café\nreport.pdf");
    }

    #[test]
    fn test_broken_base64_searchable_text_is_empty() {
        let raw = "Content-Type: text/plain\nContent-Transfer-Encoding: base64\n\n!!!notbase64";
        let message = Message::parse(raw.as_bytes().to_vec());
        assert!(message.body_text().is_err());
        assert_eq!(message.searchable_text(), "");
    }
}
