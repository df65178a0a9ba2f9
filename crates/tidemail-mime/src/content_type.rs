//! MIME content type and disposition handling.

use crate::encoding::{decode_rfc2231, escape_bytes, percent_decode};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters (e.g., charset=utf-8, boundary=xxx), with RFC 2231
    /// continuations already joined and decoded.
    pub parameters: HashMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// Creates a text/plain content type.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Returns the `name` parameter if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.parameters.get("name").map(String::as_str)
    }

    /// Checks the type and subtype, ignoring case.
    #[must_use]
    pub fn is(&self, main_type: &str, sub_type: &str) -> bool {
        self.main_type.eq_ignore_ascii_case(main_type) && self.sub_type.eq_ignore_ascii_case(sub_type)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("text")
    }

    /// Checks if this is an embedded message.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.is("message", "rfc822")
    }

    /// Returns `type/subtype` without parameters.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the type or subtype is missing or contains
    /// characters not allowed in a MIME token.
    pub fn parse(s: &str) -> Result<Self> {
        let (type_str, params) = split_value(s);

        let (main_type, sub_type) = type_str
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(format!("missing subtype in {type_str:?}")))?;
        let main_type = main_type.trim().to_lowercase();
        let sub_type = sub_type.trim().to_lowercase();
        if !is_token(&main_type) || !is_token(&sub_type) {
            return Err(Error::InvalidContentType(format!(
                "invalid type {type_str:?}"
            )));
        }

        Ok(Self {
            main_type,
            sub_type,
            parameters: parse_parameters(params),
        })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;

        let sorted: BTreeMap<_, _> = self.parameters.iter().collect();
        for (key, value) in sorted {
            if value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
    }
}

/// Content-Disposition header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Disposition type, lowercased (`inline`, `attachment`, ...).
    pub kind: String,
    /// Parameters with RFC 2231 continuations joined and decoded.
    pub parameters: HashMap<String, String>,
}

impl ContentDisposition {
    /// Parses a Content-Disposition value. Never fails; an empty type
    /// parses as `inline`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (kind, params) = split_value(s);
        let kind = kind.trim().to_lowercase();
        Self {
            kind: if kind.is_empty() { "inline".to_string() } else { kind },
            parameters: parse_parameters(params),
        }
    }

    /// Returns true for `attachment` dispositions.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind == "attachment"
    }

    /// Returns the `filename` parameter if present.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.parameters.get("filename").map(String::as_str)
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?=".contains(c))
}

/// Splits `value; params` at the first unquoted semicolon.
fn split_value(s: &str) -> (&str, &str) {
    s.split_once(';').map_or((s.trim(), ""), |(v, p)| (v.trim(), p))
}

/// Splits a parameter list on semicolons outside quoted strings.
fn split_parameters(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.push(current);
    out
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => value.to_string(),
    }
}

/// One `name*section*=value` piece of an RFC 2231 parameter.
struct Section {
    index: u32,
    extended: bool,
    value: String,
}

/// Parses `; key=value` parameters, joining RFC 2231 continuations
/// (`name*0*=`, `name*1*=`) and decoding extended values. An extended value
/// in an unknown charset falls back to its literal, percent-decoded text.
fn parse_parameters(s: &str) -> HashMap<String, String> {
    let mut plain = HashMap::new();
    let mut sectioned: BTreeMap<String, Vec<Section>> = BTreeMap::new();

    for param in split_parameters(s) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        let value = unquote(value);

        match key.split_once('*') {
            None => {
                plain.insert(key, value);
            }
            Some((name, rest)) => {
                let extended = rest.ends_with('*') || rest.is_empty();
                let index = rest.trim_end_matches('*').parse().unwrap_or(0);
                sectioned.entry(name.to_string()).or_default().push(Section {
                    index,
                    extended,
                    value,
                });
            }
        }
    }

    for (name, mut sections) in sectioned {
        sections.sort_by_key(|s| s.index);
        let first_extended = sections.first().is_some_and(|s| s.extended);
        let joined: String = sections.iter().map(|s| s.value.as_str()).collect();
        let value = if first_extended {
            decode_rfc2231(&joined).unwrap_or_else(|| {
                let encoded = joined.rsplit('\'').next().unwrap_or(&joined);
                escape_bytes(&percent_decode(encoded))
            })
        } else {
            joined
        };
        plain.insert(name, value);
    }

    plain
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_new() {
        let ct = ContentType::new("text", "plain");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/Plain; charset=utf-8").unwrap();
        assert!(ct.is("text", "plain"));
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part;123\"").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("----=_Part;123"));
    }

    #[test]
    fn test_content_type_parse_rejects_garbage() {
        assert!(ContentType::parse("garbage").is_err());
        assert!(ContentType::parse("text/").is_err());
        assert!(ContentType::parse("te xt/plain").is_err());
    }

    #[test]
    fn test_content_type_display() {
        let ct = ContentType::text_plain()
            .with_parameter("charset", "utf-8")
            .with_parameter("format", "flowed");
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8; format=flowed");
    }

    #[test]
    fn test_rfc2231_continuations() {
        let ct = ContentType::parse(
            "application/pdf; name*0*=utf-8''%E6%97%A5; name*1*=%E6%9C%AC; name*2=.pdf",
        )
        .unwrap();
        assert_eq!(ct.name(), Some("日本.pdf"));
    }

    #[test]
    fn test_rfc2231_plain_continuations() {
        let cd = ContentDisposition::parse(
            "attachment; filename*0=\"long file\"; filename*1=\" name.txt\"",
        );
        assert!(cd.is_attachment());
        assert_eq!(cd.filename(), Some("long file name.txt"));
    }

    #[test]
    fn test_rfc2231_unknown_charset_falls_back() {
        let cd = ContentDisposition::parse("attachment; filename*=x-bogus''a%FFb.bin");
        assert_eq!(cd.filename(), Some("a<FF>b.bin"));
    }

    #[test]
    fn test_disposition_defaults_to_inline() {
        let cd = ContentDisposition::parse("");
        assert_eq!(cd.kind, "inline");
        assert!(!cd.is_attachment());
    }
}
