//! MIME encoding and decoding utilities.
//!
//! Supports Base64, Quoted-Printable, RFC 2047 encoded words, RFC 2231
//! parameter values and charset conversion to UTF-8.

use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use encoding_rs::Encoding;
use std::borrow::Cow;
use std::fmt::Write as _;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data.
///
/// Whitespace (line breaks inside MIME bodies) is ignored.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Maximum line length for Quoted-Printable encoding.
const MAX_LINE_LENGTH: usize = 76;

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Encodes bytes that are not printable ASCII or would interfere
/// with email transmission.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::new();
    let mut line_length = 0;

    for byte in text.as_bytes() {
        // Check if we need soft line break
        if line_length >= MAX_LINE_LENGTH - 3 {
            result.push_str("=\r\n");
            line_length = 0;
        }

        match byte {
            b'!'..=b'<' | b'>'..=b'~' => {
                result.push(*byte as char);
                line_length += 1;
            }
            b' ' => {
                if line_length >= MAX_LINE_LENGTH - 1 {
                    result.push_str("=20");
                    line_length += 3;
                } else {
                    result.push(' ');
                    line_length += 1;
                }
            }
            _ => {
                result.push('=');
                let _ = write!(result, "{byte:02X}");
                line_length += 3;
            }
        }
    }

    result
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Malformed escape sequences are kept literally instead of failing, so a
/// sloppy sender never makes a body unreadable.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break
        match data.get(i + 1) {
            Some(b'\r') if data.get(i + 2) == Some(&b'\n') => {
                i += 3;
                continue;
            }
            Some(b'\n') => {
                i += 2;
                continue;
            }
            _ => {}
        }

        match (data.get(i + 1), data.get(i + 2)) {
            (Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                result.push(hex_value(hi) << 4 | hex_value(lo));
                i += 3;
            }
            _ => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

const fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

/// Encodes a header value using RFC 2047 encoding.
///
/// Format: `=?charset?encoding?encoded-text?=`
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_rfc2047(text: &str, charset: &str) -> Result<String> {
    // Only encode if necessary (contains non-ASCII)
    if text.chars().all(|c| c.is_ascii() && c != '=' && c != '?') {
        return Ok(text.to_string());
    }

    let encoded = encode_base64(text.as_bytes());
    Ok(format!("=?{charset}?B?{encoded}?="))
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Whitespace between adjacent encoded words is dropped, tabs and line
/// breaks become spaces. Words in an unknown charset that are not valid
/// UTF-8 have their 8-bit bytes escaped as `<XX>`; words that cannot be
/// decoded at all are kept literally.
#[must_use]
pub fn decode_eword(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut last_was_word = false;

    while let Some(idx) = rest.find("=?") {
        let (before, candidate) = rest.split_at(idx);
        if let Some((decoded, consumed)) = parse_encoded_word(candidate) {
            if !(last_was_word && before.chars().all(char::is_whitespace)) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            last_was_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            last_was_word = false;
        }
    }
    out.push_str(rest);

    out.replace(['\t', '\r', '\n'], " ")
}

/// Parses one encoded word at the start of `s`, returning the decoded text
/// and the number of bytes consumed.
fn parse_encoded_word(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix("=?")?;
    let charset_end = body.find('?')?;
    let charset = &body[..charset_end];
    let after_charset = &body[charset_end + 1..];
    let mut chars = after_charset.chars();
    let encoding = chars.next()?.to_ascii_uppercase();
    if !matches!(encoding, 'B' | 'Q') || chars.next()? != '?' {
        return None;
    }
    let text_start = &after_charset[2..];
    let text_end = text_start.find("?=")?;
    let text = &text_start[..text_end];
    if charset.is_empty() || text.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding {
        'B' => decode_base64(text.as_bytes()).ok()?,
        'Q' => decode_quoted_printable(text.replace('_', " ").as_bytes()),
        _ => return None,
    };

    // RFC 2231 allows `charset*language`.
    let charset = charset.split('*').next().unwrap_or(charset);
    let decoded = decode_charset_strict(&bytes, charset).unwrap_or_else(|| escape_bytes(&bytes));
    let consumed = 2 + charset_end + 1 + 2 + text_end + 2;
    Some((decoded, consumed))
}

/// Decodes an RFC 2231 extended parameter value (`charset'lang'%XX...`).
///
/// Returns `None` if the value is not in extended form or its charset is
/// unknown.
#[must_use]
pub fn decode_rfc2231(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let charset = pieces.next()?;
    let _language = pieces.next()?;
    let encoded = pieces.next()?;
    let bytes = percent_decode(encoded);
    if charset.is_empty() {
        return Some(escape_bytes(&bytes));
    }
    decode_charset_strict(&bytes, charset)
}

/// Decodes `%XX` escapes, leaving malformed escapes untouched.
#[must_use]
pub fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1), bytes.get(i + 2)) {
            (b'%', Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                out.push(hex_value(hi) << 4 | hex_value(lo));
                i += 3;
            }
            (b, _, _) => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Decodes `bytes` in `charset`, failing on unknown labels or malformed
/// input.
fn decode_charset_strict(bytes: &[u8], charset: &str) -> Option<String> {
    let encoding = Encoding::for_label(charset.trim().as_bytes())?;
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
}

/// Converts body bytes in `charset` to UTF-8.
///
/// Unmappable bytes become `?`. `utf-8` and missing or unknown charsets
/// take the validate-and-repair path instead of a conversion.
#[must_use]
pub fn to_utf8(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .map(str::trim)
        .filter(|c| !c.eq_ignore_ascii_case("utf-8") && !c.eq_ignore_ascii_case("utf8"))
        .and_then(|c| Encoding::for_label(c.as_bytes()));

    match encoding {
        Some(encoding) => {
            let (decoded, had_errors) = encoding.decode_without_bom_handling(bytes);
            if had_errors {
                decoded.replace('\u{FFFD}', "?")
            } else {
                decoded.into_owned()
            }
        }
        None => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(bytes).replace('\u{FFFD}', "?"),
        },
    }
}

/// Returns `bytes` as text, escaping 8-bit bytes as `<XX>` unless the
/// whole input is valid UTF-8.
#[must_use]
pub fn escape_bytes(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        if b.is_ascii() {
            out.push(b as char);
        } else {
            let _ = write!(out, "<{b:02X}>");
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(b"SGVsbG8s\r\nIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_quoted_printable_encode() {
        let text = "Héllo, Wørld!";
        let encoded = encode_quoted_printable(text);
        assert!(encoded.contains("=C3"));
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo"), "Héllo".as_bytes());
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_malformed_escape_is_literal() {
        assert_eq!(decode_quoted_printable(b"100=ZZ"), b"100=ZZ");
        assert_eq!(decode_quoted_printable(b"end="), b"end=");
    }

    #[test]
    fn test_rfc2047_encode() {
        assert_eq!(encode_rfc2047("Hello", "utf-8").unwrap(), "Hello");

        let encoded = encode_rfc2047("Héllo", "utf-8").unwrap();
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert!(encoded.ends_with("?="));
    }

    #[test]
    fn test_decode_eword_plain_passthrough() {
        assert_eq!(decode_eword("Hello"), "Hello");
        assert_eq!(decode_eword("a =? b"), "a =? b");
    }

    #[test]
    fn test_decode_eword_base64_and_q() {
        assert_eq!(decode_eword("=?utf-8?B?SMOpbGxv?="), "Héllo");
        assert_eq!(decode_eword("=?utf-8?Q?H=C3=A9llo_there?="), "Héllo there");
    }

    #[test]
    fn test_decode_eword_joins_adjacent_words() {
        let s = "Re: =?utf-8?Q?caf=C3=A9?= =?utf-8?Q?_au_lait?= now";
        assert_eq!(decode_eword(s), "Re: café au lait now");
    }

    #[test]
    fn test_decode_eword_legacy_charset() {
        assert_eq!(decode_eword("=?iso-8859-1?Q?caf=E9?="), "café");
        // "日本" in ISO-2022-JP
        assert_eq!(decode_eword("=?ISO-2022-JP?B?GyRCRnxLXBsoQg==?="), "日本");
    }

    #[test]
    fn test_decode_eword_unknown_charset_escapes() {
        assert_eq!(decode_eword("=?x-unknown?Q?a=FFb?="), "a<FF>b");
    }

    #[test]
    fn test_decode_eword_folds_whitespace() {
        assert_eq!(decode_eword("a\tb\r\n c"), "a b   c");
    }

    #[test]
    fn test_decode_rfc2231() {
        assert_eq!(
            decode_rfc2231("utf-8''%E6%97%A5%E6%9C%AC.txt").as_deref(),
            Some("日本.txt")
        );
        assert_eq!(decode_rfc2231("no-quotes"), None);
    }

    #[test]
    fn test_to_utf8() {
        assert_eq!(to_utf8(b"plain", None), "plain");
        assert_eq!(to_utf8(b"caf\xe9", Some("iso-8859-1")), "café");
        assert_eq!(to_utf8(b"bad \xff utf8", Some("UTF-8")), "bad ? utf8");
        assert_eq!(to_utf8(b"x\xffy", Some("no-such-charset")), "x?y");
    }

    #[test]
    fn test_escape_bytes() {
        assert_eq!(escape_bytes(b"ok"), "ok");
        assert_eq!(escape_bytes(b"a\x80b"), "a<80>b");
    }
}
