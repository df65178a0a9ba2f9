//! HTML to readable text.

use htmd::HtmlToMarkdown;

/// Converts an HTML body to readable text.
///
/// `script` and `style` elements are dropped, runs of blanks inside a line
/// collapse to one space and runs of blank lines collapse to one.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "head"])
        .build();
    let text = converter.convert(html).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "HTML conversion failed, stripping tags");
        strip_tags(html)
    });
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() && blank_run > 0 {
            out.push('\n');
        }
        blank_run = 0;
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
