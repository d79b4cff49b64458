//! HTML formatting of outbound message text.

use url::Url;

use crate::chat::User;

/// Format message text as HTML suitable for a `sendMessage` body.
///
/// The text is HTML-escaped first. If it begins with `/me` followed by
/// non-newline whitespace, that prefix is stripped, leading and trailing
/// non-newline whitespace is stripped, and non-link spans are wrapped in
/// `<em>` tags; otherwise only the surrounding non-newline whitespace is
/// trimmed. If `from` is set, the result is prefixed with
/// `<b>name:</b> ` (`<b>name</b> ` for emotes) to indicate who is speaking.
pub(crate) fn format_html(from: Option<&User>, text: &str) -> String {
    let escaped = escape_html(text);
    if let Some(rest) = escaped.strip_prefix("/me") {
        let first = rest.chars().next();
        if first.is_none() || first.is_some_and(is_non_newline_space) {
            let body = emphasize(trim_space(rest));
            return match from {
                Some(user) => format!("<b>{}</b> {}", user.name(), body),
                None => body,
            };
        }
    }
    let body = trim_space(&escaped);
    match from {
        Some(user) => format!("<b>{}:</b> {}", user.name(), body),
        None => body.to_string(),
    }
}

/// Escape the characters HTML cannot carry verbatim.
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

fn is_non_newline_space(c: char) -> bool {
    c != '\n' && c.is_whitespace()
}

fn trim_space(s: &str) -> &str {
    s.trim_matches(is_non_newline_space)
}

/// Wrap all non-empty, non-link spans in `<em>` tags.
///
/// A link is a run of non-whitespace at the start of the text or preceded
/// by whitespace, beginning with `http://` or `https://`, that parses as a
/// URL. Links are emitted verbatim and do not overlap.
fn emphasize(text: &str) -> String {
    let mut out = String::new();
    let mut rest = text;
    loop {
        let Some((i, link)) = link_index(rest) else {
            push_em(&mut out, rest);
            return out;
        };
        push_em(&mut out, &rest[..i]);
        out.push_str(link);
        rest = &rest[i + link.len()..];
    }
}

fn push_em(out: &mut String, s: &str) {
    if !s.is_empty() {
        out.push_str("<em>");
        out.push_str(s);
        out.push_str("</em>");
    }
}

/// The byte index and text of the first link, or `None` if there are none.
fn link_index(text: &str) -> Option<(usize, &str)> {
    let mut offset = 0;
    let mut window = text;
    loop {
        let i = window.find("http")?;
        // Never empty: the remainder starts with a non-whitespace 'h'.
        let link = window[i..].split_whitespace().next().unwrap_or("");
        let starts_run =
            i == 0 || window[..i].chars().next_back().is_some_and(char::is_whitespace);
        if starts_run
            && (link.starts_with("http://") || link.starts_with("https://"))
            && Url::parse(link).is_ok()
        {
            return Some((offset + i, link));
        }
        offset += i + 1;
        window = &window[i + 1..];
    }
}
