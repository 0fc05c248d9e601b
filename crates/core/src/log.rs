//! Helpers for putting untrusted text into log lines.

use std::borrow::Cow;

/// Make peer-supplied text safe for a single log line.
///
/// HTML-significant characters are escaped and control characters (line
/// breaks, ANSI escapes) are flattened to spaces, so a device banner or API
/// error body cannot forge extra records.
pub fn sanitize(input: &str) -> Cow<'_, str> {
    if !input
        .chars()
        .any(|c| c.is_control() || matches!(c, '&' | '<' | '>' | '"' | '\''))
    {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c if c.is_control() => out.push(' '),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}
