//! Outbound text formatting for `parse_mode=HTML`.
//!
//! Callers may hand over either plain text or strings that already carry
//! Telegram-supported HTML. Plain text gets `&`, `<`, `>` escaped; a string
//! containing at least one whitelisted tag is assumed pre-formatted and
//! passes through verbatim.

use std::sync::OnceLock;

use regex::RegexSet;

fn allowed_tags() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r#"(?is)<a\s+href=["'][^"']*["'][^>]*>.*?</a>"#,
            r"(?is)<b>.*?</b>",
            r"(?is)<strong>.*?</strong>",
            r"(?is)<i>.*?</i>",
            r"(?is)<em>.*?</em>",
            r"(?is)<code>.*?</code>",
            r"(?is)<pre>.*?</pre>",
            r"(?is)<blockquote>.*?</blockquote>",
            r"(?is)<blockquote expandable>.*?</blockquote>",
        ])
        .expect("static patterns compile")
    })
}

/// Escape for HTML parse mode unless the input already carries whitelisted
/// tags.
pub fn format_html(text: &str) -> String {
    if allowed_tags().is_match(text) {
        text.to_owned()
    } else {
        escape(text)
    }
}

/// Unconditional entity escape. `&` first, so already-escaped input does not
/// double up.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_escaped() {
        assert_eq!(format_html("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }

    #[test]
    fn whitelisted_tag_passes_through() {
        let tagged = "<blockquote expandable>Alice</blockquote>\nhello <3";
        assert_eq!(format_html(tagged), tagged);

        let link = r#"<a href="https://e.com">title</a>"#;
        assert_eq!(format_html(link), link);
    }

    #[test]
    fn unknown_tag_is_escaped() {
        assert_eq!(format_html("<script>x</script>"), "&lt;script&gt;x&lt;/script&gt;");
        // An unclosed known tag is not a formatted message either.
        assert_eq!(format_html("<b>oops"), "&lt;b&gt;oops");
    }

    #[test]
    fn ampersand_escaped_first() {
        assert_eq!(escape("&lt;"), "&amp;lt;");
    }

    #[test]
    fn multiline_tag_bodies_match() {
        let text = "<blockquote>line1\nline2</blockquote>";
        assert_eq!(format_html(text), text);
    }
}
