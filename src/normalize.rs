//! Text normalization between extraction and chunking.
//!
//! Extracted text from PDFs and Office files is full of artifacts: CRLF line
//! endings, form feeds between pages, non-breaking spaces, zero-width
//! characters and runs of padding whitespace. [`normalize`] reduces all of
//! that to a canonical form the chunker can rely on:
//!
//! - line endings are `\n`;
//! - control characters (other than line breaks) and invisible format
//!   characters are removed;
//! - horizontal whitespace collapses to one ASCII space and lines are trimmed;
//! - paragraph boundaries survive as exactly one blank line (`\n\n`).
//!
//! The function never fails and is idempotent.

/// Normalize raw extracted text. Empty input yields empty output.
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut cleaned = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                cleaned.push('\n');
            }
            '\n' | '\u{0b}' | '\u{85}' | '\u{2028}' => cleaned.push('\n'),
            // Form feeds separate PDF pages.
            '\u{0c}' | '\u{2029}' => cleaned.push_str("\n\n"),
            c if is_invisible(c) => {}
            c if c.is_whitespace() => cleaned.push(' '),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }

    let mut out = String::with_capacity(cleaned.len());
    let mut pending_blank = false;
    for line in cleaned.split('\n') {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            if !out.is_empty() {
                pending_blank = true;
            }
            continue;
        };
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        out.push_str(first);
        for word in words {
            out.push(' ');
            out.push_str(word);
        }
        pending_blank = false;
    }
    out
}

/// Zero-width and formatting characters that carry no visible text.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{feff}' | '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{00ad}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \n\t \r\n "), "");
    }

    #[test]
    fn test_line_endings() {
        assert_eq!(normalize("one\r\ntwo\rthree\n"), "one\ntwo\nthree");
    }

    #[test]
    fn test_collapses_horizontal_whitespace() {
        assert_eq!(
            normalize("  lots   of\t\tspace\u{a0}\u{a0}here  "),
            "lots of space here"
        );
    }

    #[test]
    fn test_preserves_paragraphs() {
        let raw = "First paragraph.\n\n\n\n  Second paragraph.\n   \n\nThird.";
        assert_eq!(
            normalize(raw),
            "First paragraph.\n\nSecond paragraph.\n\nThird."
        );
    }

    #[test]
    fn test_strips_control_and_invisible_chars() {
        let raw = "\u{feff}Hel\u{0}lo\u{200b} wo\u{ad}rld\u{7}";
        assert_eq!(normalize(raw), "Hello world");
    }

    #[test]
    fn test_form_feed_becomes_paragraph_break() {
        assert_eq!(normalize("page one\u{0c}page two"), "page one\n\npage two");
    }

    #[test]
    fn test_idempotent() {
        let raw = "A  b\r\n\r\n\r\nc\u{0c}d\t e \u{2028} f";
        let once = normalize(raw);
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_multibyte_text_untouched() {
        assert_eq!(normalize("naïve   café ✓"), "naïve café ✓");
    }
}
