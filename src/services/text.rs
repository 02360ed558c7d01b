//! Text normalization and truncation for OCR candidates.

/// Normalize raw engine output before validation.
///
/// Strips NUL bytes, folds `\r\n`/`\r` into `\n`, caps consecutive blank
/// lines at one, and collapses runs of spaces within each line.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text.replace('\u{0}', "");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;
    for line in text.split('\n') {
        let collapsed = collapse_spaces(line.trim());
        if collapsed.is_empty() {
            blank_run += 1;
            // at most one blank line between paragraphs
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(collapsed);
    }

    lines.join("\n").trim().to_string()
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev_space = false;
    for ch in line.chars() {
        if ch == ' ' {
            if !prev_space {
                out.push(ch);
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out
}

/// Truncate `text` to at most `max_bytes` bytes without splitting a UTF-8
/// sequence. Returns the (possibly shortened) text and whether truncation
/// happened.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

/// Clamp a driver- or validator-reported confidence into `[0, 1]`.
pub fn clamp_confidence(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_nuls_and_folds_newlines() {
        let raw = "Hello\u{0} world\r\nsecond\rthird";
        assert_eq!(normalize(raw), "Hello world\nsecond\nthird");
    }

    #[test]
    fn normalize_caps_blank_runs() {
        let raw = "a\n\n\n\n\nb";
        assert_eq!(normalize(raw), "a\n\nb");
    }

    #[test]
    fn normalize_collapses_space_runs_per_line() {
        let raw = "  a    b  \n c   d ";
        assert_eq!(normalize(raw), "a b\nc d");
    }

    #[test]
    fn normalize_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  \n \n "), "");
    }

    #[test]
    fn truncate_noop_at_exact_budget() {
        let text = "x".repeat(100);
        let (out, truncated) = truncate_utf8(&text, 100);
        assert_eq!(out.len(), 100);
        assert!(!truncated);
    }

    #[test]
    fn truncate_one_byte_over_budget() {
        let text = "x".repeat(101);
        let (out, truncated) = truncate_utf8(&text, 100);
        assert_eq!(out.len(), 100);
        assert!(truncated);
    }

    #[test]
    fn truncate_respects_utf8_boundaries() {
        // 'é' is two bytes; a cut through the middle must back off
        let text = "aé";
        let (out, truncated) = truncate_utf8(text, 2);
        assert_eq!(out, "a");
        assert!(truncated);
    }

    #[test]
    fn clamp_confidence_bounds() {
        assert_eq!(clamp_confidence(-0.5), 0.0);
        assert_eq!(clamp_confidence(1.5), 1.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }
}
