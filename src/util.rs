//! Small text helpers shared across the crate.

/// Extract the first JSON object or array from text that may carry other
/// content around it (log noise from CLIs, prose from agents).
///
/// Uses bracket counting and skips over string literals so braces inside
/// quoted values do not confuse the depth tracking.
pub fn extract_json_value(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Keep only the trailing `max_chars` characters of a long tool output.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    let byte_idx = s.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &s[byte_idx..]
}
