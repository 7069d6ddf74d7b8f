/// Cut `s` to at most `max` characters, appending "…" when something was cut.
/// Counts chars, not bytes, so multi-byte text never splits mid-character.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((byte_idx, _)) => format!("{}…", &s[..byte_idx]),
    }
}

/// Single-line preview for log fields: whitespace runs collapse to one space.
pub fn preview(s: &str, max: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&flat, max)
}
