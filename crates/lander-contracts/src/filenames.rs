pub const MAX_FILENAME_CHARS: usize = 100;

const RESERVED_WINDOWS_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turns free text (usually a theme) into a name safe on Windows and Unix.
pub fn sanitize_filename(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_sep = false;
    for ch in text.chars() {
        let mapped = if ch.is_whitespace()
            || ch.is_control()
            || matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
        {
            '_'
        } else {
            ch
        };
        if mapped == '_' {
            if last_was_sep {
                continue;
            }
            last_was_sep = true;
        } else {
            last_was_sep = false;
        }
        out.push(mapped);
    }

    let trimmed: String = out
        .trim_matches(|ch: char| ch == '.' || ch == '_' || ch == ' ')
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();
    let trimmed = trimmed
        .trim_end_matches(|ch: char| ch == '.' || ch == '_')
        .to_string();
    if trimmed.is_empty() {
        return "untitled".to_string();
    }

    let stem = trimmed.split('.').next().unwrap_or_default();
    if RESERVED_WINDOWS_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        let mut prefixed = format!("_{trimmed}");
        if prefixed.chars().count() > MAX_FILENAME_CHARS {
            prefixed = prefixed.chars().take(MAX_FILENAME_CHARS).collect();
        }
        return prefixed;
    }
    trimmed
}
