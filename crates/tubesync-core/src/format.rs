//! Formatting and parsing helpers shared by the core and its callers.

use std::sync::LazyLock;

use regex::Regex;

/// Longest file stem produced by [`sanitize_filename`], in characters.
const MAX_FILENAME_CHARS: usize = 200;

static LIST_PARAM_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[?&]list=([a-zA-Z0-9_-]{10,})").ok());

static BARE_ID_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(PL[a-zA-Z0-9_-]{10,}|RDCLAK[a-zA-Z0-9_-]+|OLAK[a-zA-Z0-9_-]+)$").ok()
});

/// Format a byte count for display using base-1024 units.
///
/// Values keep at most two decimals with trailing zeros dropped, so
/// `3_145_728` renders as `"3 MB"` and `1536` as `"1.5 KB"`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rendered = format!("{value:.2}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[unit])
}

/// Format a duration as `m:ss`, or `h:mm:ss` once it reaches an hour.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Sanitize a string for use as a filename.
pub fn sanitize_filename(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

    let sanitized: String = name
        .chars()
        .map(|c| {
            if invalid_chars.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Trim whitespace and dots from ends
    let trimmed = sanitized.trim().trim_matches('.');

    trimmed.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Extract a playlist id from a playlist URL or a bare id.
///
/// Accepts any URL carrying a `list=` parameter, or a bare id with a
/// known playlist prefix. Returns `None` for anything else.
pub fn extract_playlist_id(input: &str) -> Option<String> {
    let input = input.trim();

    if let Some(re) = LIST_PARAM_RE.as_ref()
        && let Some(caps) = re.captures(input)
    {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    BARE_ID_RE
        .as_ref()
        .and_then(|re| re.captures(input))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
