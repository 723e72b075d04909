//! Small helpers shared by the store, the remote adapter and the CLI.

/// Longest error text kept on a queue item or conflict.
const MAX_ERROR_CHARS: usize = 180;

/// Trimmed value of an optional setting, or `None` when it is blank.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Whether `value` is an `http(s)://` URL with something after the scheme.
pub fn is_http_url(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    ["http://", "https://"].iter().any(|scheme| {
        lower
            .strip_prefix(scheme)
            .is_some_and(|rest| !rest.trim_start_matches('/').is_empty())
    })
}

/// Collapse whitespace onto one line and cap the length, so response bodies
/// and transport errors fit in a queue listing.
pub fn compact_text(value: &str) -> String {
    let single_line = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= MAX_ERROR_CHARS {
        return single_line;
    }
    let mut truncated = single_line
        .chars()
        .take(MAX_ERROR_CHARS - 3)
        .collect::<String>();
    truncated.push_str("...");
    truncated
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
