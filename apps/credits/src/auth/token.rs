//! Session token comparison.
//!
//! Tokens are colon-segmented. The first segment is the identity; later
//! segments (timestamp, uuid) may be rewritten after issuance, so a stored
//! token only has to agree with the presented one on that first segment.

/// Compares a stored token against a presented one.
///
/// Exact equality wins. Otherwise both must be colon-delimited with an equal,
/// non-empty first segment. Empty input never matches.
pub fn matches(stored: &str, presented: &str) -> bool {
    if stored.is_empty() || presented.is_empty() {
        return false;
    }

    if stored == presented {
        return true;
    }

    match (stored.split_once(':'), presented.split_once(':')) {
        (Some((a, _)), Some((b, _))) => !a.is_empty() && a == b,
        _ => false,
    }
}

/// Log-safe rendering: the first few characters of the identity segment.
pub fn token_preview(token: &str) -> String {
    let head = token.split(':').next().unwrap_or_default();
    let preview: String = head.chars().take(8).collect();
    if preview.len() < token.len() {
        format!("{preview}…")
    } else {
        preview
    }
}
