//! Utilities for sanitizing error messages and path components.
//!
//! Error messages are cleaned of control characters and truncated before they
//! are stored in the failure ledger. Prefixes are turned into safe directory
//! names for scratch space.

use crate::config::MAX_ERROR_MESSAGE_LENGTH;

/// Removes control characters (0x00-0x1F except tab, newline, carriage return).
pub fn sanitize_error_message(message: &str) -> String {
    message
        .chars()
        .filter(|c| {
            let code = *c as u32;
            code >= 0x20 || code == 0x09 || code == 0x0A || code == 0x0D
        })
        .collect()
}

/// Sanitizes and truncates an error message to `MAX_ERROR_MESSAGE_LENGTH` characters.
///
/// Truncation counts characters, not bytes, so multi-byte text never splits.
pub fn sanitize_and_truncate_error_message(message: &str) -> String {
    let sanitized = sanitize_error_message(message);
    let char_count = sanitized.chars().count();

    if char_count <= MAX_ERROR_MESSAGE_LENGTH {
        return sanitized;
    }

    let keep = MAX_ERROR_MESSAGE_LENGTH.saturating_sub(50);
    let truncated: String = sanitized.chars().take(keep).collect();
    format!(
        "{}... (truncated, original length: {} chars)",
        truncated, char_count
    )
}

/// Turns an arbitrary storage prefix into a single safe directory name.
pub fn safe_path_component(value: &str) -> String {
    let safe: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        "_root".to_string()
    } else {
        safe
    }
}
