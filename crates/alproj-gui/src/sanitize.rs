//! Helpers for sanitizing data before it enters log lines or file names.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for log fields; reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Turns a project name into a safe file stem.
///
/// Path separators, control characters and characters reserved on Windows are
/// replaced with `_`. Leading dots are stripped so the file is never hidden.
/// Returns `None` if nothing usable remains.
pub fn sanitize_file_stem(name: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        None
    } else {
        Some(cleaned.to_string())
    }
}
