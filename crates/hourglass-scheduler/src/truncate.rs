//! Output excerpts for task logs.
//!
//! Task output is only ever logged, never stored, so a failing command that
//! prints megabytes must not flood the log. The tail of the output carries
//! the exit diagnostics, so that is the part kept.

/// Keep at most `max_chars` trailing characters of `output`, trimmed.
///
/// When characters are dropped the excerpt starts with
/// `[… N chars omitted] `. Counting is by `char`, so multi-byte sequences are
/// never split.
pub fn tail_excerpt(output: &str, max_chars: usize) -> String {
    let trimmed = output.trim();
    let total = trimmed.chars().count();
    if total <= max_chars {
        return trimmed.to_owned();
    }

    let omitted = total - max_chars;
    let start = trimmed
        .char_indices()
        .nth(omitted)
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    format!("[… {omitted} chars omitted] {}", &trimmed[start..])
}
