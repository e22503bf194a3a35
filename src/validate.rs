//! Strict shape check of raw model responses.
//!
//! A response is usable only if, after dropping blank lines and a small set
//! of known preamble phrases, it has exactly one line per batch item. No
//! attempt is made to repair anything else; a mismatch means "retry".

use thiserror::Error;

/// Preamble lines some models emit despite instructions. Matched
/// case-insensitively against the whole trimmed line.
pub const BOILERPLATE_LINES: &[&str] = &[
    "here are the corrected tokens:",
    "sure, here are the results:",
];

/// The response did not have the expected number of usable lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {expected} line(s), got {actual}")]
pub struct LineCountMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Extract one token per line, positionally aligned to the batch.
pub fn validate(raw: &str, expected: usize) -> Result<Vec<String>, LineCountMismatch> {
    let tokens: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !is_boilerplate(line))
        .map(str::to_string)
        .collect();

    if tokens.len() != expected {
        return Err(LineCountMismatch {
            expected,
            actual: tokens.len(),
        });
    }
    Ok(tokens)
}

fn is_boilerplate(line: &str) -> bool {
    let lower = line.to_lowercase();
    BOILERPLATE_LINES.iter().any(|phrase| lower == *phrase)
}
