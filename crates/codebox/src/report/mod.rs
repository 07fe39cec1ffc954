//! Plain-text rendering of outcomes for a human reader.
//!
//! Chat delivery formats its own messages; this is the terminal-facing
//! rendering used by the CLI and by callers that just want a string.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::model::{ExecutionOutcome, FailureKind};

pub const TRUNCATION_MARKER: &str = "\n...(output truncated)";

/// Trim surrounding whitespace and cut to `max_chars` characters.
#[must_use]
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut shortened = trimmed.get(..cut).unwrap_or(trimmed).to_string();
            shortened.push_str(TRUNCATION_MARKER);
            shortened
        }
        None => trimmed.to_string(),
    }
}

#[must_use]
pub fn render_outcome(outcome: &ExecutionOutcome, max_output_length: usize) -> String {
    let mut text = String::new();
    let output = outcome
        .output()
        .map(|out| truncate_output(out, max_output_length))
        .filter(|out| !out.is_empty());

    match outcome.failure() {
        None => {
            text.push_str("execution succeeded\n");
            if let Some(output) = &output {
                let _ = writeln!(text, "output:\n{output}");
            }
            if !outcome.artifact_paths().is_empty() {
                text.push_str("artifacts:\n");
                for path in outcome.artifact_paths() {
                    let _ = writeln!(text, "  {}", path.display());
                }
            }
        }
        Some(FailureKind::Timeout) => {
            let _ = writeln!(
                text,
                "execution timed out: {}",
                outcome.error().unwrap_or_default()
            );
            text.push_str("the code may still have been running when the engine gave up\n");
        }
        Some(FailureKind::Runtime) => {
            text.push_str("execution failed\n");
            if let Some(output) = &output {
                let _ = writeln!(text, "output before the failure:\n{output}");
            }
            let _ = writeln!(text, "error:\n{}", outcome.error().unwrap_or_default().trim_end());
        }
        Some(FailureKind::Internal) => {
            let _ = writeln!(
                text,
                "engine error: {}",
                outcome.error().unwrap_or_default().trim_end()
            );
        }
    }
    text
}

#[must_use]
pub fn render_rejection(terms: &BTreeSet<String>) -> String {
    let listed: Vec<&str> = terms.iter().map(String::as_str).collect();
    format!(
        "execution blocked by the safety filter\nmatched: {}\nadjust restricted_keywords or restricted_libraries to change this\n",
        listed.join(", ")
    )
}
