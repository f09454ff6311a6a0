//! Result recovery for interactive-edit jobs.
//!
//! The editing tool is instructed to rewrite the artifact file in place, but
//! it is not guaranteed to follow instructions. Resolution therefore prefers
//! what the tool actually did to the file, and only then falls back to mining
//! its free-form output.

use std::path::Path;

use crate::error::{OutriderError, OutriderResult};

/// Upper bound on raw-output excerpts attached to error diagnostics.
pub const DIAGNOSTIC_TAIL_CHARS: usize = 600;

/// Resolve a finished edit job into the new artifact contents.
///
/// Strategy order:
/// 1. re-read the workspace artifact; any change from the pre-job snapshot is
///    the result,
/// 2. take the first fenced code block from the output verbatim,
/// 3. treat the whole output as code if it passes a structural heuristic,
///    after stripping conversational preamble/postamble lines.
pub fn resolve_edit(artifact: &Path, baseline: &str, output: &str) -> OutriderResult<String> {
    if let Ok(current) = std::fs::read_to_string(artifact)
        && current != baseline
    {
        tracing::debug!(artifact = %artifact.display(), "edit resolved from artifact change");
        return Ok(current);
    }
    resolve_from_output(output)
}

/// Strategies 2 and 3: recover a result from raw tool output alone.
pub fn resolve_from_output(output: &str) -> OutriderResult<String> {
    if let Some(block) = first_fenced_block(output) {
        return Ok(block);
    }

    if !looks_like_code(output) {
        return Err(OutriderError::tool(format!(
            "tool replied conversationally instead of producing code: {}",
            diagnostic_tail(output)
        )));
    }

    let trimmed = strip_chatter(output);
    if trimmed.trim().is_empty() {
        return Err(OutriderError::tool(format!(
            "tool output contained no usable code: {}",
            diagnostic_tail(output)
        )));
    }
    Ok(trimmed)
}

/// Contents of the first fenced code block, or `None`. The opening fence may
/// carry a language tag; an unterminated fence runs to end of input.
fn first_fenced_block(output: &str) -> Option<String> {
    let mut in_block = false;
    let mut lines: Vec<&str> = Vec::new();
    for line in output.lines() {
        if line.trim_start().starts_with("```") {
            if in_block {
                return Some(join_lines(&lines));
            }
            in_block = true;
            continue;
        }
        if in_block {
            lines.push(line);
        }
    }
    if in_block && !lines.is_empty() {
        return Some(join_lines(&lines));
    }
    None
}

fn join_lines(lines: &[&str]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

const CODE_MARKERS: &[&str] = &[
    "def ", "class ", "import ", "from ", "return", "self.", "lambda ", "if ", "for ", "while ",
    " = ", "):",
];

/// Structural "does this look like code" test: enough lines carry code
/// markers relative to the non-empty total.
fn looks_like_code(output: &str) -> bool {
    let mut total = 0usize;
    let mut hits = 0usize;
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        total += 1;
        if CODE_MARKERS.iter().any(|m| line.contains(m)) {
            hits += 1;
        }
    }
    hits >= 2 && hits * 100 >= total * 35
}

const PREAMBLE_MARKERS: &[&str] = &[
    "here", "sure", "certainly", "of course", "okay", "ok,", "i've", "i have", "i updated",
    "below is", "the following", "this is",
];

const POSTAMBLE_MARKERS: &[&str] = &[
    "let me know",
    "feel free",
    "hope this",
    "this should",
    "i changed",
    "i replaced",
    "note:",
    "explanation",
    "- ",
    "* ",
];

/// A line that is clearly code and must never be stripped as chatter.
fn is_code_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("def ")
        || t.starts_with("class ")
        || t.starts_with("import ")
        || t.starts_with("from ")
        || t.starts_with("return")
        || t.starts_with("self.")
        || t.starts_with('@')
        || t.starts_with('#')
        || line.contains(" = ")
}

/// Drop recognizable conversational lines from the start and end of `output`.
fn strip_chatter(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();

    let mut start = 0;
    while start < lines.len() {
        let line = lines[start].trim();
        let lower = line.to_lowercase();
        let chatty = line.is_empty() || PREAMBLE_MARKERS.iter().any(|m| lower.starts_with(m));
        if chatty && !is_code_line(line) {
            start += 1;
        } else {
            break;
        }
    }

    let mut end = lines.len();
    while end > start {
        let line = lines[end - 1].trim();
        let lower = line.to_lowercase();
        let chatty = line.is_empty() || POSTAMBLE_MARKERS.iter().any(|m| lower.starts_with(m));
        if chatty && !is_code_line(line) {
            end -= 1;
        } else {
            break;
        }
    }

    let mut out = lines[start..end].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// A bounded excerpt of the end of `output` for diagnostics, never the full
/// dump. Truncation lands on a char boundary.
pub fn diagnostic_tail(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return "(no output)".to_string();
    }
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= DIAGNOSTIC_TAIL_CHARS {
        return trimmed.to_string();
    }
    let tail: String = chars[chars.len() - DIAGNOSTIC_TAIL_CHARS..].iter().collect();
    format!("…{tail}")
}
