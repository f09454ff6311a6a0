//! Line-oriented status protocol spoken by batch-generate helpers.
//!
//! The helper emits one JSON object per line on stdout. Anything that does
//! not parse as a known message (the tool's own diagnostics, blank lines) is
//! ignored rather than treated as fatal. Exactly one terminal message
//! (`fatal` or `done`) ends the stream.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One unit of generated output (e.g. one synthesized speech clip).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub text: String,
    /// Artifact produced for this segment; set on success.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Artifact duration in seconds.
    #[serde(default)]
    pub duration: f64,
    pub status: SegmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Ok,
    Error,
}

impl Segment {
    pub fn is_ok(&self) -> bool {
        self.status == SegmentStatus::Ok
    }
}

/// One structured status line from the helper.
///
/// Variants are distinguished by their required fields, so the more specific
/// shapes must come first for untagged deserialization.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ProgressMessage {
    /// Per-segment progress update.
    Progress {
        progress: u32,
        total: u32,
        segment: Segment,
    },
    /// Terminal: the full run finished; `results` carries every segment.
    Done { done: bool, results: Vec<Segment> },
    /// Terminal: the run failed as a whole.
    Fatal { fatal: String },
    /// Informational note, displayed but otherwise ignored.
    Info { info: String },
}

impl ProgressMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Fatal { .. })
    }
}

/// Parse one output line. Returns `None` for noise.
pub fn parse_line(line: &str) -> Option<ProgressMessage> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}
