//! Time-aligned caption cues for batch-generated narration.

use std::path::Path;

use anyhow::Context as _;

use crate::{
    error::OutriderResult,
    protocol::Segment,
};

/// One caption cue, spanning `[start, end)` seconds on the composite
/// timeline. `index` is the originating segment index.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptionCue {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Build cues for the successful segments, in segment index order. A helper
/// that synthesizes in parallel may report results in completion order; the
/// timeline follows the indices, not the reporting order.
///
/// The running timestamp advances by each segment's duration plus the
/// inter-segment silence gap; the gap is skipped after the last cue. Failed
/// segments are excluded and contribute no time.
pub fn build(segments: &[Segment], gap_sec: f64) -> Vec<CaptionCue> {
    let mut ok: Vec<&Segment> = segments.iter().filter(|s| s.is_ok()).collect();
    ok.sort_by_key(|s| s.index);
    let mut cues = Vec::with_capacity(ok.len());
    let mut running = 0.0f64;
    for (i, seg) in ok.iter().enumerate() {
        cues.push(CaptionCue {
            index: seg.index,
            start: running,
            end: running + seg.duration,
            text: seg.text.clone(),
        });
        running += seg.duration;
        if i + 1 < ok.len() {
            running += gap_sec;
        }
    }
    cues
}

/// Expected duration of the composite built from the successful segments.
pub fn total_duration(segments: &[Segment], gap_sec: f64) -> f64 {
    let ok: Vec<&Segment> = segments.iter().filter(|s| s.is_ok()).collect();
    if ok.is_empty() {
        return 0.0;
    }
    let audio: f64 = ok.iter().map(|s| s.duration).sum();
    audio + gap_sec * (ok.len() - 1) as f64
}

/// Write cues as SubRip (.srt). Cue numbering is sequential and 1-based
/// regardless of segment indices.
pub fn write_srt(cues: &[CaptionCue], path: &Path) -> OutriderResult<()> {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text.trim()
        ));
    }
    std::fs::write(path, out).with_context(|| format!("write captions '{}'", path.display()))?;
    Ok(())
}

/// `HH:MM:SS,mmm` with millisecond precision.
fn format_timestamp(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let s = (total_ms / 1000) % 60;
    let m = (total_ms / 60_000) % 60;
    let h = total_ms / 3_600_000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SegmentStatus;

    fn seg(index: u32, duration: f64, status: SegmentStatus) -> Segment {
        Segment {
            index,
            text: format!("line {index}"),
            path: None,
            duration,
            status,
            error: None,
        }
    }

    #[test]
    fn cue_times_accumulate_duration_plus_gap() {
        let segments = vec![
            seg(0, 2.0, SegmentStatus::Ok),
            seg(1, 3.0, SegmentStatus::Ok),
            seg(2, 1.5, SegmentStatus::Ok),
        ];
        let cues = build(&segments, 0.5);
        let starts: Vec<f64> = cues.iter().map(|c| c.start).collect();
        let ends: Vec<f64> = cues.iter().map(|c| c.end).collect();
        assert_eq!(starts, vec![0.0, 2.5, 6.0]);
        assert_eq!(ends, vec![2.0, 5.5, 7.5]);
    }

    #[test]
    fn failed_segments_are_excluded_and_order_preserved() {
        let segments = vec![
            seg(0, 1.0, SegmentStatus::Ok),
            seg(1, 9.0, SegmentStatus::Error),
            seg(2, 1.0, SegmentStatus::Ok),
        ];
        let cues = build(&segments, 0.5);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].index, 0);
        assert_eq!(cues[1].index, 2);
        assert_eq!(cues[1].start, 1.5);
        assert_eq!(cues[1].end, 2.5);
    }

    #[test]
    fn cues_follow_index_order_not_reporting_order() {
        // Completion-order reporting: indices arrive as 2, 0, 1.
        let segments = vec![
            seg(2, 1.5, SegmentStatus::Ok),
            seg(0, 2.0, SegmentStatus::Ok),
            seg(1, 3.0, SegmentStatus::Ok),
        ];
        let cues = build(&segments, 0.5);
        let indices: Vec<u32> = cues.iter().map(|c| c.index).collect();
        let starts: Vec<f64> = cues.iter().map(|c| c.start).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(starts, vec![0.0, 2.5, 6.0]);
    }

    #[test]
    fn total_duration_skips_gap_after_last() {
        let segments = vec![
            seg(0, 1.0, SegmentStatus::Ok),
            seg(1, 1.0, SegmentStatus::Ok),
            seg(2, 1.0, SegmentStatus::Ok),
        ];
        assert!((total_duration(&segments, 0.5) - 4.0).abs() < 1e-9);
        assert_eq!(total_duration(&[], 0.5), 0.0);
    }

    #[test]
    fn srt_formatting_is_stable() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(2.5), "00:00:02,500");
        assert_eq!(format_timestamp(3661.25), "01:01:01,250");

        let dir = std::env::temp_dir().join(format!(
            "outrider_srt_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("narration.srt");
        let cues = build(&[seg(0, 2.0, SegmentStatus::Ok)], 0.5);
        write_srt(&cues, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "1\n00:00:00,000 --> 00:00:02,000\nline 0\n\n");
        std::fs::remove_dir_all(&dir).ok();
    }
}
