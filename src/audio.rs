//! ffmpeg/ffprobe invocations for the batch-generate post-processing
//! pipeline: probing, silence synthesis, gap-interleaved concatenation, and
//! the audio/video merge.
//!
//! We intentionally use the system binaries rather than linking FFmpeg to
//! avoid native dev header/lib requirements.

use std::{
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use anyhow::Context as _;

use crate::{
    error::{OutriderError, OutriderResult},
    resolve::diagnostic_tail,
};

/// Bounded timeout for single ancillary media-tool invocations. Supervised
/// jobs themselves have no timeout; these helpers do.
const MEDIA_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tighter bound for the `-version` availability probes.
const BINARY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn is_ffmpeg_on_path() -> bool {
    probe_binary("ffmpeg")
}

pub fn is_ffprobe_on_path() -> bool {
    probe_binary("ffprobe")
}

fn probe_binary(name: &str) -> bool {
    let spawned = Command::new(name)
        .arg("-version")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    let Ok(mut child) = spawned else {
        return false;
    };
    matches!(
        wait_bounded(&mut child, BINARY_PROBE_TIMEOUT),
        Ok(Some(status)) if status.success()
    )
}

/// Wait for `child` up to `timeout`. `Ok(None)` means the deadline passed
/// and the process was killed and reaped.
fn wait_bounded(
    child: &mut std::process::Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if std::time::Instant::now() >= deadline {
            child.kill().ok();
            child.wait().ok();
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[derive(Clone, Debug)]
pub struct AudioInfo {
    pub duration_sec: f64,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Probe an audio artifact with `ffprobe -print_format json`.
pub fn probe_audio(path: &Path) -> OutriderResult<AudioInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        sample_rate: Option<String>,
        channels: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let mut child = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| OutriderError::media(format!("failed to run ffprobe: {e}")))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| OutriderError::media("failed to open ffprobe stdout (unexpected)"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| OutriderError::media("failed to open ffprobe stderr (unexpected)"))?;
    let stdout_drain = std::thread::spawn(move || {
        use std::io::Read as _;
        let mut bytes = Vec::new();
        let _ = stdout.read_to_end(&mut bytes);
        bytes
    });
    let stderr_drain = std::thread::spawn(move || {
        use std::io::Read as _;
        let mut bytes = Vec::new();
        let _ = stderr.read_to_end(&mut bytes);
        bytes
    });

    let status = wait_bounded(&mut child, MEDIA_TOOL_TIMEOUT)
        .map_err(|e| OutriderError::media(format!("failed to wait for ffprobe: {e}")))?
        .ok_or_else(|| {
            OutriderError::media(format!("ffprobe timed out for '{}'", path.display()))
        })?;

    let stdout_bytes = stdout_drain.join().unwrap_or_default();
    let stderr_bytes = stderr_drain.join().unwrap_or_default();
    if !status.success() {
        return Err(OutriderError::media(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            diagnostic_tail(&String::from_utf8_lossy(&stderr_bytes))
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&stdout_bytes)
        .map_err(|e| OutriderError::media(format!("ffprobe json parse failed: {e}")))?;
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| {
            OutriderError::media(format!("no audio stream found in '{}'", path.display()))
        })?;

    let sample_rate = audio
        .sample_rate
        .as_ref()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| OutriderError::media("missing audio sample_rate from ffprobe"))?;
    let channels = audio
        .channels
        .ok_or_else(|| OutriderError::media("missing audio channels from ffprobe"))?;
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(AudioInfo {
        duration_sec,
        sample_rate,
        channels,
    })
}

/// Synthesize `secs` of silence matching the given sample rate and channel
/// count, so it can sit between segments in a codec-uniform concat list.
pub fn write_silence(
    out_path: &Path,
    secs: f64,
    sample_rate: u32,
    channels: u32,
) -> OutriderResult<()> {
    if secs <= 0.0 {
        return Err(OutriderError::validation("silence duration must be positive"));
    }
    let layout = if channels <= 1 { "mono" } else { "stereo" };
    let spec = format!("anullsrc=r={sample_rate}:cl={layout}");
    run_ffmpeg(
        |cmd| {
            cmd.args(["-f", "lavfi", "-i", &spec, "-t", &format!("{secs:.3}")])
                .args(["-c:a", "pcm_s16le"])
                .arg(out_path);
        },
        "silence synthesis",
    )
}

/// Concatenate the given artifacts in order, interleaving the fixed-duration
/// silence gap between consecutive entries, into one composite audio file.
///
/// `scratch_dir` receives the silence artifact and the concat list file. All
/// inputs are re-encoded to `pcm_s16le` at the first entry's sample rate so a
/// heterogeneous input cannot poison the composite.
pub fn concat_with_gaps(
    entries: &[PathBuf],
    gap_sec: f64,
    scratch_dir: &Path,
    out_path: &Path,
) -> OutriderResult<()> {
    if entries.is_empty() {
        return Err(OutriderError::validation(
            "concat requires at least one audio artifact",
        ));
    }

    let info = probe_audio(&entries[0])?;

    let silence = scratch_dir.join("gap_silence.wav");
    if gap_sec > 0.0 && entries.len() > 1 {
        write_silence(&silence, gap_sec, info.sample_rate, info.channels)?;
    }

    let mut list = String::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 && gap_sec > 0.0 {
            list.push_str(&concat_list_line(&silence)?);
        }
        list.push_str(&concat_list_line(entry)?);
    }
    let list_path = scratch_dir.join("concat_list.txt");
    std::fs::write(&list_path, list)
        .with_context(|| format!("write concat list '{}'", list_path.display()))?;

    run_ffmpeg(
        |cmd| {
            cmd.args(["-f", "concat", "-safe", "0", "-i"])
                .arg(&list_path)
                .args([
                    "-c:a",
                    "pcm_s16le",
                    "-ar",
                    &info.sample_rate.to_string(),
                    "-ac",
                    &info.channels.to_string(),
                ])
                .arg(out_path);
        },
        "audio concatenation",
    )
}

/// One `file '...'` line for the concat demuxer, with single quotes escaped.
fn concat_list_line(path: &Path) -> OutriderResult<String> {
    let abs = std::fs::canonicalize(path)
        .with_context(|| format!("resolve concat entry '{}'", path.display()))?;
    let text = abs
        .to_str()
        .ok_or_else(|| OutriderError::validation("concat entry path is not valid UTF-8"))?;
    Ok(format!("file '{}'\n", text.replace('\'', r"'\''")))
}

/// Produce a new video keeping the original video stream and replacing the
/// audio with `audio`, truncated to the shorter of the two (`-shortest`).
///
/// `out_path` must differ from both inputs; on failure neither input has been
/// touched.
pub fn merge_into_video(video: &Path, audio: &Path, out_path: &Path) -> OutriderResult<()> {
    if out_path == video || out_path == audio {
        return Err(OutriderError::validation(
            "merge output path must differ from its inputs",
        ));
    }
    run_ffmpeg(
        |cmd| {
            cmd.arg("-i")
                .arg(video)
                .arg("-i")
                .arg(audio)
                .args([
                    "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-shortest",
                ])
                .arg(out_path);
        },
        "audio/video merge",
    )
}

/// Run one bounded ffmpeg invocation with `-v error -y` and the extra args
/// supplied by `build`. Failures carry a truncated stderr excerpt.
fn run_ffmpeg(build: impl FnOnce(&mut Command), stage: &str) -> OutriderResult<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-v", "error", "-y"]);
    build(&mut cmd);
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| OutriderError::media(format!("failed to run ffmpeg for {stage}: {e}")))?;

    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| OutriderError::media("failed to open ffmpeg stderr (unexpected)"))?;
    let drain = std::thread::spawn(move || {
        use std::io::Read as _;
        let mut bytes = Vec::new();
        let _ = stderr.read_to_end(&mut bytes);
        bytes
    });

    let status = match wait_bounded(&mut child, MEDIA_TOOL_TIMEOUT) {
        Ok(Some(status)) => status,
        Ok(None) => {
            return Err(OutriderError::media(format!("ffmpeg timed out during {stage}")));
        }
        Err(e) => {
            return Err(OutriderError::media(format!(
                "failed to wait for ffmpeg during {stage}: {e}"
            )));
        }
    };

    let stderr_bytes = drain.join().unwrap_or_default();
    if !status.success() {
        return Err(OutriderError::media(format!(
            "ffmpeg {stage} exited with status {}: {}",
            status,
            diagnostic_tail(String::from_utf8_lossy(&stderr_bytes).trim())
        )));
    }
    Ok(())
}
