//! The batch-generate job family: drives a local text-to-speech helper that
//! speaks the line-oriented progress protocol, then assembles the composite
//! narration (concatenated audio + time-aligned captions).

use std::{
    path::{Path, PathBuf},
    thread::JoinHandle,
};

use serde::Serialize;
use tracing::debug;

use crate::{
    agent::{ProbeReport, check_installed},
    audio, captions,
    env::ToolEnv,
    error::{OutriderError, OutriderResult},
    launch::LaunchSpec,
    protocol::{self, ProgressMessage, Segment, SegmentStatus},
    resolve::diagnostic_tail,
    supervisor::{JobStatus, JobSupervisor},
    workspace::Workspace,
};

pub const DEFAULT_SILENCE_GAP_SEC: f64 = 0.5;

const COMPOSITE_FILE: &str = "narration.wav";
const CAPTIONS_FILE: &str = "narration.srt";

#[derive(Clone, Debug)]
pub struct SpeechConfig {
    /// Local interpreter capable of running the helper script.
    pub interpreter: PathBuf,
    /// The batch-generate helper script.
    pub script: PathBuf,
    pub env: ToolEnv,
    /// Fixed silence inserted between consecutive segments.
    pub gap_sec: f64,
}

impl SpeechConfig {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>, env: ToolEnv) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            env,
            gap_sec: DEFAULT_SILENCE_GAP_SEC,
        }
    }

    pub fn with_gap(mut self, gap_sec: f64) -> Self {
        self.gap_sec = gap_sec;
        self
    }
}

/// Request object serialized to the helper's stdin.
#[derive(Serialize)]
struct SpeechRequest<'a> {
    segments: Vec<RequestSegment<'a>>,
    voice: &'a str,
    speed: f64,
    out_dir: &'a Path,
}

#[derive(Serialize)]
struct RequestSegment<'a> {
    index: u32,
    text: &'a str,
}

/// Snapshot returned by [`SpeechSession::poll`].
#[derive(Clone, Debug)]
pub struct SpeechPoll {
    pub status: JobStatus,
    pub done: bool,
    /// Segments reported so far / requested total.
    pub progress: u32,
    pub total: u32,
    pub message: Option<String>,
    pub composite: Option<PathBuf>,
    pub captions: Option<PathBuf>,
    pub total_duration: Option<f64>,
}

impl SpeechPoll {
    fn idle() -> Self {
        Self {
            status: JobStatus::Idle,
            done: true,
            progress: 0,
            total: 0,
            message: None,
            composite: None,
            captions: None,
            total_duration: None,
        }
    }
}

enum Terminal {
    Fatal(String),
    Done(Vec<Segment>),
}

struct Assembly {
    composite: PathBuf,
    captions: PathBuf,
    total_duration: f64,
}

/// Supervises batch-generate jobs for one TTS helper.
pub struct SpeechSession {
    config: SpeechConfig,
    supervisor: JobSupervisor,
    /// Bytes of the raw output buffer already scanned for protocol lines.
    parsed: usize,
    progress: u32,
    total: u32,
    terminal: Option<Terminal>,
    results: Vec<Segment>,
    assembling: Option<JoinHandle<OutriderResult<Assembly>>>,
    outcome: Option<SpeechPoll>,
}

impl SpeechSession {
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            config,
            supervisor: JobSupervisor::new("speech"),
            parsed: 0,
            progress: 0,
            total: 0,
            terminal: None,
            results: Vec::new(),
            assembling: None,
            outcome: None,
        }
    }

    pub fn check_installed(&self) -> ProbeReport {
        check_installed(&self.config.interpreter.to_string_lossy())
    }

    /// Start a narration job over the given segment texts. Any still-active
    /// job is cancelled when the new one launches; a failed preparation
    /// leaves it untouched.
    pub fn start_narration(
        &mut self,
        texts: &[String],
        voice: &str,
        speed: f64,
    ) -> OutriderResult<u32> {
        if texts.is_empty() {
            return Err(OutriderError::validation("no segments to narrate"));
        }
        if !(speed > 0.0) {
            return Err(OutriderError::validation("speed multiplier must be positive"));
        }

        let workspace = Workspace::create(self.config.env.base_dir(), "narrate")?;
        let payload = match Self::encode_request(&workspace, texts, voice, speed) {
            Ok(payload) => payload,
            Err(e) => {
                workspace.destroy().ok();
                return Err(e);
            }
        };

        let spec = LaunchSpec::new(
            self.config.interpreter.to_string_lossy(),
            self.config.env.clone(),
        )
        .arg(self.config.script.to_string_lossy())
        .stdin_payload(payload);

        // Session state is only reset once the new job actually replaces the
        // old one; a failed preparation leaves the previous job untouched.
        self.reset();
        self.supervisor.start(workspace, spec)?;
        self.total = texts.len() as u32;
        Ok(self.total)
    }

    fn encode_request(
        workspace: &Workspace,
        texts: &[String],
        voice: &str,
        speed: f64,
    ) -> OutriderResult<Vec<u8>> {
        let out_dir = workspace.subdir("segments")?;
        let request = SpeechRequest {
            segments: texts
                .iter()
                .enumerate()
                .map(|(i, text)| RequestSegment {
                    index: i as u32,
                    text,
                })
                .collect(),
            voice,
            speed,
            out_dir: &out_dir,
        };
        let mut payload = serde_json::to_vec(&request)
            .map_err(|e| OutriderError::protocol(format!("encode narration request: {e}")))?;
        payload.push(b'\n');
        Ok(payload)
    }

    /// Non-blocking progress snapshot. Success or failure is decided by the
    /// helper's terminal progress message, never by its exit code; an exit
    /// without a terminal message is a tool error. Once the terminal `done`
    /// arrives with at least one successful segment, the post-processing
    /// pipeline runs on a background thread and the job stays `Running`
    /// until it finishes.
    pub fn poll(&mut self) -> SpeechPoll {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        if self.assembling.is_some() {
            return self.poll_assembly();
        }

        if !self.supervisor.is_active() {
            return SpeechPoll::idle();
        }

        let snap = self.supervisor.poll();
        for msg in self.drain_messages() {
            self.apply(msg);
        }

        match self.terminal.take() {
            Some(Terminal::Fatal(msg)) => {
                self.supervisor.cancel();
                return self.fail(format!("narration failed: {}", diagnostic_tail(&msg)));
            }
            Some(Terminal::Done(results)) => {
                self.results = normalize_results(results);
                return self.begin_assembly();
            }
            None => {}
        }

        if snap.done {
            let detail = diagnostic_tail(&snap.output);
            self.supervisor.cancel();
            return self.fail(format!(
                "generator exited without a terminal status (exit code {:?}): {detail}",
                snap.return_code
            ));
        }

        self.running_poll()
    }

    /// Merge the finished composite into an existing video, keeping the
    /// video stream and truncating to the shorter input. Returns the output
    /// path (defaults to `<stem>_narrated.<ext>` next to the video).
    pub fn merge(&self, video: &Path, out: Option<PathBuf>) -> OutriderResult<PathBuf> {
        let composite = self
            .outcome
            .as_ref()
            .and_then(|o| o.composite.clone())
            .ok_or_else(|| {
                OutriderError::validation(
                    "no narration composite available; run a narration job to completion first",
                )
            })?;
        let out = out.unwrap_or_else(|| default_merge_output(video));
        audio::merge_into_video(video, &composite, &out)?;
        Ok(out)
    }

    /// Kill any running job, abandon an in-flight assembly, and clean up.
    pub fn cancel(&mut self) {
        self.supervisor.cancel();
        self.reset();
    }

    fn reset(&mut self) {
        self.parsed = 0;
        self.progress = 0;
        self.total = 0;
        self.terminal = None;
        self.results.clear();
        // An in-flight pipeline is never interrupted mid-stage; it finishes
        // or fails on its own thread and its handle is simply abandoned.
        self.assembling = None;
        self.outcome = None;
    }

    fn drain_messages(&mut self) -> Vec<ProgressMessage> {
        let raw = self.supervisor.raw_output();
        let mut msgs = Vec::new();
        let mut off = self.parsed;
        while let Some(nl) = raw[off..].find('\n') {
            let line = &raw[off..off + nl];
            if let Some(msg) = protocol::parse_line(line) {
                msgs.push(msg);
            }
            off += nl + 1;
        }
        self.parsed = off;
        msgs
    }

    fn apply(&mut self, msg: ProgressMessage) {
        match msg {
            ProgressMessage::Info { info } => debug!(info, "generator note"),
            ProgressMessage::Progress {
                progress,
                total,
                segment,
            } => {
                self.progress = self.progress.max(progress);
                self.total = total;
                debug!(
                    index = segment.index,
                    ok = segment.is_ok(),
                    "segment reported"
                );
            }
            ProgressMessage::Fatal { fatal } => {
                self.terminal = Some(Terminal::Fatal(fatal));
            }
            ProgressMessage::Done { results, .. } => {
                self.terminal = Some(Terminal::Done(results));
            }
        }
    }

    fn begin_assembly(&mut self) -> SpeechPoll {
        let ok_paths: Vec<PathBuf> = self
            .results
            .iter()
            .filter(|s| s.is_ok())
            .filter_map(|s| s.path.clone())
            .collect();
        if ok_paths.is_empty() {
            self.supervisor.cancel();
            return self.fail("all segments failed; nothing to assemble".to_string());
        }

        let Some(dir) = self.supervisor.workspace().map(|w| w.path().to_path_buf()) else {
            return self.fail("workspace vanished before assembly".to_string());
        };

        let results = self.results.clone();
        let gap = self.config.gap_sec;
        self.assembling = Some(std::thread::spawn(move || {
            let composite = dir.join(COMPOSITE_FILE);
            audio::concat_with_gaps(&ok_paths, gap, &dir, &composite)?;

            let cues = captions::build(&results, gap);
            let captions_path = dir.join(CAPTIONS_FILE);
            captions::write_srt(&cues, &captions_path)?;

            Ok(Assembly {
                composite,
                captions: captions_path,
                total_duration: captions::total_duration(&results, gap),
            })
        }));

        self.running_poll()
    }

    fn poll_assembly(&mut self) -> SpeechPoll {
        let Some(handle) = self.assembling.take() else {
            return self.running_poll();
        };
        if !handle.is_finished() {
            self.assembling = Some(handle);
            return self.running_poll();
        }

        let outcome = match handle.join() {
            Ok(Ok(assembly)) => {
                let failed = self.results.iter().filter(|s| !s.is_ok()).count();
                SpeechPoll {
                    status: JobStatus::Done,
                    done: true,
                    progress: self.progress,
                    total: self.total,
                    message: (failed > 0)
                        .then(|| format!("{failed} of {} segments failed", self.results.len())),
                    composite: Some(assembly.composite),
                    captions: Some(assembly.captions),
                    total_duration: Some(assembly.total_duration),
                }
            }
            Ok(Err(e)) => self.fail(e.to_string()),
            Err(_) => self.fail("post-processing thread panicked".to_string()),
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    fn running_poll(&self) -> SpeechPoll {
        SpeechPoll {
            status: JobStatus::Running,
            done: false,
            progress: self.progress,
            total: self.total,
            message: None,
            composite: None,
            captions: None,
            total_duration: None,
        }
    }

    fn fail(&mut self, message: String) -> SpeechPoll {
        let outcome = SpeechPoll {
            status: JobStatus::Failed,
            done: true,
            progress: self.progress,
            total: self.total,
            message: Some(message),
            composite: None,
            captions: None,
            total_duration: None,
        };
        self.outcome = Some(outcome.clone());
        outcome
    }
}

/// Put the reported results into assembly shape: a segment claiming success
/// without an artifact path cannot be assembled and is reclassified as
/// failed, and the set is sorted by index so the concat list, captions and
/// total duration all follow segment order even when the helper reported in
/// completion order.
fn normalize_results(results: Vec<Segment>) -> Vec<Segment> {
    let mut results: Vec<Segment> = results
        .into_iter()
        .map(|mut s| {
            if s.is_ok() && s.path.is_none() {
                s.status = SegmentStatus::Error;
                s.error = Some("segment reported ok without an artifact path".to_string());
            }
            s
        })
        .collect();
    results.sort_by_key(|s| s.index);
    results
}

fn default_merge_output(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = video.extension().and_then(|s| s.to_str()).unwrap_or("mp4");
    video.with_file_name(format!("{stem}_narrated.{ext}"))
}
