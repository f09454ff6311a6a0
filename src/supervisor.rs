//! The job supervisor: owns at most one active external-tool job, exposes
//! non-blocking `start`/`poll`/`cancel`, and guarantees workspace cleanup.
//!
//! Concurrency model: one coordinating context drives the supervisor (all
//! three operations take `&mut self`); each active job owns exactly one
//! background streaming-reader thread, which publishes through an SPSC
//! channel. `poll()` drains the channel into the append-only output buffer,
//! so repeated polls observe a prefix-extending sequence.

use std::{
    process::Child,
    sync::{Arc, Mutex, mpsc},
};

use tracing::{debug, info, warn};

use crate::{
    error::OutriderResult,
    launch::{self, LaunchSpec},
    reader::{self, OutputEvent},
    workspace::Workspace,
};

/// Job lifecycle states. The supervisor itself only moves between `Idle`,
/// `Running` and `Done` ("process finished"); the job families refine `Done`
/// into success or `Failed` from tool-specific criteria (result resolution
/// for edits, the terminal progress message for generation). Cancellation
/// has no state of its own: a cancelled job is fully torn down and the
/// supervisor reports `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Done,
    Failed,
}

/// A non-blocking snapshot of the active job.
#[derive(Clone, Debug)]
pub struct PollSnapshot {
    pub status: JobStatus,
    /// `true` whenever no process is running (including when idle).
    pub done: bool,
    /// Accumulated output with terminal control sequences stripped.
    pub output: String,
    pub return_code: Option<i32>,
}

impl PollSnapshot {
    fn idle() -> Self {
        Self {
            status: JobStatus::Idle,
            done: true,
            output: String::new(),
            return_code: None,
        }
    }
}

struct ActiveJob {
    workspace: Workspace,
    child: Arc<Mutex<Option<Child>>>,
    events: mpsc::Receiver<OutputEvent>,
    output: String,
    status: JobStatus,
    return_code: Option<i32>,
}

/// Supervises one external-tool invocation at a time. Multiple independent
/// supervisors (one per tool family) coexist without shared state.
pub struct JobSupervisor {
    name: &'static str,
    active: Option<ActiveJob>,
}

impl JobSupervisor {
    pub fn new(name: &'static str) -> Self {
        Self { name, active: None }
    }

    /// Start a new job, tearing down any still-active one first (the
    /// single-active-job invariant replaces rejection). Returns immediately;
    /// all blocking I/O happens on the reader thread.
    ///
    /// On launch failure the workspace is destroyed before the error is
    /// returned, so no orphan directory survives a failed start.
    pub fn start(&mut self, workspace: Workspace, spec: LaunchSpec) -> OutriderResult<()> {
        self.cancel();

        let launched = match launch::launch(&spec, workspace.path()) {
            Ok(launched) => launched,
            Err(e) => {
                if let Err(de) = workspace.destroy() {
                    warn!(supervisor = self.name, "workspace cleanup after failed launch: {de}");
                }
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel();
        // Detached: after a kill the pipe hits EOF and the thread exits on
        // its own. Joining here could hang on a tool that leaks the pipe to
        // grandchildren.
        let _ = reader::spawn_reader(launched.output, Arc::clone(&launched.child), tx);

        info!(
            supervisor = self.name,
            program = %spec.program,
            workspace = %workspace.path().display(),
            "job started"
        );

        self.active = Some(ActiveJob {
            workspace,
            child: launched.child,
            events: rx,
            output: String::new(),
            status: JobStatus::Running,
            return_code: None,
        });
        Ok(())
    }

    /// Drain pending reader events and return the current snapshot. Never
    /// blocks; safe at any rate, including before the first byte of output
    /// and repeatedly after completion (terminal snapshots are stable until
    /// the next `start` or `cancel`).
    pub fn poll(&mut self) -> PollSnapshot {
        let Some(job) = self.active.as_mut() else {
            return PollSnapshot::idle();
        };

        if job.status == JobStatus::Running {
            while let Ok(event) = job.events.try_recv() {
                match event {
                    OutputEvent::Chunk(text) => job.output.push_str(&text),
                    OutputEvent::Exited(code) => {
                        debug!(supervisor = self.name, code, "job process exited");
                        job.return_code = code;
                        job.status = JobStatus::Done;
                        break;
                    }
                }
            }
        }

        PollSnapshot {
            status: job.status,
            done: job.status != JobStatus::Running,
            output: strip_control_sequences(&job.output),
            return_code: job.return_code,
        }
    }

    /// The raw accumulated output buffer (no display stripping). Families
    /// parse protocols and mine results from this.
    pub fn raw_output(&self) -> &str {
        self.active.as_ref().map(|j| j.output.as_str()).unwrap_or("")
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.active.as_ref().map(|j| &j.workspace)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Kill the process if alive, destroy the workspace, and reset to idle.
    /// Synchronous: when this returns, the process has been reaped and the
    /// workspace is gone. No-op when no job is active; safe to call twice.
    pub fn cancel(&mut self) {
        let Some(job) = self.active.take() else {
            return;
        };

        if let Ok(mut slot) = job.child.lock()
            && let Some(mut child) = slot.take()
        {
            child.kill().ok();
            child.wait().ok();
        }
        // The receiver drops here; the reader thread sees EOF after the kill
        // and exits on its own.

        if let Err(e) = job.workspace.destroy() {
            warn!(supervisor = self.name, "workspace cleanup on cancel: {e}");
        }
        info!(supervisor = self.name, "job cancelled");
    }
}

impl Drop for JobSupervisor {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Strip ANSI CSI/OSC sequences and normalize carriage returns, so tools
/// that redraw progress lines display sanely in a plain text buffer.
pub fn strip_control_sequences(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    // CSI: parameters then a final byte in '@'..='~'.
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    // OSC: terminated by BEL or ESC-backslash.
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {
                    chars.next();
                }
            },
            '\r' => {
                if chars.peek() != Some(&'\n') {
                    out.push('\n');
                }
            }
            _ => out.push(c),
        }
    }
    out
}
