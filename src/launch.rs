use std::{
    io::{PipeReader, Write as _},
    path::Path,
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
};

use crate::{
    env::ToolEnv,
    error::{OutriderError, OutriderResult},
};

/// Everything needed to start one supervised external-tool invocation:
/// command template, environment, and the request payload fed on stdin.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: ToolEnv,
    /// Serialized request written to the child's stdin, which is then closed
    /// so tools that block waiting for EOF make progress.
    pub stdin_payload: Vec<u8>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, env: ToolEnv) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env,
            stdin_payload: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin_payload = payload.into();
        self
    }
}

/// A spawned tool process. The child handle is shared with the streaming
/// reader thread, which reaps it after end-of-stream; `cancel` kills through
/// the same slot.
pub struct Launched {
    pub child: Arc<Mutex<Option<Child>>>,
    /// Read side of the merged stdout+stderr stream.
    pub output: PipeReader,
}

/// Spawn `spec` with its working directory set to `workspace`.
///
/// stdout and stderr share one pipe writer, so the caller observes a single
/// stream ordered as the process emitted it. Stream provenance is lost, which
/// is the accepted tradeoff for a single display surface.
pub fn launch(spec: &LaunchSpec, workspace: &Path) -> OutriderResult<Launched> {
    let (reader, writer) = std::io::pipe()
        .map_err(|e| OutriderError::spawn(format!("failed to create output pipe: {e}")))?;
    let writer_err = writer
        .try_clone()
        .map_err(|e| OutriderError::spawn(format!("failed to clone output pipe: {e}")))?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(workspace)
        .env_clear()
        .envs(spec.env.vars().iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::piped())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(writer_err));

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => OutriderError::unavailable(format!(
            "'{}' was not found on PATH",
            spec.program
        )),
        _ => OutriderError::spawn(format!("failed to start '{}': {e}", spec.program)),
    })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| OutriderError::spawn("failed to open child stdin (unexpected)"))?;

    // Feed the payload from its own thread: a tool that emits output before
    // draining stdin must not deadlock the coordinator against a full pipe.
    let payload = spec.stdin_payload.clone();
    std::thread::spawn(move || {
        let _ = stdin.write_all(&payload);
        // Dropping stdin closes the pipe and signals "no more input".
    });

    tracing::debug!(program = %spec.program, workspace = %workspace.display(), "tool spawned");

    Ok(Launched {
        child: Arc::new(Mutex::new(Some(child))),
        output: reader,
    })
}
