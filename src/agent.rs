//! The interactive-edit job family: drives an AI code-editing CLI against a
//! sandboxed copy of one artifact file.

use std::{
    path::PathBuf,
    process::{Command, Stdio},
    time::Duration,
};

use crate::{
    env::ToolEnv,
    error::{OutriderError, OutriderResult},
    launch::LaunchSpec,
    resolve,
    supervisor::{JobStatus, JobSupervisor},
    workspace::Workspace,
};

pub const DEFAULT_AGENT_PROGRAM: &str = "claude";

/// How long the installation probe waits for `--version` before declaring
/// the tool "found but unclear".
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Editing CLI to invoke.
    pub program: String,
    /// Arguments always passed, ahead of any capability flags.
    pub base_args: Vec<String>,
    /// Model identifier forwarded as `--model <id>` when set.
    pub model: Option<String>,
    /// Adds `--web-search` when enabled.
    pub web_search: bool,
    pub env: ToolEnv,
}

impl AgentConfig {
    pub fn new(program: impl Into<String>, env: ToolEnv) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            model: None,
            web_search: false,
            env,
        }
    }

    pub fn with_base_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }
}

/// Outcome of the installation probe.
#[derive(Clone, Debug)]
pub struct ProbeReport {
    pub installed: bool,
    pub message: Option<String>,
}

/// Run `<program> --version` with a bounded timeout and classify the result:
/// not found, found-but-unclear, or found.
pub fn check_installed(program: &str) -> ProbeReport {
    let spawned = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return ProbeReport {
                installed: false,
                message: Some(format!(
                    "'{program}' was not found on PATH; install it to enable this feature"
                )),
            };
        }
        Err(e) => {
            return ProbeReport {
                installed: false,
                message: Some(format!("could not run '{program}': {e}")),
            };
        }
    };

    let deadline = std::time::Instant::now() + PROBE_TIMEOUT;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    child.kill().ok();
                    child.wait().ok();
                    return ProbeReport {
                        installed: true,
                        message: Some(format!(
                            "'{program}' is present but did not answer --version in time"
                        )),
                    };
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return ProbeReport {
                    installed: true,
                    message: Some(format!("could not wait for '{program}': {e}")),
                };
            }
        }
    };

    let mut version = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        use std::io::Read as _;
        let _ = stdout.read_to_string(&mut version);
    }
    let first_line = version.lines().next().unwrap_or("").trim().to_string();

    if status.success() {
        ProbeReport {
            installed: true,
            message: (!first_line.is_empty()).then_some(first_line),
        }
    } else {
        ProbeReport {
            installed: true,
            message: Some(format!(
                "'{program}' is present but --version exited with {status}"
            )),
        }
    }
}

/// One edit request: the artifact text, where it notionally lives, and what
/// to do to it.
#[derive(Clone, Debug)]
pub struct EditRequest {
    pub source: String,
    /// File name the artifact takes inside the workspace (e.g. `scene.py`).
    pub file_name: String,
    pub instruction: String,
    /// Optional system prompt, written as `AGENT.md` for tools that read a
    /// project-context file on startup.
    pub system_prompt: Option<String>,
    /// Optional byte range of `source` the edit should be confined to.
    pub selection: Option<(usize, usize)>,
}

/// Snapshot returned by [`AgentSession::poll`]. Once `done`, the same
/// terminal report is returned until the next `start_edit` or `cancel`.
#[derive(Clone, Debug)]
pub struct EditPoll {
    pub status: JobStatus,
    pub done: bool,
    pub output: String,
    /// Resolved artifact contents on success.
    pub result: Option<String>,
    pub message: Option<String>,
}

struct PendingEdit {
    artifact: PathBuf,
    baseline: String,
}

/// Supervises interactive-edit jobs for one editing CLI.
pub struct AgentSession {
    config: AgentConfig,
    supervisor: JobSupervisor,
    pending: Option<PendingEdit>,
    terminal: Option<EditPoll>,
}

impl AgentSession {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            supervisor: JobSupervisor::new("agent"),
            pending: None,
            terminal: None,
        }
    }

    pub fn check_installed(&self) -> ProbeReport {
        check_installed(&self.config.program)
    }

    /// Start an edit job. Any still-active job is cancelled and its
    /// workspace destroyed when the new launch happens; a failed validation
    /// or workspace preparation leaves the previous job untouched.
    pub fn start_edit(&mut self, request: EditRequest) -> OutriderResult<()> {
        validate_file_name(&request.file_name)?;

        let workspace = Workspace::create(self.config.env.base_dir(), "edit")?;
        let artifact = match self.prepare_workspace(&workspace, &request) {
            Ok(artifact) => artifact,
            Err(e) => {
                workspace.destroy().ok();
                return Err(e);
            }
        };

        let instructions = compose_instructions(&request);
        let mut spec = LaunchSpec::new(&self.config.program, self.config.env.clone())
            .args(self.config.base_args.iter().cloned())
            .stdin_payload(instructions.into_bytes());
        if let Some(model) = &self.config.model {
            spec = spec.arg("--model").arg(model);
        }
        if self.config.web_search {
            spec = spec.arg("--web-search");
        }

        // start() tears down the old job; only now does the session's own
        // bookkeeping switch over to the new one.
        if let Err(e) = self.supervisor.start(workspace, spec) {
            self.terminal = None;
            self.pending = None;
            return Err(e);
        }
        self.terminal = None;
        self.pending = Some(PendingEdit {
            artifact,
            baseline: request.source,
        });
        Ok(())
    }

    fn prepare_workspace(
        &self,
        workspace: &Workspace,
        request: &EditRequest,
    ) -> OutriderResult<PathBuf> {
        let artifact = workspace.write_file(&request.file_name, &request.source)?;
        workspace.write_file("INSTRUCTIONS.md", &compose_instructions(request))?;
        if let Some(system_prompt) = &request.system_prompt {
            workspace.write_file("AGENT.md", system_prompt)?;
        }
        Ok(artifact)
    }

    /// Non-blocking progress/result snapshot. When the process has exited,
    /// the result resolver runs once, the workspace is destroyed, and the
    /// terminal report is cached for subsequent polls.
    pub fn poll(&mut self) -> EditPoll {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }

        let snap = self.supervisor.poll();
        if !snap.done {
            return EditPoll {
                status: snap.status,
                done: false,
                output: snap.output,
                result: None,
                message: None,
            };
        }

        let Some(pending) = self.pending.take() else {
            // Nothing was ever started.
            return EditPoll {
                status: JobStatus::Idle,
                done: true,
                output: snap.output,
                result: None,
                message: None,
            };
        };

        let resolved = resolve::resolve_edit(
            &pending.artifact,
            &pending.baseline,
            self.supervisor.raw_output(),
        );
        // Result consumed; the sandbox has served its purpose.
        self.supervisor.cancel();

        let terminal = match resolved {
            Ok(result) => EditPoll {
                status: JobStatus::Done,
                done: true,
                output: snap.output,
                result: Some(result),
                message: None,
            },
            Err(e) => EditPoll {
                status: JobStatus::Failed,
                done: true,
                output: snap.output,
                result: None,
                message: Some(e.to_string()),
            },
        };
        self.terminal = Some(terminal.clone());
        terminal
    }

    /// Kill any running job and clean up. Always succeeds; safe when idle.
    pub fn cancel(&mut self) {
        self.supervisor.cancel();
        self.pending = None;
        self.terminal = None;
    }
}

fn validate_file_name(name: &str) -> OutriderResult<()> {
    if name.is_empty() {
        return Err(OutriderError::validation("artifact file name is empty"));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(OutriderError::validation(format!(
            "artifact file name '{name}' must be a plain name inside the workspace"
        )));
    }
    Ok(())
}

fn compose_instructions(request: &EditRequest) -> String {
    let mut text = request.instruction.trim_end().to_string();
    text.push_str(&format!(
        "\n\nEdit the file '{}' in place and write the complete updated file. \
         Do not create or modify any other file.\n",
        request.file_name
    ));
    if let Some((start, end)) = request.selection {
        text.push_str(&format!(
            "Confine your change to bytes {start}..{end} of the file; leave the rest untouched.\n"
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_stay_inside_the_workspace() {
        assert!(validate_file_name("scene.py").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("../escape.py").is_err());
        assert!(validate_file_name("dir/scene.py").is_err());
    }

    #[test]
    fn instructions_mention_artifact_and_selection() {
        let request = EditRequest {
            source: String::new(),
            file_name: "scene.py".to_string(),
            instruction: "Make the square blue.".to_string(),
            system_prompt: None,
            selection: Some((10, 42)),
        };
        let text = compose_instructions(&request);
        assert!(text.starts_with("Make the square blue."));
        assert!(text.contains("'scene.py'"));
        assert!(text.contains("bytes 10..42"));
    }

    #[test]
    fn probe_classifies_missing_tool() {
        let report = check_installed("outrider-test-no-such-binary");
        assert!(!report.installed);
        assert!(report.message.unwrap().contains("not found on PATH"));
    }
}
