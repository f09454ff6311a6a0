#![forbid(unsafe_code)]

//! Supervision of long-running external authoring tools (an AI code-editing
//! CLI, a local text-to-speech helper) as cancellable background jobs with
//! sandboxed per-job workspaces, streamed output, result recovery from
//! non-compliant tool output, and ffmpeg-based narration assembly.

pub mod agent;
pub mod audio;
pub mod captions;
pub mod env;
pub mod error;
pub mod launch;
pub mod protocol;
pub mod reader;
pub mod resolve;
pub mod speech;
pub mod supervisor;
pub mod workspace;

pub use agent::{AgentConfig, AgentSession, EditPoll, EditRequest, ProbeReport, check_installed};
pub use env::ToolEnv;
pub use error::{OutriderError, OutriderResult};
pub use launch::LaunchSpec;
pub use protocol::{ProgressMessage, Segment, SegmentStatus};
pub use speech::{SpeechConfig, SpeechPoll, SpeechSession};
pub use supervisor::{JobStatus, JobSupervisor, PollSnapshot};
pub use workspace::Workspace;
