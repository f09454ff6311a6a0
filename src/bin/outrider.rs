use std::{
    io::Write as _,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use outrider::{
    AgentConfig, AgentSession, EditRequest, SpeechConfig, SpeechSession, ToolEnv, audio,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "outrider", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe whether an external tool is installed.
    Check(CheckArgs),
    /// Run an AI edit of a single file and stream the tool's output.
    Edit(EditArgs),
    /// Synthesize narration for a script file and assemble the composite.
    Narrate(NarrateArgs),
    /// Merge a narration composite into an existing video (requires `ffmpeg`).
    Merge(MergeArgs),
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Tool to probe.
    #[arg(long, default_value = outrider::agent::DEFAULT_AGENT_PROGRAM)]
    program: String,
}

#[derive(Parser, Debug)]
struct EditArgs {
    /// File whose contents are handed to the editing tool.
    #[arg(long)]
    file: PathBuf,

    /// Instruction text.
    #[arg(long)]
    instruction: String,

    /// Editing CLI to invoke.
    #[arg(long, default_value = outrider::agent::DEFAULT_AGENT_PROGRAM)]
    program: String,

    /// Model identifier forwarded to the tool.
    #[arg(long)]
    model: Option<String>,

    /// Allow the tool to search the web.
    #[arg(long)]
    web_search: bool,

    /// Write the resolved result back to the input file instead of stdout.
    #[arg(long)]
    write: bool,

    /// Base directory for per-job sandbox workspaces.
    #[arg(long)]
    workdir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct NarrateArgs {
    /// Script file, one narration segment per non-empty line.
    #[arg(long)]
    script: PathBuf,

    /// Batch-generate helper script.
    #[arg(long)]
    helper: PathBuf,

    /// Interpreter used to run the helper.
    #[arg(long, default_value = "python3")]
    interpreter: PathBuf,

    /// Voice identifier.
    #[arg(long, default_value = "default")]
    voice: String,

    /// Speed multiplier.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Silence gap between segments, in seconds.
    #[arg(long, default_value_t = outrider::speech::DEFAULT_SILENCE_GAP_SEC)]
    gap: f64,

    /// Copy the composite audio here when done.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Copy the SRT captions here when done.
    #[arg(long)]
    captions_out: Option<PathBuf>,

    /// Base directory for per-job sandbox workspaces.
    #[arg(long)]
    workdir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct MergeArgs {
    /// Existing video whose audio is replaced.
    #[arg(long)]
    video: PathBuf,

    /// Composite audio to merge in.
    #[arg(long)]
    audio: PathBuf,

    /// Output path (defaults next to the video).
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Check(args) => cmd_check(args),
        Command::Edit(args) => cmd_edit(args),
        Command::Narrate(args) => cmd_narrate(args),
        Command::Merge(args) => cmd_merge(args),
    }
}

fn tool_env(workdir: Option<PathBuf>) -> ToolEnv {
    let base = workdir.unwrap_or_else(|| std::env::temp_dir().join("outrider-jobs"));
    ToolEnv::sanitized(base)
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let report = outrider::check_installed(&args.program);
    match (report.installed, report.message) {
        (true, Some(msg)) => eprintln!("installed: {msg}"),
        (true, None) => eprintln!("installed"),
        (false, msg) => {
            anyhow::bail!("{}", msg.unwrap_or_else(|| "not installed".to_string()));
        }
    }
    Ok(())
}

fn cmd_edit(args: EditArgs) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("read '{}'", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .context("input file has no usable name")?
        .to_string();

    let mut config = AgentConfig::new(&args.program, tool_env(args.workdir))
        .with_web_search(args.web_search);
    if let Some(model) = args.model {
        config = config.with_model(model);
    }

    let mut session = AgentSession::new(config);
    session.start_edit(EditRequest {
        source,
        file_name,
        instruction: args.instruction,
        system_prompt: None,
        selection: None,
    })?;

    let mut printed = 0usize;
    let poll = loop {
        let poll = session.poll();
        if poll.output.len() > printed {
            eprint!("{}", &poll.output[printed..]);
            std::io::stderr().flush().ok();
            printed = poll.output.len();
        }
        if poll.done {
            break poll;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    match (poll.result, poll.message) {
        (Some(result), _) => {
            if args.write {
                std::fs::write(&args.file, &result)
                    .with_context(|| format!("write '{}'", args.file.display()))?;
                eprintln!("updated {}", args.file.display());
            } else {
                print!("{result}");
            }
            Ok(())
        }
        (None, message) => {
            anyhow::bail!("{}", message.unwrap_or_else(|| "edit produced no result".to_string()))
        }
    }
}

fn cmd_narrate(args: NarrateArgs) -> anyhow::Result<()> {
    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("read '{}'", args.script.display()))?;
    let segments: Vec<String> = script
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let env = tool_env(args.workdir);
    let config = SpeechConfig::new(args.interpreter, args.helper, env).with_gap(args.gap);
    let mut session = SpeechSession::new(config);
    let total = session.start_narration(&segments, &args.voice, args.speed)?;
    eprintln!("narrating {total} segments");

    let mut last_progress = 0;
    let poll = loop {
        let poll = session.poll();
        if poll.progress > last_progress {
            eprintln!("  {}/{}", poll.progress, poll.total);
            last_progress = poll.progress;
        }
        if poll.done {
            break poll;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let Some(composite) = poll.composite else {
        anyhow::bail!(
            "{}",
            poll.message.unwrap_or_else(|| "narration failed".to_string())
        );
    };
    if let Some(message) = &poll.message {
        eprintln!("warning: {message}");
    }
    if let Some(duration) = poll.total_duration {
        eprintln!("composite duration: {duration:.2}s");
    }

    deliver(&composite, args.out.as_deref(), "composite")?;
    if let Some(captions) = poll.captions {
        deliver(&captions, args.captions_out.as_deref(), "captions")?;
    }
    Ok(())
}

/// Copy a pipeline artifact out of the workspace, or just report where it is.
fn deliver(artifact: &Path, out: Option<&Path>, label: &str) -> anyhow::Result<()> {
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create output dir '{}'", parent.display()))?;
            }
            std::fs::copy(artifact, out)
                .with_context(|| format!("copy {label} to '{}'", out.display()))?;
            eprintln!("wrote {}", out.display());
        }
        None => eprintln!("{label}: {}", artifact.display()),
    }
    Ok(())
}

fn cmd_merge(args: MergeArgs) -> anyhow::Result<()> {
    if !audio::is_ffmpeg_on_path() {
        anyhow::bail!("ffmpeg is required for merging, but was not found on PATH");
    }
    let out = args.out.unwrap_or_else(|| {
        let stem = args
            .video
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let ext = args.video.extension().and_then(|s| s.to_str()).unwrap_or("mp4");
        args.video.with_file_name(format!("{stem}_narrated.{ext}"))
    });
    audio::merge_into_video(&args.video, &args.audio, &out)?;
    eprintln!("wrote {}", out.display());
    Ok(())
}
