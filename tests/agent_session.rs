#![cfg(unix)]

use std::{path::PathBuf, time::Duration};

use outrider::{AgentConfig, AgentSession, EditPoll, EditRequest, JobStatus, ToolEnv};

const ORIGINAL: &str = "from manim import *\n\nclass Intro(Scene):\n    def construct(self):\n        self.play(Write(Text(\"hi\")))\n";

fn temp_base(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "outrider_agent_{tag}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

/// A fake editing CLI: `/bin/sh -c <script>`, run with the workspace as its
/// working directory and the composed instructions on stdin.
fn fake_agent(base: &PathBuf, script: &str) -> AgentSession {
    let env = ToolEnv::explicit(base.clone(), vec![]);
    let config = AgentConfig::new("/bin/sh", env).with_base_args(["-c", script]);
    AgentSession::new(config)
}

fn request(instruction: &str) -> EditRequest {
    EditRequest {
        source: ORIGINAL.to_string(),
        file_name: "scene.py".to_string(),
        instruction: instruction.to_string(),
        system_prompt: None,
        selection: None,
    }
}

fn request_named(file_name: &str) -> EditRequest {
    EditRequest {
        file_name: file_name.to_string(),
        ..request("Make a change.")
    }
}

fn poll_until_done(session: &mut AgentSession) -> EditPoll {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let poll = session.poll();
        if poll.done {
            return poll;
        }
        assert!(std::time::Instant::now() < deadline, "edit never finished");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn workspace_count(base: &PathBuf) -> usize {
    std::fs::read_dir(base).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn edited_artifact_is_the_result() {
    let base = temp_base("artifact");
    std::fs::create_dir_all(&base).unwrap();

    let mut session = fake_agent(
        &base,
        "cat >/dev/null; printf 'edited = True\\n' > scene.py",
    );
    session.start_edit(request("Replace everything.")).unwrap();

    let poll = poll_until_done(&mut session);
    assert_eq!(poll.status, JobStatus::Done);
    assert_eq!(poll.result.as_deref(), Some("edited = True\n"));
    assert!(poll.message.is_none());
    assert_eq!(workspace_count(&base), 0, "sandbox survived the edit");

    // The terminal report is stable across repeated polls.
    let again = session.poll();
    assert_eq!(again.result, poll.result);

    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn fenced_block_in_output_is_the_fallback() {
    let base = temp_base("fenced");
    std::fs::create_dir_all(&base).unwrap();

    // The tool leaves the artifact alone and answers in prose with a block.
    let script = "cat >/dev/null; \
                  printf 'Here is the updated scene:\\n```python\\nx = 1\\ny = 2\\n```\\n'";
    let mut session = fake_agent(&base, script);
    session.start_edit(request("Make a change.")).unwrap();

    let poll = poll_until_done(&mut session);
    assert_eq!(poll.status, JobStatus::Done);
    assert_eq!(poll.result.as_deref(), Some("x = 1\ny = 2\n"));
    assert_eq!(workspace_count(&base), 0);

    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn conversational_reply_fails_the_edit() {
    let base = temp_base("chat");
    std::fs::create_dir_all(&base).unwrap();

    let script = "cat >/dev/null; \
                  printf 'Sorry, that request does not make sense to me.\\n'; \
                  printf 'Could you clarify what the animation should show?\\n'";
    let mut session = fake_agent(&base, script);
    session.start_edit(request("Do something vague.")).unwrap();

    let poll = poll_until_done(&mut session);
    assert_eq!(poll.status, JobStatus::Failed);
    assert!(poll.result.is_none());
    assert!(
        poll.message.as_deref().unwrap().contains("conversationally"),
        "got: {:?}",
        poll.message
    );
    assert_eq!(workspace_count(&base), 0);

    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn rejected_restart_leaves_the_active_edit_running() {
    let base = temp_base("restart");
    std::fs::create_dir_all(&base).unwrap();

    let mut session = fake_agent(
        &base,
        "cat >/dev/null; sleep 0.3; printf 'edited = True\\n' > scene.py",
    );
    session.start_edit(request("Replace everything.")).unwrap();
    assert_eq!(workspace_count(&base), 1);

    // An invalid follow-up request must not disturb the job in flight.
    let err = session.start_edit(request_named("../escape.py")).unwrap_err();
    assert!(err.to_string().contains("validation"));
    assert_eq!(workspace_count(&base), 1, "active sandbox was torn down");

    let poll = poll_until_done(&mut session);
    assert_eq!(poll.status, JobStatus::Done);
    assert_eq!(poll.result.as_deref(), Some("edited = True\n"));
    assert_eq!(workspace_count(&base), 0);

    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn cancel_mid_edit_cleans_up() {
    let base = temp_base("cancel");
    std::fs::create_dir_all(&base).unwrap();

    let mut session = fake_agent(&base, "cat >/dev/null; sleep 30");
    session.start_edit(request("Take your time.")).unwrap();

    let poll = session.poll();
    assert!(!poll.done);
    assert_eq!(poll.status, JobStatus::Running);

    session.cancel();
    assert_eq!(workspace_count(&base), 0, "sandbox survived cancel");

    std::fs::remove_dir_all(&base).ok();
}
