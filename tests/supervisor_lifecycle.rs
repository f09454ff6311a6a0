#![cfg(unix)]

use std::{path::PathBuf, time::Duration};

use outrider::{JobStatus, JobSupervisor, LaunchSpec, ToolEnv, Workspace};

fn temp_base(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "outrider_sup_{tag}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn sh(env: &ToolEnv, script: &str) -> LaunchSpec {
    LaunchSpec::new("/bin/sh", env.clone()).args(["-c", script])
}

fn poll_until_done(sup: &mut JobSupervisor) -> outrider::supervisor::PollSnapshot {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snap = sup.poll();
        if snap.done {
            return snap;
        }
        assert!(std::time::Instant::now() < deadline, "job never finished");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn output_accumulates_as_a_growing_prefix() {
    let base = temp_base("prefix");
    std::fs::create_dir_all(&base).unwrap();
    let env = ToolEnv::explicit(base.clone(), vec![]);

    let mut sup = JobSupervisor::new("test");
    let ws = Workspace::create(&base, "job").unwrap();
    sup.start(ws, sh(&env, "printf one; sleep 0.3; printf two"))
        .unwrap();

    let mut previous = String::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snap = sup.poll();
        assert!(
            snap.output.starts_with(&previous),
            "output shrank: {previous:?} -> {:?}",
            snap.output
        );
        previous = snap.output.clone();
        if snap.done {
            assert_eq!(snap.status, JobStatus::Done);
            assert_eq!(snap.return_code, Some(0));
            assert_eq!(snap.output, "onetwo");
            break;
        }
        assert!(std::time::Instant::now() < deadline, "job never finished");
        std::thread::sleep(Duration::from_millis(20));
    }

    // Terminal snapshots stay stable across repeated polls.
    let again = sup.poll();
    assert_eq!(again.output, "onetwo");
    assert!(again.done);

    sup.cancel();
    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn stderr_is_interleaved_into_the_same_stream() {
    let base = temp_base("merge");
    std::fs::create_dir_all(&base).unwrap();
    let env = ToolEnv::explicit(base.clone(), vec![]);

    let mut sup = JobSupervisor::new("test");
    let ws = Workspace::create(&base, "job").unwrap();
    sup.start(ws, sh(&env, "printf out; printf err 1>&2; printf more"))
        .unwrap();

    let snap = poll_until_done(&mut sup);
    assert!(snap.output.contains("out"));
    assert!(snap.output.contains("err"));
    assert!(snap.output.contains("more"));

    sup.cancel();
    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn ansi_sequences_are_stripped_from_snapshots() {
    let base = temp_base("ansi");
    std::fs::create_dir_all(&base).unwrap();
    let env = ToolEnv::explicit(base.clone(), vec![]);

    let mut sup = JobSupervisor::new("test");
    let ws = Workspace::create(&base, "job").unwrap();
    sup.start(
        ws,
        sh(&env, r"printf '\033[32mgreen\033[0m plain\r\n'"),
    )
    .unwrap();

    let snap = poll_until_done(&mut sup);
    assert_eq!(snap.output, "green plain\n");
    // The raw buffer keeps what the tool actually wrote.
    assert!(sup.raw_output().contains('\u{1b}'));

    sup.cancel();
    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn cancel_kills_the_process_and_removes_the_workspace() {
    let base = temp_base("cancel");
    std::fs::create_dir_all(&base).unwrap();
    let env = ToolEnv::explicit(base.clone(), vec![]);

    let mut sup = JobSupervisor::new("test");
    let ws = Workspace::create(&base, "job").unwrap();
    let ws_path = ws.path().to_path_buf();
    sup.start(ws, sh(&env, "sleep 30")).unwrap();

    let snap = sup.poll();
    assert_eq!(snap.status, JobStatus::Running);
    assert!(!snap.done);

    sup.cancel();
    assert!(!sup.is_active());
    assert!(!ws_path.exists(), "workspace survived cancel");

    // Cancelled supervisor polls idle and a second cancel is a no-op.
    let snap = sup.poll();
    assert_eq!(snap.status, JobStatus::Idle);
    sup.cancel();

    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn starting_a_new_job_replaces_the_old_one() {
    let base = temp_base("replace");
    std::fs::create_dir_all(&base).unwrap();
    let env = ToolEnv::explicit(base.clone(), vec![]);

    let mut sup = JobSupervisor::new("test");
    let first = Workspace::create(&base, "job").unwrap();
    let first_path = first.path().to_path_buf();
    sup.start(first, sh(&env, "sleep 30")).unwrap();

    let second = Workspace::create(&base, "job").unwrap();
    let second_path = second.path().to_path_buf();
    sup.start(second, sh(&env, "printf done")).unwrap();

    assert!(!first_path.exists(), "replaced job's workspace survived");
    assert!(second_path.exists());

    let snap = poll_until_done(&mut sup);
    assert_eq!(snap.output, "done");

    sup.cancel();
    assert!(!second_path.exists());
    std::fs::remove_dir_all(&base).ok();
}

#[test]
fn failed_launch_destroys_the_workspace() {
    let base = temp_base("nolaunch");
    std::fs::create_dir_all(&base).unwrap();
    let env = ToolEnv::explicit(base.clone(), vec![]);

    let mut sup = JobSupervisor::new("test");
    let ws = Workspace::create(&base, "job").unwrap();
    let ws_path = ws.path().to_path_buf();

    let spec = LaunchSpec::new("outrider-test-no-such-binary", env);
    let err = sup.start(ws, spec).err().unwrap();
    assert!(err.is_unavailable(), "got: {err}");
    assert!(!sup.is_active());
    assert!(!ws_path.exists(), "workspace survived failed launch");

    std::fs::remove_dir_all(&base).ok();
}
