use std::path::{Path, PathBuf};

/// Variables that leak host interpreter or loader state into a spawned tool.
/// External tools get a clean view so a stray virtualenv on the host cannot
/// redirect their imports or preload libraries into them.
const DROPPED_VARS: &[&str] = &[
    "PYTHONHOME",
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "VIRTUAL_ENV",
    "CONDA_PREFIX",
    "LD_PRELOAD",
    "DYLD_INSERT_LIBRARIES",
];

/// Environment handed to every supervised subprocess, plus the base directory
/// under which per-job sandbox workspaces are created.
#[derive(Clone, Debug)]
pub struct ToolEnv {
    base_dir: PathBuf,
    vars: Vec<(String, String)>,
}

impl ToolEnv {
    /// Snapshot the current process environment minus [`DROPPED_VARS`].
    pub fn sanitized(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            vars: drop_host_vars(std::env::vars()),
        }
    }

    /// An explicit variable set, for callers that fully control the tool
    /// environment (tests, hermetic builds).
    pub fn explicit(base_dir: impl Into<PathBuf>, vars: Vec<(String, String)>) -> Self {
        Self {
            base_dir: base_dir.into(),
            vars,
        }
    }

    /// Add or replace one variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.vars.retain(|(k, _)| *k != key);
        self.vars.push((key, value.into()));
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }
}

fn drop_host_vars(vars: impl Iterator<Item = (String, String)>) -> Vec<(String, String)> {
    vars.filter(|(k, _)| !DROPPED_VARS.contains(&k.as_str()))
        .collect()
}
