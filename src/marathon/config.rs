// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Values come from defaults, then `MARATHON_*` environment variables, then
//! whatever the host overrides explicitly.

use std::path::PathBuf;

/// Root directory holding one subdirectory per prepared step
pub const DEFAULT_ROOT_DIR: &str = "./marathon";

/// Shell used to wrap each step artifact
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// File name of the prepared executable inside a step directory
pub const STEP_ARTIFACT_NAME: &str = "step";

#[derive(Debug, Clone, PartialEq)]
pub struct MarathonConfig {
    /// Working directory root; doubles as the execution root for steps
    pub root_dir: PathBuf,
    /// Shell that runs the artifact and appends the status line
    pub shell: String,
}

impl MarathonConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    /// Build a config from `MARATHON_DIRECTORY` and `MARATHON_SHELL`,
    /// falling back to defaults for anything unset or empty
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = non_empty_var("MARATHON_DIRECTORY") {
            config.root_dir = PathBuf::from(dir);
        }
        if let Some(shell) = non_empty_var("MARATHON_SHELL") {
            config.shell = shell;
        }
        config
    }

    /// Directory for a single step
    pub fn step_dir(&self, step: &str) -> PathBuf {
        self.root_dir.join(step)
    }

    /// Path of a step's prepared executable
    pub fn step_artifact(&self, step: &str) -> PathBuf {
        self.step_dir(step).join(STEP_ARTIFACT_NAME)
    }
}

impl Default for MarathonConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_DIR)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
