// SPDX-License-Identifier: MIT

//! Turning a step body into an executable on disk
//!
//! The engine only needs an executable at `<root>/<step>/step` that speaks
//! the line protocol. How it gets there is up to the [`ArtifactPreparer`].

use async_trait::async_trait;
use std::path::Path;

use super::protocol::{CONTEXT_KEY_ENV_PREFIX, CONTEXT_SET_MARKER, SEPARATOR};
use crate::marathon::error::BoxError;
use crate::marathon::workflow::types::Step;

/// Produces the runnable artifact for a step
#[async_trait]
pub trait ArtifactPreparer: Send + Sync {
    /// Write an executable for `step` at `artifact`; its parent directory
    /// already exists
    async fn prepare(&self, step: &Step, artifact: &Path) -> Result<(), BoxError>;
}

/// Writes each step body into an executable bash script
///
/// The script gets a small prelude:
/// - `marathon_get_context KEY` prints a context value, empty if unset
/// - `marathon_set_context KEY VALUE` emits a context-set line
/// - `MARATHON_LOG_LEVEL` holds the step's log level
#[derive(Debug, Clone)]
pub struct ShellScriptPreparer {
    interpreter: String,
}

impl ShellScriptPreparer {
    pub fn new() -> Self {
        Self {
            interpreter: "/usr/bin/env bash".to_string(),
        }
    }

    /// Full script text for a step
    pub fn render(&self, step: &Step) -> String {
        let level = step.log_level.as_deref().unwrap_or("INFO");
        format!(
            r#"#!{interpreter}
export MARATHON_LOG_LEVEL="{level}"

marathon_get_context() {{
  local var
  var="{ctx_prefix}$(printf '%s' "$1" | od -An -v -tx1 | tr -d ' \n')"
  printf '%s' "${{!var}}"
}}

marathon_set_context() {{
  printf '{marker}{sep}%s{sep}%s\n' "$1" "$2"
}}

{body}
"#,
            interpreter = self.interpreter,
            level = level,
            ctx_prefix = CONTEXT_KEY_ENV_PREFIX,
            marker = CONTEXT_SET_MARKER,
            sep = SEPARATOR,
            body = step.run,
        )
    }
}

impl Default for ShellScriptPreparer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactPreparer for ShellScriptPreparer {
    async fn prepare(&self, step: &Step, artifact: &Path) -> Result<(), BoxError> {
        tokio::fs::write(artifact, self.render(step)).await?;
        set_executable(artifact).await?;
        log::debug!("Wrote script for step '{}' to {}", step.name, artifact.display());
        Ok(())
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
