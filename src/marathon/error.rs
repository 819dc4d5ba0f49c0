// SPDX-License-Identifier: MIT

//! Typed error handling for marathon-rs
//!
//! Configuration problems surface as [`WorkflowError`]; everything that can
//! go wrong while a step is running is folded into [`MarathonError`].

use thiserror::Error;

/// Boxed error returned by host-supplied callbacks and preparers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for marathon-rs
#[derive(Debug, Error)]
pub enum MarathonError {
    /// Workflow graph / configuration errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// The step's artifact could not be prepared during setup
    #[error("Failed to prepare artifact for step '{step}': {message}")]
    Artifact { step: String, message: String },

    /// The step's subprocess could not be started or read
    #[error("Failed to execute step '{step}': {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors (context transport)
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Workflow-specific errors
#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    /// Trigger asked for a step the workflow does not define
    #[error("Step '{0}' does not exist in workflow")]
    StepNotFound(String),

    /// Two steps share a name
    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    /// A success/error/always list names a step that does not exist
    #[error("Step '{step}' references unknown child '{child}'")]
    UnknownChild { step: String, child: String },

    /// Step declares a log level outside INFO/DEBUG/WARN/ERROR
    #[error("Unknown log level: {0}")]
    UnknownLogLevel(String),

    /// A step reached dispatch with a non-terminal status
    #[error("Unknown status in auto trigger for step '{step}': {status}")]
    UnknownStatus { step: String, status: String },
}

impl MarathonError {
    /// Create an artifact preparation error
    pub fn artifact(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Artifact {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create a spawn error for a step
    pub fn spawn(step: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            step: step.into(),
            source,
        }
    }
}
