// SPDX-License-Identifier: MIT

pub mod config;
pub mod emit;
pub mod engine;
pub mod error;
pub mod run;
pub mod step;
pub mod workflow;

pub use config::MarathonConfig;
pub use emit::{ChannelEmitter, EmittedState, Emitter, LogEmitter};
pub use engine::{Marathon, Payload};
pub use error::{BoxError, MarathonError, WorkflowError};
pub use run::{RunHandle, RunSummary};
pub use step::artifact::{ArtifactPreparer, ShellScriptPreparer};
pub use workflow::types::{Step, StepState, StepStatus, TriggerRule, WorkflowDefinition};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
