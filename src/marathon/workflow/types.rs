// SPDX-License-Identifier: MIT

//! YAML schema types and runtime records for workflows
//!
//! This module contains the step/workflow definitions parsed from YAML,
//! the status taxonomy, and the per-execution [`StepState`] record handed
//! to emitters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log levels a step may request for its own artifact
pub const LOG_LEVELS: [&str; 4] = ["INFO", "DEBUG", "WARN", "ERROR"];

/// Top-level workflow definition
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A named unit of work with outcome-keyed children
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Step {
    /// Unique name within the workflow
    pub name: String,
    /// Step body, opaque to the engine; resolved by an artifact preparer
    #[serde(default)]
    pub run: String,
    /// Children triggered when this step succeeds
    #[serde(default)]
    pub success: Vec<String>,
    /// Children triggered when this step fails
    #[serde(default)]
    pub error: Vec<String>,
    /// Children triggered once this step reaches either terminal status
    #[serde(default)]
    pub always: Vec<String>,
    /// Log level handed to the step artifact (INFO, DEBUG, WARN, ERROR)
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: run.into(),
            ..Default::default()
        }
    }

    pub fn on_success(mut self, child: impl Into<String>) -> Self {
        self.success.push(child.into());
        self
    }

    pub fn on_error(mut self, child: impl Into<String>) -> Self {
        self.error.push(child.into());
        self
    }

    pub fn on_always(mut self, child: impl Into<String>) -> Self {
        self.always.push(child.into());
        self
    }

    /// Children keyed by the rule that links them to this step
    pub fn children(&self) -> impl Iterator<Item = (&str, TriggerRule)> {
        let success = self.success.iter().map(|c| (c.as_str(), TriggerRule::Success));
        let error = self.error.iter().map(|c| (c.as_str(), TriggerRule::Error));
        let always = self.always.iter().map(|c| (c.as_str(), TriggerRule::Always));
        success.chain(error).chain(always)
    }

    /// Children to dispatch after this step finished with `status`
    pub fn children_for(&self, status: StepStatus) -> Option<Vec<&str>> {
        let primary = match status {
            StepStatus::Success => &self.success,
            StepStatus::Error => &self.error,
            _ => return None,
        };
        Some(
            primary
                .iter()
                .chain(self.always.iter())
                .map(|s| s.as_str())
                .collect(),
        )
    }
}

/// The outcome a parent must reach before a child may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerRule {
    Success,
    Error,
    Always,
}

impl TriggerRule {
    /// Whether a parent holding `status` satisfies this rule
    pub fn is_satisfied_by(self, status: Option<StepStatus>) -> bool {
        match (self, status) {
            (TriggerRule::Always, Some(s)) => s.is_terminal(),
            (TriggerRule::Success, Some(StepStatus::Success)) => true,
            (TriggerRule::Error, Some(StepStatus::Error)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerRule::Success => "success",
            TriggerRule::Error => "error",
            TriggerRule::Always => "always",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    /// Trigger was deferred because a parent requirement is unmet
    Waiting,
    Running,
    Success,
    Error,
    /// Run was cancelled while the step was executing
    Killed,
}

impl StepStatus {
    /// Success and error are the only outcomes that drive dispatch
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::NotStarted => "not_started",
            StepStatus::Waiting => "waiting",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::Killed => "killed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution record for one attempt of one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepState {
    pub step: String,
    pub run_id: String,
    pub status: StepStatus,
    pub output: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
}

impl StepState {
    pub fn start(step: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            run_id: run_id.into(),
            status: StepStatus::Running,
            output: String::new(),
            started: Utc::now(),
            finished: None,
        }
    }

    /// Append one output line, newline-terminated
    pub fn push_line(&mut self, line: &str) {
        self.output.push_str(line);
        self.output.push('\n');
    }

    pub fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.finished = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_rule_needs_terminal_parent() {
        let rule = TriggerRule::Always;
        assert!(!rule.is_satisfied_by(None));
        assert!(!rule.is_satisfied_by(Some(StepStatus::NotStarted)));
        assert!(!rule.is_satisfied_by(Some(StepStatus::Running)));
        assert!(!rule.is_satisfied_by(Some(StepStatus::Killed)));
        assert!(rule.is_satisfied_by(Some(StepStatus::Success)));
        assert!(rule.is_satisfied_by(Some(StepStatus::Error)));
    }

    #[test]
    fn test_outcome_rules_need_exact_match() {
        assert!(TriggerRule::Success.is_satisfied_by(Some(StepStatus::Success)));
        assert!(!TriggerRule::Success.is_satisfied_by(Some(StepStatus::Error)));
        assert!(TriggerRule::Error.is_satisfied_by(Some(StepStatus::Error)));
        assert!(!TriggerRule::Error.is_satisfied_by(Some(StepStatus::Success)));
        assert!(!TriggerRule::Error.is_satisfied_by(Some(StepStatus::Waiting)));
    }

    #[test]
    fn test_children_for_outcome() {
        let step = Step::new("b", "")
            .on_success("s")
            .on_error("c")
            .on_always("d");

        assert_eq!(step.children_for(StepStatus::Success), Some(vec!["s", "d"]));
        assert_eq!(step.children_for(StepStatus::Error), Some(vec!["c", "d"]));
        assert_eq!(step.children_for(StepStatus::Running), None);
        assert_eq!(step.children_for(StepStatus::Killed), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&StepStatus::NotStarted).unwrap();
        assert_eq!(json, "\"not_started\"");
        assert_eq!(StepStatus::Killed.to_string(), "killed");
    }

    #[test]
    fn test_state_push_line_and_finish() {
        let mut state = StepState::start("a", "run-1");
        assert_eq!(state.status, StepStatus::Running);
        state.push_line("hello");
        state.push_line("");
        assert_eq!(state.output, "hello\n\n");

        state.finish(StepStatus::Success);
        assert_eq!(state.status, StepStatus::Success);
        assert!(state.finished.is_some());
    }
}
