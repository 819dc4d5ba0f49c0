// SPDX-License-Identifier: MIT

//! Handles for in-flight runs
//!
//! Every trigger of a run, including the children it dispatches, is spawned
//! on the run's [`TaskTracker`] and shares its [`CancellationToken`].

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::marathon::workflow::state::{ContextTable, StatusTable};
use crate::marathon::workflow::types::StepStatus;

/// Task group and cancellation scope shared by all triggers of one run
#[derive(Clone)]
pub struct RunScope {
    pub run_id: String,
    pub tracker: TaskTracker,
    pub cancel: CancellationToken,
}

impl RunScope {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Final view of a run once every dispatched trigger has returned
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub statuses: HashMap<String, StepStatus>,
    pub context: BTreeMap<String, String>,
}

impl RunSummary {
    pub fn status(&self, step: &str) -> Option<StepStatus> {
        self.statuses.get(step).copied()
    }
}

/// Returned by `Marathon::trigger`; dropping it does not stop the run
pub struct RunHandle {
    scope: RunScope,
    statuses: StatusTable,
    context: ContextTable,
}

impl RunHandle {
    pub(crate) fn new(scope: RunScope, statuses: StatusTable, context: ContextTable) -> Self {
        Self {
            scope,
            statuses,
            context,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.scope.run_id
    }

    /// Stop dispatching children and kill steps that are still running
    pub fn cancel(&self) {
        log::info!("Cancelling run {}", self.scope.run_id);
        self.scope.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.scope.tracker.is_empty()
    }

    /// Wait for the whole trigger tree of this run to finish
    pub async fn wait(&self) -> RunSummary {
        self.scope.tracker.wait().await;
        self.summary()
    }

    /// Current statuses and context, whether or not the run has finished
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.scope.run_id.clone(),
            statuses: self.statuses.snapshot(&self.scope.run_id),
            context: self.context.snapshot(&self.scope.run_id),
        }
    }
}
