// SPDX-License-Identifier: MIT

//! Trigger engine
//!
//! `Marathon` owns the validated step graph and the shared tables. A trigger
//! checks the step's parent requirements, runs it, records the outcome, and
//! dispatches the matching children as new tasks on the same run scope.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use uuid::Uuid;

use crate::marathon::config::MarathonConfig;
use crate::marathon::emit::{deliver, Emitter};
use crate::marathon::error::{MarathonError, WorkflowError};
use crate::marathon::run::{RunHandle, RunScope};
use crate::marathon::step::artifact::ArtifactPreparer;
use crate::marathon::step::runner::StepRunner;
use crate::marathon::workflow::graph::StepGraph;
use crate::marathon::workflow::state::{Claim, ContextTable, StatusTable};
use crate::marathon::workflow::types::{Step, StepState, StepStatus, WorkflowDefinition};

/// Values a host passes into a run's context
pub type Payload = HashMap<String, serde_json::Value>;

type TriggerFuture = Pin<Box<dyn Future<Output = Result<(), MarathonError>> + Send>>;

/// Workflow engine for one workflow definition
pub struct Marathon {
    graph: StepGraph,
    config: MarathonConfig,
    statuses: StatusTable,
    context: ContextTable,
    runner: StepRunner,
}

impl Marathon {
    /// Validate the workflow and prepare every step's artifact
    ///
    /// Stops at the first failure; directories created so far are left in
    /// place.
    pub async fn init(
        def: &WorkflowDefinition,
        config: MarathonConfig,
        preparer: &dyn ArtifactPreparer,
    ) -> Result<Arc<Self>, MarathonError> {
        let graph = StepGraph::build(def).map_err(|e| {
            log::error!("Failed to setup workflow {}: {}", def.name, e);
            e
        })?;

        for name in graph.step_names() {
            let dir = config.step_dir(name);
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                log::error!("Could not create step directory {}: {}", dir.display(), e);
                return Err(e.into());
            }

            let artifact = config.step_artifact(name);
            let Some(node) = graph.get(name) else {
                return Err(WorkflowError::StepNotFound(name.clone()).into());
            };
            if let Err(e) = preparer.prepare(&node.step, &artifact).await {
                log::error!("Unable to prepare step {}: {}", name, e);
                return Err(MarathonError::artifact(name, e.to_string()));
            }
        }

        log::info!(
            "Successfully setup workflow {} with {} steps",
            graph.name(),
            graph.len()
        );

        let statuses = StatusTable::new();
        let context = ContextTable::new();
        let runner = StepRunner::new(config.shell.clone(), statuses.clone(), context.clone());
        Ok(Arc::new(Self {
            graph,
            config,
            statuses,
            context,
            runner,
        }))
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    pub fn config(&self) -> &MarathonConfig {
        &self.config
    }

    /// Status of every step in a run
    pub fn statuses(&self, run_id: &str) -> HashMap<String, StepStatus> {
        self.statuses.snapshot(run_id)
    }

    /// Context of a run
    pub fn context(&self, run_id: &str) -> BTreeMap<String, String> {
        self.context.snapshot(run_id)
    }

    /// Start a fresh run at `step` and return without waiting for it
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(
        self: &Arc<Self>,
        step: &str,
        payload: Payload,
        emitter: Arc<dyn Emitter>,
    ) -> Result<RunHandle, MarathonError> {
        self.trigger_run(&Uuid::new_v4().to_string(), step, payload, emitter)
    }

    /// Like [`Marathon::trigger`] with a caller-chosen run id
    pub fn trigger_run(
        self: &Arc<Self>,
        run_id: &str,
        step: &str,
        payload: Payload,
        emitter: Arc<dyn Emitter>,
    ) -> Result<RunHandle, MarathonError> {
        if !self.graph.contains(step) {
            log::error!("Step does not exist in workflow: {}", step);
            return Err(WorkflowError::StepNotFound(step.to_string()).into());
        }

        let scope = RunScope::new(run_id);
        self.statuses.init_run(run_id, self.graph.step_names());
        log::info!("Starting run {} at step {}", run_id, step);

        self.spawn_trigger(&scope, step.to_string(), stringify_payload(payload), emitter);
        scope.tracker.close();

        Ok(RunHandle::new(
            scope,
            self.statuses.clone(),
            self.context.clone(),
        ))
    }

    fn spawn_trigger(
        self: &Arc<Self>,
        scope: &RunScope,
        step: String,
        payload: HashMap<String, String>,
        emitter: Arc<dyn Emitter>,
    ) {
        let task = Arc::clone(self).trigger_step(scope.clone(), step.clone(), payload, emitter);
        let run_id = scope.run_id.clone();
        scope.tracker.spawn(async move {
            if let Err(e) = task.await {
                log::error!("Trigger of step {} in run {} failed: {}", step, run_id, e);
            }
        });
    }

    /// Evaluate one step within a run and, if it runs, dispatch its children
    ///
    /// Returns `Ok` without running anything when a parent requirement is
    /// unmet, the step already ran in this run, or the run was cancelled.
    /// A step that fails to execute is recorded as `error` and its error
    /// and always children are still dispatched before the failure is
    /// returned.
    pub fn trigger_step(
        self: Arc<Self>,
        scope: RunScope,
        step: String,
        payload: HashMap<String, String>,
        emitter: Arc<dyn Emitter>,
    ) -> TriggerFuture {
        Box::pin(async move {
            let run_id = scope.run_id.as_str();
            let Some(node) = self.graph.get(&step) else {
                log::error!("Step does not exist in workflow: {}", step);
                return Err(WorkflowError::StepNotFound(step).into());
            };

            if scope.cancel.is_cancelled() {
                log::info!("Run {} cancelled, not triggering {}", run_id, step);
                return Ok(());
            }

            match self.statuses.try_claim(run_id, &step, &node.parents) {
                Claim::Claimed => {}
                Claim::Deferred {
                    parent,
                    rule,
                    parent_status,
                } => {
                    log::debug!(
                        "Parent is not in correct state to trigger step={} parent={} parent_status={:?} expected={}",
                        step,
                        parent,
                        parent_status,
                        rule
                    );
                    return Ok(());
                }
                Claim::Busy(status) => {
                    log::debug!("Step {} already {} in run {}", step, status, run_id);
                    return Ok(());
                }
            }

            for (key, value) in &payload {
                self.context.set(run_id, key, value);
            }

            let artifact = self.config.step_artifact(&step);
            let outcome = self
                .runner
                .execute(run_id, &step, &artifact, emitter.as_ref(), &scope.cancel)
                .await;

            let (status, failure) = match outcome {
                Ok(state) => (state.status, None),
                Err(e) => {
                    log::error!("Step failed to execute name={} error={}", step, e);
                    let mut state = StepState::start(step.as_str(), run_id);
                    state.push_line(&e.to_string());
                    state.finish(StepStatus::Error);
                    deliver(emitter.as_ref(), &state);
                    (StepStatus::Error, Some(e))
                }
            };
            log::debug!("Step exited name={} status={}", step, status);

            let descendants = self.graph.descendants(&step);
            self.statuses.finish(run_id, &step, status, &descendants);

            let dispatched = self.dispatch(&scope, &node.step, status, &emitter);
            match failure {
                Some(e) => Err(e),
                None => dispatched,
            }
        })
    }

    fn dispatch(
        self: &Arc<Self>,
        scope: &RunScope,
        step: &Step,
        status: StepStatus,
        emitter: &Arc<dyn Emitter>,
    ) -> Result<(), MarathonError> {
        if status == StepStatus::Killed {
            log::info!("Step {} killed, not dispatching children", step.name);
            return Ok(());
        }

        let Some(children) = step.children_for(status) else {
            log::error!("Unknown status in auto trigger step={} status={}", step.name, status);
            return Err(WorkflowError::UnknownStatus {
                step: step.name.clone(),
                status: status.to_string(),
            }
            .into());
        };

        for child in children {
            self.spawn_trigger(scope, child.to_string(), HashMap::new(), Arc::clone(emitter));
        }
        Ok(())
    }
}

/// Render payload values the way they are stored in context: strings as-is,
/// everything else as JSON text
pub fn stringify_payload(payload: Payload) -> HashMap<String, String> {
    payload
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marathon::emit::ChannelEmitter;
    use crate::marathon::step::artifact::ShellScriptPreparer;
    use crate::marathon::error::BoxError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;

    struct FailingPreparer;

    #[async_trait]
    impl ArtifactPreparer for FailingPreparer {
        async fn prepare(&self, _step: &Step, _artifact: &Path) -> Result<(), BoxError> {
            Err("compiler exploded".into())
        }
    }

    fn single_step() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "single".to_string(),
            description: String::new(),
            steps: vec![Step::new("a", "echo hi")],
        }
    }

    #[test]
    fn test_stringify_payload() {
        let payload: Payload = [
            ("name".to_string(), json!("Foobar")),
            ("count".to_string(), json!(3)),
            ("flag".to_string(), json!(true)),
        ]
        .into_iter()
        .collect();

        let out = stringify_payload(payload);
        assert_eq!(out["name"], "Foobar");
        assert_eq!(out["count"], "3");
        assert_eq!(out["flag"], "true");
    }

    #[tokio::test]
    async fn test_init_fails_fast_on_preparer_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Marathon::init(
            &single_step(),
            MarathonConfig::new(dir.path()),
            &FailingPreparer,
        )
        .await;

        match result {
            Err(MarathonError::Artifact { step, message }) => {
                assert_eq!(step, "a");
                assert_eq!(message, "compiler exploded");
            }
            other => panic!("expected artifact error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_graph() {
        let dir = tempfile::tempdir().unwrap();
        let mut def = single_step();
        def.steps[0].success.push("ghost".to_string());

        let result = Marathon::init(
            &def,
            MarathonConfig::new(dir.path()),
            &ShellScriptPreparer::new(),
        )
        .await;
        assert!(matches!(
            result,
            Err(MarathonError::Workflow(WorkflowError::UnknownChild { .. }))
        ));
    }

    #[tokio::test]
    async fn test_init_lays_out_step_directories() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Marathon::init(
            &single_step(),
            MarathonConfig::new(dir.path()),
            &ShellScriptPreparer::new(),
        )
        .await
        .unwrap();

        assert!(dir.path().join("a").join("step").is_file());
        assert_eq!(engine.graph().name(), "single");
        assert!(engine.config().step_artifact("a").is_file());
    }

    #[tokio::test]
    async fn test_trigger_unknown_step_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Marathon::init(
            &single_step(),
            MarathonConfig::new(dir.path()),
            &ShellScriptPreparer::new(),
        )
        .await
        .unwrap();
        let (emitter, _rx) = ChannelEmitter::channel();

        let result = engine.trigger("nope", Payload::new(), Arc::new(emitter));
        assert!(matches!(
            result,
            Err(MarathonError::Workflow(WorkflowError::StepNotFound(name))) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn test_trigger_run_uses_given_id() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Marathon::init(
            &single_step(),
            MarathonConfig::new(dir.path()),
            &ShellScriptPreparer::new(),
        )
        .await
        .unwrap();
        let (emitter, _rx) = ChannelEmitter::channel();

        let handle = engine
            .trigger_run("fixed-id", "a", Payload::new(), Arc::new(emitter))
            .unwrap();
        let summary = handle.wait().await;

        assert_eq!(summary.run_id, "fixed-id");
        assert_eq!(summary.status("a"), Some(StepStatus::Success));
        assert_eq!(engine.statuses("fixed-id")["a"], StepStatus::Success);
    }
}
