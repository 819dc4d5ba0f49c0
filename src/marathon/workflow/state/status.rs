// SPDX-License-Identifier: MIT

//! Per-run step status table

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::marathon::workflow::types::{StepStatus, TriggerRule};

type RunStatuses = HashMap<String, HashMap<String, StepStatus>>;

/// Outcome of trying to claim a step for execution
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Preconditions held; the step is now marked running
    Claimed,
    /// A parent does not (yet) satisfy its rule; the step is marked waiting
    Deferred {
        parent: String,
        rule: TriggerRule,
        parent_status: Option<StepStatus>,
    },
    /// The step is already running or finished in this run
    Busy(StepStatus),
}

/// Step statuses partitioned by run id
///
/// Every accessor takes the lock once and releases it before returning.
#[derive(Clone, Default)]
pub struct StatusTable {
    runs: Arc<Mutex<RunStatuses>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunStatuses> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed every step of a fresh run as not started
    pub fn init_run<'a>(&self, run_id: &str, steps: impl IntoIterator<Item = &'a String>) {
        let mut runs = self.lock();
        let run = runs.entry(run_id.to_string()).or_default();
        for step in steps {
            run.insert(step.clone(), StepStatus::NotStarted);
        }
    }

    pub fn set(&self, run_id: &str, step: &str, status: StepStatus) {
        log::debug!("Setting status run={} step={} status={}", run_id, step, status);
        self.lock()
            .entry(run_id.to_string())
            .or_default()
            .insert(step.to_string(), status);
    }

    /// `None` means no status was ever recorded for the step in this run
    pub fn get(&self, run_id: &str, step: &str) -> Option<StepStatus> {
        self.lock().get(run_id).and_then(|r| r.get(step)).copied()
    }

    pub fn snapshot(&self, run_id: &str) -> HashMap<String, StepStatus> {
        self.lock().get(run_id).cloned().unwrap_or_default()
    }

    /// Check every parent requirement and mark the step running, atomically
    ///
    /// All parents must hold simultaneously. A step that is already running
    /// or finished in this run is never claimed twice.
    pub fn try_claim(
        &self,
        run_id: &str,
        step: &str,
        parents: &HashMap<String, TriggerRule>,
    ) -> Claim {
        let mut runs = self.lock();
        let run = runs.entry(run_id.to_string()).or_default();

        match run.get(step) {
            None | Some(StepStatus::NotStarted) | Some(StepStatus::Waiting) => {}
            Some(other) => return Claim::Busy(*other),
        }

        for (parent, rule) in parents {
            let parent_status = run.get(parent).copied();
            if !rule.is_satisfied_by(parent_status) {
                run.insert(step.to_string(), StepStatus::Waiting);
                return Claim::Deferred {
                    parent: parent.clone(),
                    rule: *rule,
                    parent_status,
                };
            }
        }

        run.insert(step.to_string(), StepStatus::Running);
        Claim::Claimed
    }

    /// Record a step's final status and reset its descendants to not started
    ///
    /// Descendants that are currently running keep their status, and the
    /// step itself is never reset even when a cycle leads back to it.
    pub fn finish(&self, run_id: &str, step: &str, status: StepStatus, descendants: &[String]) {
        let mut runs = self.lock();
        let run = runs.entry(run_id.to_string()).or_default();
        run.insert(step.to_string(), status);
        for child in descendants {
            if child == step {
                continue;
            }
            match run.get(child) {
                Some(StepStatus::Running) => {}
                _ => {
                    run.insert(child.clone(), StepStatus::NotStarted);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parents(entries: &[(&str, TriggerRule)]) -> HashMap<String, TriggerRule> {
        entries
            .iter()
            .map(|(name, rule)| (name.to_string(), *rule))
            .collect()
    }

    #[test]
    fn test_absent_status_is_none() {
        let table = StatusTable::new();
        assert_eq!(table.get("run", "a"), None);
        table.set("run", "a", StepStatus::Running);
        assert_eq!(table.get("run", "a"), Some(StepStatus::Running));
    }

    #[test]
    fn test_runs_are_isolated() {
        let table = StatusTable::new();
        table.set("run-1", "a", StepStatus::Success);
        table.set("run-2", "a", StepStatus::Error);
        assert_eq!(table.get("run-1", "a"), Some(StepStatus::Success));
        assert_eq!(table.get("run-2", "a"), Some(StepStatus::Error));
        assert_eq!(table.snapshot("run-3").len(), 0);
    }

    #[test]
    fn test_init_run_seeds_not_started() {
        let table = StatusTable::new();
        let steps = vec!["a".to_string(), "b".to_string()];
        table.init_run("run", &steps);
        let snapshot = table.snapshot("run");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.values().all(|s| *s == StepStatus::NotStarted));
    }

    #[test]
    fn test_claim_without_parents_always_succeeds() {
        let table = StatusTable::new();
        table.set("run", "other", StepStatus::Error);
        assert_eq!(table.try_claim("run", "a", &HashMap::new()), Claim::Claimed);
        assert_eq!(table.get("run", "a"), Some(StepStatus::Running));
    }

    #[test]
    fn test_claim_defers_on_running_always_parent() {
        let table = StatusTable::new();
        let p = parents(&[("p", TriggerRule::Always)]);

        table.set("run", "p", StepStatus::Running);
        assert!(matches!(
            table.try_claim("run", "c", &p),
            Claim::Deferred { .. }
        ));
        assert_eq!(table.get("run", "c"), Some(StepStatus::Waiting));

        table.set("run", "p", StepStatus::Error);
        assert_eq!(table.try_claim("run", "c", &p), Claim::Claimed);
    }

    #[test]
    fn test_claim_requires_all_parents() {
        let table = StatusTable::new();
        let p = parents(&[("x", TriggerRule::Success), ("y", TriggerRule::Error)]);

        table.set("run", "x", StepStatus::Success);
        table.set("run", "y", StepStatus::Success);
        match table.try_claim("run", "join", &p) {
            Claim::Deferred {
                parent,
                rule,
                parent_status,
            } => {
                assert_eq!(parent, "y");
                assert_eq!(rule, TriggerRule::Error);
                assert_eq!(parent_status, Some(StepStatus::Success));
            }
            other => panic!("expected deferral, got {:?}", other),
        }

        table.set("run", "y", StepStatus::Error);
        assert_eq!(table.try_claim("run", "join", &p), Claim::Claimed);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let table = StatusTable::new();
        assert_eq!(table.try_claim("run", "a", &HashMap::new()), Claim::Claimed);
        assert_eq!(
            table.try_claim("run", "a", &HashMap::new()),
            Claim::Busy(StepStatus::Running)
        );
    }

    #[test]
    fn test_finish_resets_descendants_except_running_and_self() {
        let table = StatusTable::new();
        table.set("run", "b", StepStatus::Success);
        table.set("run", "c", StepStatus::Running);
        table.set("run", "d", StepStatus::Waiting);

        let descendants = vec![
            "b".to_string(),
            "c".to_string(),
            "d".to_string(),
            "a".to_string(),
        ];
        table.finish("run", "a", StepStatus::Error, &descendants);

        assert_eq!(table.get("run", "a"), Some(StepStatus::Error));
        assert_eq!(table.get("run", "b"), Some(StepStatus::NotStarted));
        assert_eq!(table.get("run", "c"), Some(StepStatus::Running));
        assert_eq!(table.get("run", "d"), Some(StepStatus::NotStarted));
    }
}
