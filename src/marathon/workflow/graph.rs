// SPDX-License-Identifier: MIT

//! Step graph derivation
//!
//! Parents are never declared. A step X is a parent of Y with rule `success`
//! when X lists Y under `success` (likewise for `error` / `always`). When a
//! parent lists the same child under several outcomes, the first of
//! success, error, always wins.

use std::collections::{HashMap, HashSet};

use super::types::{Step, TriggerRule, WorkflowDefinition, LOG_LEVELS};
use crate::marathon::error::WorkflowError;

/// A step with its derived parent requirements
#[derive(Debug, Clone)]
pub struct GraphStep {
    pub step: Step,
    pub parents: HashMap<String, TriggerRule>,
}

/// Immutable, validated view of a workflow used during execution
#[derive(Debug, Clone)]
pub struct StepGraph {
    name: String,
    steps: HashMap<String, GraphStep>,
    order: Vec<String>, // declaration order, for deterministic iteration
}

impl StepGraph {
    /// Validate a definition and derive every step's parent map
    pub fn build(def: &WorkflowDefinition) -> Result<Self, WorkflowError> {
        let mut order = Vec::with_capacity(def.steps.len());
        let mut seen = HashSet::new();
        for step in &def.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(WorkflowError::DuplicateStep(step.name.clone()));
            }
            order.push(step.name.clone());
        }

        for step in &def.steps {
            for (child, _) in step.children() {
                if !seen.contains(child) {
                    return Err(WorkflowError::UnknownChild {
                        step: step.name.clone(),
                        child: child.to_string(),
                    });
                }
            }
            if let Some(level) = &step.log_level {
                if !LOG_LEVELS.contains(&level.as_str()) {
                    log::error!("Unknown log level '{}' on step '{}'", level, step.name);
                    return Err(WorkflowError::UnknownLogLevel(level.clone()));
                }
            }
        }

        let mut steps = HashMap::with_capacity(def.steps.len());
        for step in &def.steps {
            let parents = derive_parents(&step.name, &def.steps);
            steps.insert(
                step.name.clone(),
                GraphStep {
                    step: step.clone(),
                    parents,
                },
            );
        }

        Ok(Self {
            name: def.name.clone(),
            steps,
            order,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&GraphStep> {
        self.steps.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Step names in declaration order
    pub fn step_names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every step reachable from `name` through any outcome, depth-first,
    /// excluding `name` itself unless a cycle leads back to it
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        self.collect_descendants(name, &mut visited, &mut out);
        out
    }

    fn collect_descendants(&self, name: &str, visited: &mut HashSet<String>, out: &mut Vec<String>) {
        let Some(node) = self.steps.get(name) else {
            return;
        };
        for (child, _) in node.step.children() {
            if visited.insert(child.to_string()) {
                out.push(child.to_string());
                self.collect_descendants(child, visited, out);
            }
        }
    }
}

fn derive_parents(name: &str, steps: &[Step]) -> HashMap<String, TriggerRule> {
    let mut parents = HashMap::new();
    for other in steps {
        let rule = if other.success.iter().any(|c| c == name) {
            TriggerRule::Success
        } else if other.error.iter().any(|c| c == name) {
            TriggerRule::Error
        } else if other.always.iter().any(|c| c == name) {
            TriggerRule::Always
        } else {
            continue;
        };
        parents.insert(other.name.clone(), rule);
    }
    parents
}
