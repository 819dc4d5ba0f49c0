//! Workflow loader - YAML file loading and parsing
//!
//! This module handles loading workflow definitions from YAML files.

use super::types::WorkflowDefinition;
use crate::marathon::error::MarathonError;
use std::fs;
use std::path::Path;

/// Loads workflow definitions from YAML files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a workflow definition from a YAML file
    pub fn load_workflow<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<WorkflowDefinition, MarathonError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a workflow definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<WorkflowDefinition, MarathonError> {
        let def: WorkflowDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}
