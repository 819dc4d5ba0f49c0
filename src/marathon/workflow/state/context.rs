// SPDX-License-Identifier: MIT

//! Per-run context table threaded between steps

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type RunContexts = HashMap<String, BTreeMap<String, String>>;

/// String key/value context partitioned by run id
///
/// Entries live as long as the table; nothing is removed when a run ends.
#[derive(Clone, Default)]
pub struct ContextTable {
    runs: Arc<Mutex<RunContexts>>,
}

impl ContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunContexts> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set a value, creating the run's map on first write
    pub fn set(&self, run_id: &str, key: &str, value: &str) {
        log::debug!("Setting context run={} key={} value={}", run_id, key, value);
        self.lock()
            .entry(run_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// `None` when the run or the key has never been written
    pub fn get(&self, run_id: &str, key: &str) -> Option<String> {
        self.lock().get(run_id).and_then(|c| c.get(key)).cloned()
    }

    /// Copy of the run's context (empty when the run is unknown)
    pub fn snapshot(&self, run_id: &str) -> BTreeMap<String, String> {
        self.lock().get(run_id).cloned().unwrap_or_default()
    }

    /// Serialize the run's context as the flat JSON object steps receive
    pub fn to_json(&self, run_id: &str) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.snapshot(run_id))
    }
}
