// SPDX-License-Identifier: MIT

//! Shared state for workflow runs
//!
//! This module provides:
//! - `StatusTable` - step statuses partitioned by run
//! - `ContextTable` - per-run string context threaded between steps

mod context;
mod status;

pub use context::ContextTable;
pub use status::{Claim, StatusTable};
