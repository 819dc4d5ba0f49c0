// SPDX-License-Identifier: MIT

//! Step execution
//!
//! - `artifact` - preparing an executable per step
//! - `protocol` - the stdout line protocol steps speak
//! - `runner` - running one artifact as a subprocess

pub mod artifact;
pub mod protocol;
pub mod runner;

pub use runner::StepRunner;
