// SPDX-License-Identifier: MIT

//! marathon-rs: a small workflow engine that runs steps as subprocesses and
//! propagates success / error / always outcomes between them.

pub mod marathon;
