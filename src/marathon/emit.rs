// SPDX-License-Identifier: MIT

//! Emission callbacks for observing step progress
//!
//! The runner calls the emitter once per plain output line (status
//! `running`, output so far) and once more when the step finishes. Emitter
//! failures are logged and never affect the step.

use tokio::sync::mpsc;

use crate::marathon::error::BoxError;
use crate::marathon::workflow::types::{StepState, StepStatus};

/// Host-supplied sink for step state updates
pub trait Emitter: Send + Sync {
    fn emit(&self, step: &str, run_id: &str, status: StepStatus, output: &str)
        -> Result<(), BoxError>;
}

impl<F> Emitter for F
where
    F: Fn(&str, &str, StepStatus, &str) -> Result<(), BoxError> + Send + Sync,
{
    fn emit(
        &self,
        step: &str,
        run_id: &str,
        status: StepStatus,
        output: &str,
    ) -> Result<(), BoxError> {
        self(step, run_id, status, output)
    }
}

/// Deliver a state to an emitter, logging instead of failing
pub fn deliver(emitter: &dyn Emitter, state: &StepState) {
    if let Err(e) = emitter.emit(&state.step, &state.run_id, state.status, &state.output) {
        log::error!(
            "Could not execute emit function step={} run={} status={}: {}",
            state.step,
            state.run_id,
            state.status,
            e
        );
    }
    log::debug!(
        "Updated state step={} run={} status={}",
        state.step,
        state.run_id,
        state.status
    );
}

/// Writes every update to the `log` facade
#[derive(Debug, Clone, Default)]
pub struct LogEmitter;

impl Emitter for LogEmitter {
    fn emit(
        &self,
        step: &str,
        run_id: &str,
        status: StepStatus,
        output: &str,
    ) -> Result<(), BoxError> {
        log::info!(
            "Emitting state step={} run={} status={} output={:?}",
            step,
            run_id,
            status,
            output
        );
        Ok(())
    }
}

/// Forwards updates to an unbounded channel
///
/// Sends fail once the receiver is dropped; the runner logs that and
/// carries on.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    sender: mpsc::UnboundedSender<EmittedState>,
}

/// One update as seen by a [`ChannelEmitter`] consumer
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedState {
    pub step: String,
    pub run_id: String,
    pub status: StepStatus,
    pub output: String,
}

impl ChannelEmitter {
    pub fn new(sender: mpsc::UnboundedSender<EmittedState>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EmittedState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Emitter for ChannelEmitter {
    fn emit(
        &self,
        step: &str,
        run_id: &str,
        status: StepStatus,
        output: &str,
    ) -> Result<(), BoxError> {
        self.sender
            .send(EmittedState {
                step: step.to_string(),
                run_id: run_id.to_string(),
                status,
                output: output.to_string(),
            })
            .map_err(|_| "emission channel closed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_is_emitter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let emitter = move |step: &str, _run: &str, status: StepStatus, _out: &str| -> Result<(), BoxError> {
            sink.lock().unwrap().push((step.to_string(), status));
            Ok(())
        };

        deliver(&emitter, &StepState::start("a", "run"));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("a".to_string(), StepStatus::Running)]
        );
    }

    #[test]
    fn test_failing_emitter_is_swallowed() {
        let emitter = |_: &str, _: &str, _: StepStatus, _: &str| -> Result<(), BoxError> {
            Err("sink unavailable".into())
        };
        deliver(&emitter, &StepState::start("a", "run"));
    }

    #[test]
    fn test_channel_emitter_forwards_and_reports_closed() {
        let (emitter, mut rx) = ChannelEmitter::channel();
        let mut state = StepState::start("a", "run");
        state.push_line("hello");
        deliver(&emitter, &state);

        let got = rx.try_recv().unwrap();
        assert_eq!(got.step, "a");
        assert_eq!(got.output, "hello\n");

        drop(rx);
        assert!(emitter.emit("a", "run", StepStatus::Success, "").is_err());
    }
}
