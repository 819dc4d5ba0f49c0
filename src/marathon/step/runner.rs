// SPDX-License-Identifier: MIT

//! Step runner - executes one prepared artifact as a subprocess
//!
//! The artifact runs under a shell wrapper that folds stderr into stdout and
//! appends the status line. Output is read line by line as it arrives and
//! drained to EOF; plain lines stream to the emitter immediately, context
//! lines are staged and applied once the step has finished.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::protocol::{self, Signal, CONTEXT_ENV};
use crate::marathon::emit::{deliver, Emitter};
use crate::marathon::error::MarathonError;
use crate::marathon::workflow::state::{ContextTable, StatusTable};
use crate::marathon::workflow::types::{StepState, StepStatus};

/// Longer lines are streamed as output in chunks of this size
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// How long output may stay open after the wrapper exits, e.g. held by a
/// background process the step left behind
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runs step artifacts against the shared status and context tables
#[derive(Clone)]
pub struct StepRunner {
    shell: String,
    statuses: StatusTable,
    context: ContextTable,
}

impl StepRunner {
    pub fn new(shell: impl Into<String>, statuses: StatusTable, context: ContextTable) -> Self {
        Self {
            shell: shell.into(),
            statuses,
            context,
        }
    }

    /// Execute `artifact` for `step` within `run_id`
    ///
    /// Returns the final state: `success` or `error` from the last status
    /// line, `error` when output ends without one, `killed` when `cancel`
    /// fires. Context serialization and spawn failures return before
    /// anything runs.
    pub async fn execute(
        &self,
        run_id: &str,
        step: &str,
        artifact: &Path,
        emitter: &dyn Emitter,
        cancel: &CancellationToken,
    ) -> Result<StepState, MarathonError> {
        self.statuses.set(run_id, step, StepStatus::Running);
        let state = StepState::start(step, run_id);

        let context_json = self.context.to_json(run_id).map_err(|e| {
            log::error!("Could not marshal context for run {}: {}", run_id, e);
            e
        })?;

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(protocol::wrapper_command(artifact))
            .env(CONTEXT_ENV, context_json)
            .envs(
                self.context
                    .snapshot(run_id)
                    .into_iter()
                    .map(|(key, value)| (protocol::context_key_env(&key), value)),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = artifact.parent() {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| MarathonError::spawn(step, e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            MarathonError::spawn(
                step,
                std::io::Error::new(std::io::ErrorKind::Other, "stdout was not captured"),
            )
        })?;

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut output = StepOutput::new(state, emitter);
        let mut exited = false;

        loop {
            let room = MAX_LINE_BYTES.saturating_sub(buf.len()).max(1) as u64;
            let grace = exited.then_some(DRAIN_GRACE);
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Killing step {} in run {}", step, run_id);
                    if let Err(e) = child.kill().await {
                        log::warn!("Failed to kill step {}: {}", step, e);
                    }
                    let mut state = output.into_state();
                    state.finish(StepStatus::Killed);
                    deliver(emitter, &state);
                    return Ok(state);
                }
                exit = child.wait(), if !exited => {
                    match exit {
                        Ok(exit) => log::debug!("Step {} wrapper exited with {}", step, exit),
                        Err(e) => log::warn!("Failed to reap step {}: {}", step, e),
                    }
                    exited = true;
                    continue;
                }
                read = read_chunk(&mut reader, &mut buf, room, grace) => {
                    read.map_err(|e| MarathonError::spawn(step, e))?
                }
            };

            let Some(n) = read else {
                log::warn!("Output of step {} still open after exit, ignoring the rest", step);
                break;
            };
            let eof = n == 0;
            if eof && buf.is_empty() {
                break;
            }

            // Without a newline the read stopped at the cap or at EOF
            let capped = buf.len() >= MAX_LINE_BYTES;
            let text = String::from_utf8_lossy(&buf).into_owned();
            buf.clear();
            let line = text.trim_end_matches('\n').trim_end_matches('\r');
            if text.ends_with('\n') || !capped {
                output.line(line);
            } else {
                output.chunk(line);
            }
            if eof {
                break;
            }
        }

        if !exited {
            match child.wait().await {
                Ok(exit) => log::debug!("Step {} wrapper exited with {}", step, exit),
                Err(e) => log::warn!("Failed to reap step {}: {}", step, e),
            }
        }

        let (mut state, staged, exit_code) = output.finish();
        let status = match &exit_code {
            Some(code) if Signal::is_success_code(code) => StepStatus::Success,
            Some(_) => StepStatus::Error,
            None => {
                log::warn!("Step {} ended without a status line", step);
                StepStatus::Error
            }
        };

        state.finish(status);
        for (key, value) in staged {
            self.context.set(run_id, &key, &value);
        }
        deliver(emitter, &state);

        Ok(state)
    }
}

/// Read up to the next newline, at most `room` bytes
///
/// Bytes read before a cancelled call stay in `buf`. With `grace` set,
/// gives up and returns `None` when nothing completes in time.
async fn read_chunk<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    room: u64,
    grace: Option<Duration>,
) -> std::io::Result<Option<usize>>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = AsyncReadExt::take(&mut *reader, room);
    let read = limited.read_until(b'\n', buf);
    match grace {
        None => read.await.map(Some),
        Some(grace) => match tokio::time::timeout(grace, read).await {
            Ok(read) => read.map(Some),
            Err(_) => Ok(None),
        },
    }
}

/// Accumulates one step's output while it runs
///
/// A line with a status marker past its start is held back until the next
/// line arrives: only on the last line is it the wrapper's status glued to
/// unterminated output.
struct StepOutput<'a> {
    state: StepState,
    emitter: &'a dyn Emitter,
    staged: Vec<(String, String)>,
    exit_code: Option<String>,
    held: Option<String>,
}

impl<'a> StepOutput<'a> {
    fn new(state: StepState, emitter: &'a dyn Emitter) -> Self {
        Self {
            state,
            emitter,
            staged: Vec::new(),
            exit_code: None,
            held: None,
        }
    }

    fn line(&mut self, line: &str) {
        self.release();
        if protocol::split_trailing_status(line).is_some() {
            self.held = Some(line.to_string());
        } else {
            self.signal(protocol::classify(line));
        }
    }

    /// Part of an overlong line, always plain output
    fn chunk(&mut self, text: &str) {
        self.release();
        self.signal(Signal::Output(text.to_string()));
    }

    fn release(&mut self) {
        if let Some(held) = self.held.take() {
            self.signal(protocol::classify(&held));
        }
    }

    fn signal(&mut self, signal: Signal) {
        match signal {
            Signal::Output(out) => {
                self.state.push_line(&out);
                deliver(self.emitter, &self.state);
            }
            Signal::ContextSet { key, value } => self.staged.push((key, value)),
            Signal::Status(code) => self.exit_code = Some(code),
        }
    }

    fn into_state(self) -> StepState {
        self.state
    }

    fn finish(mut self) -> (StepState, Vec<(String, String)>, Option<String>) {
        if let Some(held) = self.held.take() {
            for signal in protocol::classify_final(&held) {
                self.signal(signal);
            }
        }
        (self.state, self.staged, self.exit_code)
    }
}
