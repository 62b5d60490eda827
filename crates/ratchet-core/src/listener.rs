//! Hooks for observing an upgrade and for handling commands the interpreter
//! does not know.
use futures_core::future::BoxFuture;

use crate::context::{ExecutionContext, Executor};
use crate::control::ControlState;
use crate::error::{Error, RatchetResult, SqlError};
use crate::source::Command;
use crate::upgrade::{PatchSegment, display_version};

/// Receives progress notifications. Every method defaults to doing nothing.
pub trait ProgressListener: Send + Sync {
    /// A segment is about to run; `resume_from` statements were committed by
    /// an earlier run.
    fn segment_starting(&self, _segment: &PatchSegment, _resume_from: i64) {}

    fn segment_finished(&self, _segment: &PatchSegment) {}

    /// A section message becomes current.
    fn section(&self, _level: u8, _message: &str) {}

    fn executing(&self, _command: &Command) {}

    fn executed(&self, _command: &Command) {}

    /// A persistent command in a skipped block.
    fn skipped(&self, _command: &Command) {}

    /// A command failed with an ignored error.
    fn suppressed(&self, _command: &Command, _error: &SqlError) {}

    /// The control state was written.
    fn progress(&self, _state: &ControlState) {}

    fn failed(&self, _error: &Error) {}

    fn no_upgrade_needed(&self, _version: Option<&str>) {}

    fn upgrade_complete(&self, _version: Option<&str>) {}
}

/// A [`ProgressListener`] that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {}

/// A [`ProgressListener`] that writes to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressListener for LogProgress {
    fn segment_starting(&self, segment: &PatchSegment, resume_from: i64) {
        if resume_from > 0 {
            log::info!(target: "ratchet", "{segment}, resuming after statement {resume_from}");
        } else {
            log::info!(target: "ratchet", "{segment}");
        }
    }

    fn section(&self, level: u8, message: &str) {
        log::info!(target: "ratchet", "{}{message}", "  ".repeat(usize::from(level)));
    }

    fn executing(&self, command: &Command) {
        log::debug!(target: "ratchet", "executing ({}): {command}", command.location());
    }

    fn skipped(&self, command: &Command) {
        log::trace!(target: "ratchet", "skipped ({})", command.location());
    }

    fn suppressed(&self, command: &Command, error: &SqlError) {
        log::warn!(target: "ratchet", "ignored error ({}): {error}", command.location());
    }

    fn progress(&self, state: &ControlState) {
        log::trace!(
            target: "ratchet",
            "version {}, target {}, statements {}",
            display_version(state.version()),
            display_version(state.in_flight()),
            state.statements
        );
    }

    fn failed(&self, error: &Error) {
        log::error!(target: "ratchet", "{error}");
    }

    fn no_upgrade_needed(&self, version: Option<&str>) {
        log::info!(target: "ratchet", "no upgrade needed, database is at {}", display_version(version));
    }

    fn upgrade_complete(&self, version: Option<&str>) {
        log::info!(target: "ratchet", "upgrade complete, database is at {}", display_version(version));
    }
}

/// Gets a look at every command before the interpreter handles it.
///
/// Listeners are asked in registration order; the first one that returns
/// `true` claims the command. A claimed persistent command is committed and
/// counted like a statement. Returning [`Error::Database`] lets the error be
/// ignored by `IGNORE SQL ERROR`.
pub trait CommandListener<E: Executor>: Send + Sync {
    fn try_handle<'a>(
        &'a self,
        command: &'a Command,
        context: &'a ExecutionContext,
        executor: &'a mut E,
    ) -> BoxFuture<'a, RatchetResult<bool>>;
}

/// Ask `listeners` in order until one claims `command`.
pub async fn dispatch<E: Executor>(
    listeners: &[Box<dyn CommandListener<E>>],
    command: &Command,
    context: &ExecutionContext,
    executor: &mut E,
) -> RatchetResult<bool> {
    for listener in listeners {
        if listener.try_handle(command, context, executor).await? {
            return Ok(true);
        }
    }
    Ok(false)
}
