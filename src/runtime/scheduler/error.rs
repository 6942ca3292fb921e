//! Scheduler errors.

use std::io;

/// Errors raised while setting up tasks and timers.
///
/// Errors raised by a task's own computation never surface here: they are
/// fatal to the process and handled by the task's [`FailurePolicy`].
///
/// [`FailurePolicy`]: super::task::FailurePolicy
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The dedicated timer thread could not be started.
    #[error("failed to spawn timer thread: {0}")]
    TimerSpawn(#[source] io::Error),
}
