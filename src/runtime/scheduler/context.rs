//! Per-poll execution context.
//!
//! While a task is being polled, the thread doing the polling records which
//! task it is driving, which timer that task's delays must arm, and where to
//! record the delay the task suspends on. The record is installed for exactly
//! one poll and restored afterwards, so nothing survives a suspension: the
//! next segment of the task may run on a different thread, which installs its
//! own record.

use std::cell::RefCell;
use std::sync::Arc;

use super::delay::{PendingDelay, PendingSlot};
use super::task::TaskId;
use super::timer::TimerService;

#[derive(Clone)]
struct Frame {
    task: TaskId,
    timer: Arc<TimerService>,
    pending: Arc<PendingSlot>,
}

thread_local! {
    static CURRENT: RefCell<Option<Frame>> = const { RefCell::new(None) };
}

/// Restores the previous context when dropped.
pub(crate) struct EnterGuard {
    prev: Option<Frame>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|cur| *cur.borrow_mut() = prev);
    }
}

/// Install `task` as the current context until the guard drops.
pub(crate) fn enter(
    task: TaskId,
    timer: &Arc<TimerService>,
    pending: &Arc<PendingSlot>,
) -> EnterGuard {
    let frame = Frame {
        task,
        timer: timer.clone(),
        pending: pending.clone(),
    };
    let prev = CURRENT.with(|cur| cur.borrow_mut().replace(frame));
    EnterGuard { prev }
}

/// Record the delay the current task is about to suspend on.
pub(crate) fn record_pending(delay: PendingDelay) {
    CURRENT.with(|cur| {
        if let Some(frame) = cur.borrow().as_ref() {
            *frame.pending.lock() = Some(delay);
        }
    });
}

/// The task currently being polled on this thread, if any.
pub fn current_task() -> Option<TaskId> {
    CURRENT.with(|cur| cur.borrow().as_ref().map(|f| f.task))
}

/// The timer the current task arms its delays on, if a task is being polled.
pub fn current_timer() -> Option<Arc<TimerService>> {
    CURRENT.with(|cur| cur.borrow().as_ref().map(|f| f.timer.clone()))
}
