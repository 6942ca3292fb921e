//! Task definitions.
//!
//! A [`Task`] owns one suspendable computation. It starts running on the
//! thread that creates it and keeps running there until the computation first
//! awaits a [`Delay`](super::delay::Delay) or finishes. Every later segment
//! runs on the timer thread that fired the delay it was waiting on.

use std::any::Any;
use std::future::Future;
use std::io::Write;
use std::num::NonZeroI32;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::context;
use super::delay::PendingSlot;
use super::error::SchedulerError;
use super::timer::TimerService;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(0);

impl TaskId {
    /// Allocate a fresh, process-unique id.
    #[inline]
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl From<TaskId> for usize {
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task state.
///
/// `Running -> Suspended -> Running -> ... -> Completed | Failed`. Nothing
/// leaves the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// A segment of the computation is executing.
    Running,
    /// Waiting for a delay to fire.
    Suspended,
    /// The computation finished normally.
    Completed,
    /// The computation raised an unhandled error.
    Failed,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Running,
            1 => TaskState::Suspended,
            2 => TaskState::Completed,
            _ => TaskState::Failed,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Running => 0,
            TaskState::Suspended => 1,
            TaskState::Completed => 2,
            TaskState::Failed => 3,
        }
    }

    /// Completed or Failed.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// What a computation's output means for the task.
///
/// `()` always completes; `Err(_)` is an unhandled error.
pub trait TaskOutcome {
    /// Collapse the output into success or an unhandled error.
    fn into_result(self) -> anyhow::Result<()>;
}

impl TaskOutcome for () {
    #[inline]
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> TaskOutcome for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    #[inline]
    fn into_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

/// What happens when a computation raises an unhandled error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the error and terminate the process with `code`.
    Exit {
        /// Process exit status.
        code: NonZeroI32,
    },
}

impl FailurePolicy {
    /// Exit status used when none is configured.
    pub const DEFAULT_EXIT_CODE: NonZeroI32 = match NonZeroI32::new(1) {
        Some(code) => code,
        None => unreachable!(),
    };

    /// Exit with `code`, falling back to the default for a zero code.
    pub fn exit(code: i32) -> Self {
        FailurePolicy::Exit {
            code: NonZeroI32::new(code).unwrap_or(Self::DEFAULT_EXIT_CODE),
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Exit {
            code: Self::DEFAULT_EXIT_CODE,
        }
    }
}

/// Task configuration (`[task]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Exit status of the process when a task fails. Must be non-zero.
    pub failure_exit_code: i32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            failure_exit_code: FailurePolicy::DEFAULT_EXIT_CODE.get(),
        }
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// State shared by every handle to a task and by the wakers its delays arm.
struct TaskInner {
    id: TaskId,
    name: String,
    state: AtomicU8,
    /// Set when the computation wakes itself from inside its own poll.
    self_woken: AtomicBool,
    /// Resumes performed by wakers, i.e. not counting the eager first run.
    resumes: AtomicUsize,
    /// The continuation. Whoever holds the lock is the only context running
    /// the computation.
    future: Mutex<Option<BoxFuture>>,
    /// The delay the computation last suspended on, until it fires.
    pending: Arc<PendingSlot>,
    done: Mutex<bool>,
    done_cond: Condvar,
    timer: Arc<TimerService>,
    policy: FailurePolicy,
}

impl TaskInner {
    #[inline]
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    fn set_state(
        &self,
        state: TaskState,
    ) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Run the first segment on the creating thread.
    fn start(self: &Arc<Self>) {
        let mut slot = self.future.lock();
        self.drive(&mut slot);
    }

    /// Re-enter the computation after a wake.
    fn resume(self: &Arc<Self>) {
        if context::current_task() == Some(self.id) {
            // Woken from inside our own poll; the poller picks it up.
            self.self_woken.store(true, Ordering::SeqCst);
            return;
        }

        // Blocks while another context is still running a segment, so a
        // delay that fires early cannot overlap the segment that armed it.
        let mut slot = self.future.lock();
        if self.state() != TaskState::Suspended {
            return;
        }
        {
            let mut pending = self.pending.lock();
            if pending.as_ref().is_some_and(|p| p.has_fired()) {
                *pending = None;
            }
        }
        let resumes = self.resumes.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(task = %self.id, name = %self.name, resumes, "task resumed");
        self.drive(&mut slot);
    }

    /// Poll the computation until it suspends or terminates.
    fn drive(
        self: &Arc<Self>,
        slot: &mut Option<BoxFuture>,
    ) {
        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            let Some(fut) = slot.as_mut() else {
                return;
            };
            self.set_state(TaskState::Running);

            let polled = {
                let _enter = context::enter(self.id, &self.timer, &self.pending);
                catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx)))
            };

            match polled {
                Ok(Poll::Pending) => {
                    if self.self_woken.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    self.set_state(TaskState::Suspended);
                    debug!(task = %self.id, name = %self.name, "task suspended");
                    return;
                }
                Ok(Poll::Ready(Ok(()))) => {
                    *slot = None;
                    self.complete();
                    return;
                }
                Ok(Poll::Ready(Err(err))) => self.fail(err),
                Err(payload) => self.fail(anyhow::anyhow!(
                    "task panicked: {}",
                    panic_message(payload.as_ref())
                )),
            }
        }
    }

    fn complete(&self) {
        *self.pending.lock() = None;
        self.set_state(TaskState::Completed);
        debug!(task = %self.id, name = %self.name, "task completed");
        self.signal_done();
    }

    fn fail(
        &self,
        err: anyhow::Error,
    ) -> ! {
        self.set_state(TaskState::Failed);
        error!(
            task = %self.id,
            name = %self.name,
            error = %format!("{err:#}"),
            "unhandled error in task; terminating process"
        );
        // Waiters are never released: the exit below is the only way out.
        let _ = std::io::stdout().flush();
        match self.policy {
            FailurePolicy::Exit { code } => std::process::exit(code.get()),
        }
    }

    fn signal_done(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.done_cond.notify_all();
    }
}

impl Wake for TaskInner {
    fn wake(self: Arc<Self>) {
        self.resume();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.resume();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a running (or finished) computation.
///
/// Cloning the handle is cheap. Dropping every handle does not stop the
/// computation: pending delays keep it alive until it terminates.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("resumes", &self.resumes())
            .finish()
    }
}

impl Task {
    /// Start `computation` on the calling thread with default settings.
    ///
    /// Returns once the computation has reached its first suspension point
    /// or finished.
    pub fn create<F>(computation: F) -> Result<Self, SchedulerError>
    where
        F: Future + Send + 'static,
        F::Output: TaskOutcome,
    {
        TaskBuilder::new().spawn(computation)
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.inner.state()
    }

    /// True once the computation has finished, normally or not.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state().is_terminal()
    }

    /// Number of times the computation has been resumed after a delay.
    #[inline]
    pub fn resumes(&self) -> usize {
        self.inner.resumes.load(Ordering::SeqCst)
    }

    /// The timer this task's delays are armed on.
    #[inline]
    pub fn timer(&self) -> &Arc<TimerService> {
        &self.inner.timer
    }

    /// Deadline of the delay the computation is suspended on, if any.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.inner.pending.lock().as_ref().map(|p| p.deadline)
    }

    /// Block until the computation has completed.
    ///
    /// Never returns for a computation that fails; the failure terminates
    /// the process instead.
    pub fn wait(&self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.done_cond.wait(&mut done);
        }
    }

    /// Block until the computation has completed or `timeout` elapses.
    /// Returns whether it completed.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut done = self.inner.done.lock();
        while !*done {
            if self
                .inner
                .done_cond
                .wait_until(&mut done, deadline)
                .timed_out()
            {
                return *done;
            }
        }
        true
    }
}

/// Task builder for constructing tasks with various options.
#[derive(Debug, Default)]
pub struct TaskBuilder {
    name: Option<String>,
    policy: FailurePolicy,
    timer: Option<Arc<TimerService>>,
}

impl TaskBuilder {
    /// Create a new task builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from the `[task]` configuration table.
    pub fn from_config(config: &TaskConfig) -> Self {
        Self::new().failure_policy(FailurePolicy::exit(config.failure_exit_code))
    }

    /// Set the task name.
    #[inline]
    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the failure policy.
    #[inline]
    pub fn failure_policy(
        mut self,
        policy: FailurePolicy,
    ) -> Self {
        self.policy = policy;
        self
    }

    /// Arm this task's delays on `timer` instead of the global one.
    #[inline]
    pub fn timer(
        mut self,
        timer: Arc<TimerService>,
    ) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Create the task and run it up to its first suspension point.
    pub fn spawn<F>(
        self,
        computation: F,
    ) -> Result<Task, SchedulerError>
    where
        F: Future + Send + 'static,
        F::Output: TaskOutcome,
    {
        let timer = match self.timer {
            Some(timer) => timer,
            None => TimerService::global()?,
        };
        let id = TaskId::next();
        let name = self
            .name
            .unwrap_or_else(|| format!("task-{}", id.inner()));

        let future: BoxFuture = Box::pin(async move { computation.await.into_result() });
        let inner = Arc::new(TaskInner {
            id,
            name,
            state: AtomicU8::new(TaskState::Running.as_u8()),
            self_woken: AtomicBool::new(false),
            resumes: AtomicUsize::new(0),
            future: Mutex::new(Some(future)),
            pending: Arc::new(Mutex::new(None)),
            done: Mutex::new(false),
            done_cond: Condvar::new(),
            timer,
            policy: self.policy,
        });

        debug!(task = %inner.id, name = %inner.name, "task created");
        inner.start();

        Ok(Task { inner })
    }
}
