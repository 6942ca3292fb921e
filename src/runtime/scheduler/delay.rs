//! Delay suspension.
//!
//! `delay(d).await` suspends the awaiting task for at least `d`. The first
//! poll always returns `Pending` and arms one timer entry, even for a zero
//! duration, so every await is a real yield point. The entry holds a copy
//! of the deadline and the task's waker; it never points back at the
//! `Delay` itself, which may be dropped or moved while the entry is armed.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::context;

/// Roughly 30 years. Deadlines past what `Instant` can represent are
/// clamped to this far.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The delay a task is suspended on, as recorded on the task.
#[derive(Debug, Clone)]
pub(crate) struct PendingDelay {
    pub(crate) deadline: Instant,
    pub(crate) fired: Arc<AtomicBool>,
}

impl PendingDelay {
    #[inline]
    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

pub(crate) type PendingSlot = Mutex<Option<PendingDelay>>;

/// `now + duration`, clamped for durations such as `Duration::MAX`.
pub(crate) fn deadline_after(
    now: Instant,
    duration: Duration,
) -> Instant {
    now.checked_add(duration)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Suspend the current task for `duration`.
#[inline]
pub fn delay(duration: Duration) -> Delay {
    Delay::new(duration)
}

/// A single-use timed suspension. See [`delay`].
///
/// # Panics
///
/// Polling a `Delay` anywhere but inside a task's computation panics: only a
/// task knows which timer to arm.
#[derive(Debug)]
#[must_use = "a delay does nothing unless awaited"]
pub struct Delay {
    duration: Duration,
    /// Set by the timer when the armed entry fires. `None` until armed.
    fired: Option<Arc<AtomicBool>>,
}

impl Delay {
    /// Create a delay of `duration`. Nothing is armed until first polled.
    #[inline]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            fired: None,
        }
    }

    /// The requested duration.
    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the timer entry has been armed.
    #[inline]
    pub fn is_armed(&self) -> bool {
        self.fired.is_some()
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        if let Some(fired) = &self.fired {
            return if fired.load(Ordering::SeqCst) {
                Poll::Ready(())
            } else {
                Poll::Pending
            };
        }

        let Some(timer) = context::current_timer() else {
            panic!("delay polled outside of a task");
        };

        let fired = Arc::new(AtomicBool::new(false));
        let deadline = deadline_after(Instant::now(), self.duration);
        // Recorded before arming: the task's continuation lock is held here,
        // and the resume that clears the record has to take it first.
        context::record_pending(PendingDelay {
            deadline,
            fired: fired.clone(),
        });
        timer.arm(deadline, fired.clone(), cx.waker().clone());
        self.fired = Some(fired);
        Poll::Pending
    }
}
