//! Shared delay timer.
//!
//! A single dedicated thread services a min-heap of pending deadlines. Each
//! armed delay contributes one entry; when its deadline passes, the entry is
//! popped, its `fired` flag is set and the owning task's waker is invoked
//! directly on the timer thread. The cost is O(pending delays), independent
//! of how many delays have ever been armed.
//!
//! Armed entries cannot be revoked. The service shuts down only when its last
//! handle is dropped. Every task keeps a handle to the timer its delays arm,
//! so nothing can arm an entry on a stopped timer, and every entry already in
//! the heap still fires before the thread exits.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Waker;
use std::thread::{self, ThreadId};
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::error::SchedulerError;

/// Timer configuration (`[timer]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Name given to the timer thread.
    pub thread_name: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            thread_name: "delaytask-timer".to_string(),
        }
    }
}

/// Counters describing the timer's activity.
#[derive(Debug, Default)]
pub struct TimerStats {
    armed: AtomicUsize,
    fired: AtomicUsize,
}

impl TimerStats {
    /// Number of entries armed so far.
    #[inline]
    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }

    /// Number of entries fired so far.
    #[inline]
    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

/// One pending resumption.
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    fired: Arc<AtomicBool>,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(
        &self,
        other: &Self,
    ) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    cond: Condvar,
    stats: TimerStats,
}

/// Process-wide timer used by delays that are not driven by a task with an
/// explicit timer.
static GLOBAL: OnceCell<Arc<TimerService>> = OnceCell::new();

/// A timer facility backed by one dedicated waiting thread.
pub struct TimerService {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    thread_id: ThreadId,
    name: String,
}

impl std::fmt::Debug for TimerService {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("armed", &self.shared.stats.armed())
            .field("fired", &self.shared.stats.fired())
            .finish()
    }
}

impl TimerService {
    /// Start a timer with the default configuration.
    pub fn new() -> Result<Self, SchedulerError> {
        Self::with_config(&TimerConfig::default())
    }

    /// Start a timer whose thread is named after `config.thread_name`.
    pub fn with_config(config: &TimerConfig) -> Result<Self, SchedulerError> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue::default()),
            cond: Condvar::new(),
            stats: TimerStats::default(),
        });

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || timer_loop(&shared))
                .map_err(SchedulerError::TimerSpawn)?
        };
        let thread_id = handle.thread().id();
        debug!(thread = %config.thread_name, "timer started");

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
            thread_id,
            name: config.thread_name.clone(),
        })
    }

    /// The lazily started process-wide timer. It is never shut down.
    pub fn global() -> Result<Arc<TimerService>, SchedulerError> {
        GLOBAL
            .get_or_try_init(|| TimerService::new().map(Arc::new))
            .cloned()
    }

    /// Arm one entry that fires at `deadline`.
    ///
    /// On firing, `fired` is set before `waker` is woken, so whatever the
    /// waker resumes observes the flag. Dropping the service waits for every
    /// armed entry to fire.
    pub fn arm(
        &self,
        deadline: Instant,
        fired: Arc<AtomicBool>,
        waker: Waker,
    ) {
        let mut queue = self.shared.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Reverse(TimerEntry {
            deadline,
            seq,
            fired,
            waker,
        }));
        self.shared.stats.armed.fetch_add(1, Ordering::SeqCst);
        trace!(timer = %self.name, seq, "delay armed");
        self.shared.cond.notify_one();
    }

    /// Number of armed entries that have not fired yet.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    /// Arm/fire counters.
    #[inline]
    pub fn stats(&self) -> &TimerStats {
        &self.shared.stats
    }

    /// Name of the timer thread.
    #[inline]
    pub fn thread_name(&self) -> &str {
        &self.name
    }

    /// Id of the timer thread.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Ask the timer thread to exit once every armed entry has fired.
    fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        if !queue.heap.is_empty() {
            warn!(
                timer = %self.name,
                pending = queue.heap.len(),
                "timer dropped with pending delays; draining"
            );
        }
        queue.shutdown = true;
        self.shared.cond.notify_all();
    }

    /// Request shutdown and wait for the timer thread to drain and exit.
    ///
    /// Called on the timer thread itself, this only requests shutdown.
    fn join(&self) {
        self.shutdown();
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        // The last handle may be released by a task resumed on the timer
        // thread; that thread cannot join itself.
        self.join();
    }
}

/// Timer thread main loop.
fn timer_loop(shared: &TimerShared) {
    loop {
        let due = {
            let mut queue = shared.queue.lock();
            loop {
                let next = queue.heap.peek().map(|Reverse(entry)| entry.deadline);
                match next {
                    Some(deadline) if deadline <= Instant::now() => break,
                    Some(deadline) => {
                        shared.cond.wait_until(&mut queue, deadline);
                    }
                    None if queue.shutdown => return,
                    None => shared.cond.wait(&mut queue),
                }
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while let Some(Reverse(entry)) = queue.heap.peek() {
                if entry.deadline > now {
                    break;
                }
                if let Some(Reverse(entry)) = queue.heap.pop() {
                    due.push(entry);
                }
            }
            due
        };

        // Fired outside the lock: a resumed task may arm its next delay.
        for entry in due {
            entry.fired.store(true, Ordering::SeqCst);
            shared.stats.fired.fetch_add(1, Ordering::SeqCst);
            trace!(seq = entry.seq, "delay fired");
            entry.waker.wake();
        }
    }
}
