//! Task scheduler
//!
//! Eagerly started tasks that suspend on timed delays and are resumed by a
//! shared timer thread.
//!
//! # Architecture
//!
//! - [`Task`](task::Task) - handle to one suspendable computation
//! - [`Delay`](delay::Delay) - the timed suspension a computation awaits
//! - [`TimerService`](timer::TimerService) - min-heap of deadlines serviced
//!   by one dedicated thread; fires resume tasks directly on that thread
//! - [`context`] - which task and timer the current thread is driving
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use delaytask::runtime::scheduler::{delay, Task};
//!
//! let task = Task::create(async {
//!     println!("0");
//!     delay(Duration::from_secs(1)).await;
//!     println!("1");
//! })
//! .unwrap();
//! task.wait();
//! assert!(task.is_complete());
//! ```

pub mod context;
pub mod delay;
pub mod error;
pub mod task;
pub mod timer;

pub use delay::{delay, Delay};
pub use error::SchedulerError;
pub use task::{FailurePolicy, Task, TaskBuilder, TaskConfig, TaskId, TaskOutcome, TaskState};
pub use timer::{TimerConfig, TimerService, TimerStats};
