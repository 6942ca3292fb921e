//! delaytask
//!
//! Cooperative tasks that suspend themselves for a fixed interval and are
//! resumed later by a shared timer thread, without blocking the thread that
//! launched them.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use delaytask::{delay, Task};
//!
//! fn main() -> delaytask::Result<()> {
//!     let task = Task::create(async {
//!         for i in 0..3 {
//!             println!("Loop iteration {i}");
//!             delay(Duration::from_millis(100)).await;
//!         }
//!     })?;
//!     task.wait();
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/delaytask")]
#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use runtime::scheduler::{
    delay, Delay, FailurePolicy, SchedulerError, Task, TaskBuilder, TaskId, TaskState, TimerService,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "delaytask";
