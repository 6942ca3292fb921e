//! Task lifecycle scenarios through the public API

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use delaytask::runtime::scheduler::{TimerConfig, TimerService};
use delaytask::{delay, TaskBuilder, TaskState};
use parking_lot::Mutex;

fn timer(name: &str) -> Arc<TimerService> {
    let config = TimerConfig {
        thread_name: name.to_string(),
    };
    Arc::new(TimerService::with_config(&config).unwrap())
}

/// Prints "0", waits one unit, prints "1"; the launcher checks after two units.
#[test]
fn test_two_step_scenario() {
    let unit = Duration::from_millis(200);
    let output: Arc<Mutex<Vec<(&'static str, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let out = output.clone();

    let task = TaskBuilder::new()
        .timer(timer("scenario-two-step"))
        .spawn(async move {
            out.lock().push(("0", Instant::now()));
            delay(unit).await;
            out.lock().push(("1", Instant::now()));
        })
        .unwrap();

    // Only the first line is out when create returns.
    assert_eq!(output.lock().len(), 1);

    thread::sleep(unit * 2);
    assert!(task.is_complete());

    let output = output.lock();
    let lines: Vec<_> = output.iter().map(|(line, _)| *line).collect();
    assert_eq!(lines, vec!["0", "1"]);
    assert!(output[1].1 - output[0].1 >= unit);
}

#[test]
fn test_resumes_respect_cumulative_lower_bound() {
    let durations = [30u64, 10, 50, 0, 20];
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let log = stamps.clone();

    let created = Instant::now();
    let task = TaskBuilder::new()
        .timer(timer("scenario-lower-bound"))
        .spawn(async move {
            for ms in durations {
                delay(Duration::from_millis(ms)).await;
                log.lock().push(Instant::now());
            }
        })
        .unwrap();

    assert!(task.wait_timeout(Duration::from_secs(5)));
    assert_eq!(task.resumes(), durations.len());

    let stamps = stamps.lock();
    let mut total = Duration::ZERO;
    for (k, ms) in durations.iter().enumerate() {
        total += Duration::from_millis(*ms);
        assert!(
            stamps[k] - created >= total,
            "resume {} happened before {:?}",
            k + 1,
            total
        );
    }
}

#[test]
fn test_every_resume_leaves_the_launching_thread() {
    let threads = Arc::new(Mutex::new(Vec::new()));
    let log = threads.clone();

    let task = TaskBuilder::new()
        .timer(timer("scenario-migrate"))
        .spawn(async move {
            log.lock().push(thread::current().id());
            for _ in 0..3 {
                delay(Duration::ZERO).await;
                log.lock().push(thread::current().id());
            }
        })
        .unwrap();
    task.wait();

    let launcher = thread::current().id();
    let timer_thread = task.timer().thread_id();
    let threads = threads.lock();
    assert_eq!(threads.len(), 4);
    assert_eq!(threads[0], launcher);
    for id in &threads[1..] {
        assert_eq!(*id, timer_thread);
    }
}

#[test]
fn test_state_transitions() {
    let task = TaskBuilder::new()
        .timer(timer("scenario-states"))
        .spawn(async {
            delay(Duration::from_millis(150)).await;
        })
        .unwrap();

    assert_eq!(task.state(), TaskState::Suspended);
    task.wait();
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.resumes(), 1);
}

#[test]
fn test_error_handled_inside_computation_is_invisible() {
    let task = TaskBuilder::new()
        .timer(timer("scenario-handled-error"))
        .spawn(async {
            delay(Duration::from_millis(1)).await;
            let value = "not a number".parse::<u32>().unwrap_or(0);
            delay(Duration::from_millis(1)).await;
            if value == 0 {
                Ok(())
            } else {
                Err(anyhow::anyhow!("unexpected value {}", value))
            }
        })
        .unwrap();

    task.wait();
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.resumes(), 2);
}
