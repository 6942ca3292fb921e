//! delaytask - CLI
//!
//! Launches one task running a delayed loop and waits for it.

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use delaytask::runtime::scheduler::{delay, TaskBuilder, TaskState, TimerService};
use delaytask::util::config::load_runtime_config;
use delaytask::util::logger::{self, LogLevel};
use delaytask::{NAME, VERSION};

/// Cooperative tasks resumed by a shared delay timer
#[derive(Parser, Debug)]
#[command(name = "delaytask")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); defaults to $DELAYTASK_CONFIG
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the delayed loop demo
    Run(RunArgs),

    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Number of loop iterations
    #[arg(long, default_value_t = 10)]
    iterations: u32,

    /// Delay between iterations, in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Raise an unhandled error right after the K-th resume
    #[arg(long, value_name = "K")]
    fail_after: Option<u32>,

    /// Panic instead of returning an error when --fail-after triggers
    #[arg(long, requires = "fail_after")]
    panic: bool,

    /// How the launcher waits for the task
    #[arg(long, value_enum, default_value_t = WaitMode::Completion)]
    wait: WaitMode,

    /// Sleep used by --wait fixed, in milliseconds
    #[arg(long, default_value_t = 15_000)]
    fixed_wait_ms: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum WaitMode {
    /// Block on the task's completion signal
    Completion,
    /// Sleep for a fixed interval, then report
    Fixed,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        eprintln!("{} version: {}", NAME, VERSION);
        eprintln!("Host: {}", std::env::consts::OS);
    }

    match args.command {
        Commands::Run(run_args) => run(run_args, args.config, args.verbose),
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
            Ok(())
        }
    }
}

fn run(
    args: RunArgs,
    config_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let config =
        load_runtime_config(config_path.as_deref()).context("Failed to load configuration")?;

    let level = if verbose {
        LogLevel::Debug
    } else {
        config.log.level
    };
    logger::init_with_level(level);

    let timer = Arc::new(TimerService::with_config(&config.timer).context("Failed to start timer")?);
    let interval = Duration::from_millis(args.interval_ms);

    let task = TaskBuilder::from_config(&config.task)
        .name("delayed-loop")
        .timer(timer.clone())
        .spawn(delayed_loop(args.iterations, interval, args.fail_after, args.panic))
        .context("Failed to start task")?;

    match args.wait {
        WaitMode::Completion => task.wait(),
        WaitMode::Fixed => {
            thread::sleep(Duration::from_millis(args.fixed_wait_ms));
            if task.state() == TaskState::Failed {
                // The failing thread is terminating the process with its own code.
                task.wait();
            }
            if !task.is_complete() {
                warn!(task = %task.id(), resumes = task.resumes(), "task still running after fixed wait");
            }
        }
    }

    info!(task = %task.id(), state = ?task.state(), resumes = task.resumes(), "launcher done");
    Ok(())
}

/// Print an iteration, sleep, repeat.
fn delayed_loop(
    iterations: u32,
    interval: Duration,
    fail_after: Option<u32>,
    panic: bool,
) -> impl Future<Output = Result<()>> + Send + 'static {
    async move {
        let mut count = 0;
        while count < iterations {
            println!("Loop iteration {}", count);
            delay(interval).await;
            count += 1;

            if fail_after == Some(count) {
                if panic {
                    panic!("injected panic after resume {}", count);
                }
                bail!("injected failure after resume {}", count);
            }
        }
        println!("Loop finished");
        Ok(())
    }
}
