//! External process lifecycle
//!
//! Spawns the analyzer (or any other executable), detects startup, streams
//! combined stdout/stderr to a line handler and an optional transcript file,
//! and fires a shutdown hook exactly once.
//!
//! # Lifecycle
//!
//! ```text
//!   spawn ──► first output line ──► ProcessHandle returned ──► exit ──► on_shutdown
//!     │            (or exit)                                     ▲
//!     │                                                          │
//!     ├──► spawn error ─────────────────────────────────────────┤ (Err::Spawn)
//!     └──► no output before deadline ──► kill ──────────────────┘ (Err::StartupTimeout)
//! ```
//!
//! Cancelling the token given to [`RunSpec::with_cancel`] kills the process at
//! any point; before startup completes `run` then fails with `Cancelled`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let spec = RunSpec::new("kantra")
//!     .args(["analyze", "--input", "/work/app"])
//!     .with_cwd("/work/out")
//!     .with_log_file("/work/out/analysis.log")
//!     .with_startup_timeout(Duration::from_secs(60))
//!     .with_cancel(job_token.clone());
//!
//! let mut handle = ProcessRunner::run(spec, |line| println!("{line}"), |exit| {
//!     tracing::info!(?exit, "analyzer stopped");
//! })
//! .await?;
//!
//! let exit = handle.wait().await;
//! ```

mod runner;
mod sink;

pub use runner::{ProcessExit, ProcessHandle, ProcessRunner, RunSpec};
pub use sink::LogSink;
