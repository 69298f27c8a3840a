//! Process runner: spawn, startup detection, output capture, shutdown

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::sink::LogSink;
use crate::error::{OrchestratorError, Result};

/// How long to wait for buffered output after the process exits
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Line buffer between the pipe readers and the sink
const LINE_BUFFER: usize = 256;

/// What to run and how
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub executable: String,
    pub args: Vec<String>,
    /// Working directory (inherits the caller's when None)
    pub cwd: Option<PathBuf>,
    /// Environment overrides on top of the inherited environment
    pub env: Vec<(String, String)>,
    pub startup_timeout: Duration,
    /// Transcript of combined output
    pub log_file: Option<PathBuf>,
    /// Kills the process when cancelled
    pub cancel: Option<CancellationToken>,
}

impl RunSpec {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            startup_timeout: Duration::from_secs(60),
            log_file: None,
            cancel: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Command line as it would be typed, for logs
    pub fn display(&self) -> String {
        std::iter::once(self.executable.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; None when terminated by a signal or never started
    pub code: Option<i32>,
    /// Whether the runner killed the process
    pub killed: bool,
}

impl ProcessExit {
    fn from_status(status: std::io::Result<std::process::ExitStatus>, killed: bool) -> Self {
        match status {
            Ok(status) => Self {
                code: status.code(),
                killed,
            },
            Err(e) => {
                warn!(error = %e, "Failed to collect exit status");
                Self { code: None, killed }
            }
        }
    }

    fn not_started() -> Self {
        Self {
            code: None,
            killed: false,
        }
    }

    /// Exited on its own with status 0
    pub fn success(&self) -> bool {
        !self.killed && self.code == Some(0)
    }
}

type ShutdownFn = Box<dyn FnOnce(&ProcessExit) + Send>;

/// Shutdown callback that can only ever run once
#[derive(Clone)]
struct ShutdownHook {
    callback: Arc<Mutex<Option<ShutdownFn>>>,
}

impl ShutdownHook {
    fn new(callback: impl FnOnce(&ProcessExit) + Send + 'static) -> Self {
        Self {
            callback: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    fn fire(&self, exit: &ProcessExit) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(exit);
        }
    }
}

/// Live process started by [`ProcessRunner::run`]
///
/// Dropping the handle does not stop the process; call [`ProcessHandle::kill`].
#[derive(Debug)]
pub struct ProcessHandle {
    pub executable: String,
    pub pid: Option<u32>,
    pub started_at: Instant,
    pub startup_deadline: Instant,
    kill: CancellationToken,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    /// Request termination; returns immediately
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Token that kills the process when cancelled
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    /// Exit status if the process has already stopped
    pub fn try_exit(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.try_exit().is_none()
    }

    /// Wait for the process to stop and its shutdown hook to run
    pub async fn wait(&mut self) -> ProcessExit {
        let observed = self
            .exit
            .wait_for(Option::is_some)
            .await
            .map(|exit| *exit);
        match observed {
            Ok(Some(exit)) => exit,
            // Supervisor is gone; report whatever it left behind
            _ => self.try_exit().unwrap_or_else(ProcessExit::not_started),
        }
    }

    /// Kill and wait
    pub async fn terminate(&mut self) -> ProcessExit {
        self.kill();
        self.wait().await
    }
}

/// Spawns external processes
pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawn `spec` and resolve once it has produced its first line of output
    /// (or exited). Fails with `StartupTimeout` when neither happens before
    /// `spec.startup_timeout`, after killing the process.
    ///
    /// `on_line` receives every line of combined stdout/stderr. `on_shutdown`
    /// runs exactly once: on exit, on spawn failure, or after the timeout kill.
    /// Cancelling `spec.cancel` kills the process; during startup that fails
    /// the call with `Cancelled`.
    pub async fn run<L, S>(spec: RunSpec, mut on_line: L, on_shutdown: S) -> Result<ProcessHandle>
    where
        L: FnMut(&str) + Send + 'static,
        S: FnOnce(&ProcessExit) + Send + 'static,
    {
        let shutdown = ShutdownHook::new(on_shutdown);
        if spec.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            shutdown.fire(&ProcessExit::not_started());
            return Err(OrchestratorError::Cancelled);
        }

        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        info!(command = %spec.display(), "Spawning process");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(executable = %spec.executable, error = %source, "Error executing process");
                shutdown.fire(&ProcessExit::not_started());
                return Err(OrchestratorError::Spawn {
                    executable: spec.executable,
                    source,
                });
            }
        };

        let started_at = Instant::now();
        let startup_deadline = started_at + spec.startup_timeout;
        let pid = child.id();

        // Combined output: both pipes feed one channel
        let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let mut sink = LogSink::open(spec.log_file.as_deref(), spec.executable.clone()).await;
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let pump = tokio::spawn(async move {
            let mut first_tx = Some(first_tx);
            while let Some(line) = line_rx.recv().await {
                sink.write_line(&line).await;
                on_line(&line);
                if let Some(tx) = first_tx.take() {
                    let _ = tx.send(());
                }
            }
            sink.flush().await;
        });

        let kill = spec
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let (exit_tx, exit_rx) = watch::channel(None);
        let supervisor_kill = kill.clone();
        let executable = spec.executable.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => Some(status),
                _ = supervisor_kill.cancelled() => None,
            };
            let exit = match status {
                Some(status) => ProcessExit::from_status(status, false),
                None => {
                    if let Err(e) = child.start_kill() {
                        warn!(executable = %executable, error = %e, "Failed to kill process");
                    }
                    ProcessExit::from_status(child.wait().await, true)
                }
            };

            if tokio::time::timeout(DRAIN_TIMEOUT, pump).await.is_err() {
                debug!(executable = %executable, "Output still open after exit, not waiting");
            }

            info!(executable = %executable, code = ?exit.code, killed = exit.killed, "Process closed");
            shutdown.fire(&exit);
            exit_tx.send_replace(Some(exit));
        });

        let mut handle = ProcessHandle {
            executable: spec.executable.clone(),
            pid,
            started_at,
            startup_deadline,
            kill,
            exit: exit_rx,
        };

        let mut exit_watch = handle.exit.clone();
        let startup_kill = handle.kill.clone();
        let startup = tokio::select! {
            _ = first_rx => Startup::Output,
            _ = exit_watch.wait_for(Option::is_some) => Startup::Exited,
            _ = startup_kill.cancelled() => Startup::Cancelled,
            _ = tokio::time::sleep_until(startup_deadline) => Startup::TimedOut,
        };

        match startup {
            Startup::Output | Startup::Exited => {
                debug!(executable = %handle.executable, pid = ?pid, "Process started");
                Ok(handle)
            }
            Startup::Cancelled => {
                debug!(executable = %handle.executable, "Cancelled during startup");
                handle.wait().await;
                Err(OrchestratorError::Cancelled)
            }
            Startup::TimedOut => {
                let timeout_ms = spec.startup_timeout.as_millis() as u64;
                warn!(
                    executable = %handle.executable,
                    timeout_ms,
                    "Process startup time exceeded, killing"
                );
                handle.terminate().await;
                Err(OrchestratorError::StartupTimeout {
                    executable: spec.executable,
                    timeout_ms,
                })
            }
        }
    }
}

enum Startup {
    Output,
    Exited,
    Cancelled,
    TimedOut,
}

/// Forward raw lines until EOF. Invalid UTF-8 is replaced rather than
/// ending the stream, so the pipe keeps draining.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(decode_line(&buf)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output stream read failed");
                break;
            }
        }
    }
}

/// Drop the line terminator (`\n` or `\r\n`), keep everything else
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
