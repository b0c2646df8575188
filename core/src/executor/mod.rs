// Wipe Executor - supervises the destructive child process
//
// One session runs its command steps in order. Output from the child goes
// verbatim into the raw log and through the progress estimator; a ticker polls
// the cancel token independently of output, so a silent child can still be
// stopped promptly.

pub mod progress;

#[cfg(test)]
mod executor_tests;

pub use progress::{ProgressEstimator, ProgressEvent, ProgressKind, ProgressReporter};

use crate::config::WipeSettings;
use crate::methods::{CommandStep, WipeCommand};
use crate::{CancelToken, WipeError, WipeResult, WipeState};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// How long to keep collecting output after the child has exited
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_CHUNK_SIZE: usize = 8192;

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutcome {
    pub state: WipeState,
    /// Exit status of the last step that ran; `None` if it never started or died by signal
    pub exit_code: Option<i32>,
    pub message: String,
    pub progress_percent: u8,
}

enum StepResult {
    Succeeded,
    Failed { exit_code: Option<i32>, message: String },
    Cancelled { exit_code: Option<i32> },
}

pub struct WipeExecutor {
    poll_interval: Duration,
    termination_grace: Duration,
}

impl WipeExecutor {
    pub fn new(poll_interval: Duration, termination_grace: Duration) -> Self {
        Self {
            poll_interval,
            termination_grace,
        }
    }

    pub fn from_settings(settings: &WipeSettings) -> Self {
        Self::new(settings.poll_interval(), settings.termination_grace())
    }

    /// Run every step of `command`, appending output to `raw_log_path`.
    ///
    /// Always returns a terminal outcome and always sends exactly one terminal
    /// progress event.
    pub async fn execute(
        &self,
        command: &WipeCommand,
        raw_log_path: &Path,
        cancel: &CancelToken,
        reporter: &mut ProgressReporter,
    ) -> TerminalOutcome {
        reporter.start("starting");

        let mut raw_log = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(raw_log_path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                let message = format!("cannot open raw log {}: {}", raw_log_path.display(), e);
                return finish(reporter, WipeState::Failed, None, message);
            }
        };

        let mut estimator = ProgressEstimator::new();
        let mut last_exit = None;

        for (index, step) in command.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return finish(reporter, WipeState::Cancelled, last_exit, cancelled_message());
            }

            tracing::info!(
                step = index + 1,
                total = command.steps.len(),
                command = %step,
                "Launching wipe step"
            );

            match self
                .run_step(step, &mut raw_log, cancel, &mut estimator, reporter)
                .await
            {
                StepResult::Succeeded => last_exit = Some(0),
                StepResult::Failed { exit_code, message } => {
                    tracing::warn!(command = %step, ?exit_code, "Wipe step failed");
                    return finish(reporter, WipeState::Failed, exit_code, message);
                }
                StepResult::Cancelled { exit_code } => {
                    return finish(reporter, WipeState::Cancelled, exit_code, cancelled_message());
                }
            }
        }

        // A cancel that raced with natural completion still wins
        if cancel.is_cancelled() {
            return finish(reporter, WipeState::Cancelled, last_exit, cancelled_message());
        }

        finish(reporter, WipeState::Completed, Some(0), "wipe completed".to_string())
    }

    async fn run_step(
        &self,
        step: &CommandStep,
        raw_log: &mut File,
        cancel: &CancelToken,
        estimator: &mut ProgressEstimator,
        reporter: &mut ProgressReporter,
    ) -> StepResult {
        let mut child = match Command::new(&step.program)
            .args(&step.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return StepResult::Failed {
                    exit_code: None,
                    message: WipeError::ProcessLaunchFailed(format!("{}: {}", step.program, e))
                        .to_string(),
                }
            }
        };

        let pid = child.id();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone()));
        }
        drop(tx);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => {
                    if cancel.is_cancelled() {
                        tracing::warn!(command = %step, "Cancellation requested, terminating wipe process");
                        let exit_code = self.terminate(&mut child, pid).await;
                        break StepResult::Cancelled { exit_code };
                    }
                }

                Some(chunk) = rx.recv() => {
                    record_chunk(&chunk, raw_log, estimator, reporter).await;
                }

                status = child.wait() => {
                    break match status {
                        Ok(status) if status.success() => StepResult::Succeeded,
                        Ok(status) => StepResult::Failed {
                            exit_code: status.code(),
                            message: WipeError::ProcessExitedNonZero(status.code()).to_string(),
                        },
                        Err(e) => StepResult::Failed {
                            exit_code: None,
                            message: format!("failed waiting for {}: {}", step.program, e),
                        },
                    };
                }
            }
        };

        // Whatever the child wrote before exiting belongs in the log
        while let Ok(Some(chunk)) = timeout(DRAIN_TIMEOUT, rx.recv()).await {
            record_chunk(&chunk, raw_log, estimator, reporter).await;
        }
        for reader in readers {
            reader.abort();
        }
        if let Some(line) = estimator.flush() {
            if let Some(percent) = estimator.observe(&line) {
                reporter.advance(percent, &line);
            }
        }

        result
    }

    /// SIGTERM the child's process group, then SIGKILL after the grace period
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) -> Option<i32> {
        let group = pid.and_then(|p| i32::try_from(p).ok()).map(Pid::from_raw);

        if let Some(group) = group {
            if let Err(e) = killpg(group, Signal::SIGTERM) {
                tracing::debug!(error = %e, "SIGTERM to process group failed");
            }
        }

        match timeout(self.termination_grace, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => {
                tracing::warn!(
                    grace_secs = self.termination_grace.as_secs_f64(),
                    "Wipe process ignored SIGTERM, killing"
                );
                if let Some(group) = group {
                    let _ = killpg(group, Signal::SIGKILL);
                }
                let _ = child.kill().await;
                child.wait().await.ok().and_then(|s| s.code())
            }
        }
    }
}

fn finish(
    reporter: &mut ProgressReporter,
    state: WipeState,
    exit_code: Option<i32>,
    message: String,
) -> TerminalOutcome {
    reporter.finish(state, &message);
    TerminalOutcome {
        state,
        exit_code,
        message,
        progress_percent: reporter.last_percent(),
    }
}

fn cancelled_message() -> String {
    WipeError::Cancelled.to_string()
}

fn spawn_reader<R>(mut source: R, tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match source.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

async fn record_chunk(
    chunk: &[u8],
    raw_log: &mut File,
    estimator: &mut ProgressEstimator,
    reporter: &mut ProgressReporter,
) {
    if let Err(e) = raw_log.write_all(chunk).await {
        tracing::warn!(error = %e, "Raw log write failed");
    } else if let Err(e) = raw_log.flush().await {
        tracing::warn!(error = %e, "Raw log flush failed");
    }

    for line in estimator.push(chunk) {
        tracing::trace!(line = %line, "wipe output");
        if let Some(percent) = estimator.observe(&line) {
            reporter.advance(percent, &line);
        }
    }
}

/// Create the raw log file for a session, falling back to `fallback_dir`.
///
/// The file is created empty so the session owns it before the child starts.
pub fn prepare_raw_log(primary_dir: &Path, fallback_dir: &Path, file_name: &str) -> WipeResult<PathBuf> {
    let mut last_error = None;

    for dir in [primary_dir, fallback_dir] {
        let path = dir.join(file_name);
        let created = std::fs::create_dir_all(dir).and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
        });
        match created {
            Ok(_) => {
                if dir == fallback_dir && dir != primary_dir {
                    tracing::warn!(
                        primary = %primary_dir.display(),
                        path = %path.display(),
                        "Raw log directory not writable, using fallback"
                    );
                }
                return Ok(path);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error
        .map(WipeError::IoError)
        .unwrap_or_else(|| WipeError::PersistFailed("no raw log location".to_string())))
}
