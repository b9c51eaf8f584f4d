use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::broker::{OutputLine, StreamKind};
use crate::config::DaemonConfig;
use crate::worker::{SpawnError, Worker};

/// How long to keep draining buffered output lines after the worker's exit
/// code is observed. The wait task can report the exit before the pipe
/// readers have flushed their final lines.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("path resolution failed: {0}")]
    Resolution(String),

    #[error("no source path has been resolved for this session")]
    NoResolvedPath,

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("a selection is already being processed")]
    Busy,

    #[error("worker reported an error: {0}")]
    WorkerFailed(String),

    #[error("worker exited with code {0}")]
    WorkerExit(i32),

    #[error("worker exited without producing output")]
    EmptyOutput,

    #[error("timed out waiting for worker output")]
    Timeout,

    #[error("worker input stream is closed")]
    InputClosed,
}

struct SessionInner {
    config: DaemonConfig,
    resolved_path: Mutex<Option<PathBuf>>,
    worker: Mutex<Option<Worker>>,
    selection_busy: Arc<AtomicBool>,
}

/// Manages the lifecycle of the single interactive organizer process.
///
/// One instance per server. At most one child process is alive at a time,
/// and at most one selection is in flight: a second concurrent
/// [`submit_selection`](ScanSession::submit_selection) fails fast with
/// [`SessionError::Busy`] before touching the worker's stdin — interleaving
/// two readers on one child's output is a correctness bug, not a supported
/// mode.
#[derive(Clone)]
pub struct ScanSession {
    inner: Arc<SessionInner>,
}

/// RAII guard clearing the single-flight selection flag on drop, so the
/// flag is released on every exit path of `submit_selection`.
struct SelectionGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SelectionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ScanSession {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                resolved_path: Mutex::new(None),
                worker: Mutex::new(None),
                selection_busy: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.config
    }

    /// Resolve `source` through the external resolver command, store the
    /// result as this session's source path, and return it.
    ///
    /// An empty result or a resolver failure falls back to the original
    /// input path — unresolvable means "not a symlink, process as-is".
    /// Only failing to run the resolver at all is an error.
    pub async fn resolve_path(&self, source: &str) -> Result<PathBuf, SessionError> {
        let resolved =
            resolve_symlink(&self.inner.config.resolver_program, source).await?;
        let path = PathBuf::from(resolved);
        *self.inner.resolved_path.lock() = Some(path.clone());
        Ok(path)
    }

    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.inner.resolved_path.lock().clone()
    }

    /// True if a worker process is currently alive.
    pub fn worker_alive(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(Worker::is_alive)
    }

    /// Number of output listeners attached to the live worker, if any.
    /// A settled selection must leave this at its pre-call value.
    pub fn output_listener_count(&self) -> Option<usize> {
        self.inner
            .worker
            .lock()
            .as_ref()
            .map(Worker::subscriber_count)
    }

    /// Output and exit channels of the live worker, if any. Used by the
    /// streaming endpoint; `None` means "no process running".
    pub fn output_channels(
        &self,
    ) -> Option<(broadcast::Receiver<OutputLine>, watch::Receiver<Option<i32>>)> {
        let worker = self.inner.worker.lock();
        worker
            .as_ref()
            .filter(|w| w.is_alive())
            .map(|w| (w.subscribe(), w.exit_watch()))
    }

    /// Reuse the live worker, or spawn a fresh one from the last resolved
    /// path. The returned handle is not ready for input until
    /// [`Worker::ready`] has been awaited.
    fn start_or_reuse(&self) -> Result<Worker, SessionError> {
        let mut slot = self.inner.worker.lock();
        if let Some(worker) = slot.as_ref().filter(|w| w.is_alive()) {
            return Ok(worker.clone());
        }

        let path = self
            .inner
            .resolved_path
            .lock()
            .clone()
            .ok_or(SessionError::NoResolvedPath)?;
        let worker = Worker::spawn(&self.inner.config, &path)?;
        tracing::info!(pid = ?worker.pid, command = %worker.command, "spawned organizer worker");
        *slot = Some(worker.clone());
        Ok(worker)
    }

    /// Forward one line of operator input to the worker and wait for its
    /// terminal outcome.
    ///
    /// Spawns the worker first if none is alive. Resolves with the output
    /// accumulated since the write (including the triggering line) when a
    /// completion marker is seen, or when the worker exits cleanly with
    /// nonempty output. Fails on an error-marker line, a nonzero exit, a
    /// clean exit with no output, or after the configured inactivity window
    /// with no new lines.
    ///
    /// All subscription state is owned by this call frame, so listeners are
    /// torn down on every path and repeated calls never accumulate them.
    pub async fn submit_selection(&self, selection: &str) -> Result<String, SessionError> {
        if self
            .inner
            .selection_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::Busy);
        }
        let _guard = SelectionGuard {
            flag: Arc::clone(&self.inner.selection_busy),
        };

        let worker = self.start_or_reuse()?;
        worker.ready().await;

        // Subscribe before writing so the response cannot slip past us.
        let mut lines = worker.subscribe();
        let mut exit_rx = worker.exit_watch();

        worker
            .send(selection)
            .await
            .map_err(|_| SessionError::InputClosed)?;
        tracing::debug!(selection, "selection forwarded to worker");

        let idle = self.inner.config.idle_timeout();
        let mut output = String::new();

        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Ok(line) => {
                        if let Some(done) = self.consume_line(&line, &mut output)? {
                            return Ok(done);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "selection listener lagged behind worker output");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return self.resolve_exit(&mut exit_rx, &mut lines, output).await;
                    }
                },
                changed = exit_rx.changed() => {
                    let exited = changed.is_err() || exit_rx.borrow_and_update().is_some();
                    if exited {
                        return self.resolve_exit(&mut exit_rx, &mut lines, output).await;
                    }
                }
                // A fresh sleep each iteration: any received line re-arms it.
                _ = tokio::time::sleep(idle) => {
                    tracing::warn!(?idle, "selection timed out waiting for worker output");
                    return Err(SessionError::Timeout);
                }
            }
        }
    }

    /// Fold one output line into the accumulator and check markers.
    /// `Ok(Some(output))` means a completion marker finished the selection.
    fn consume_line(
        &self,
        line: &OutputLine,
        output: &mut String,
    ) -> Result<Option<String>, SessionError> {
        match line.stream {
            StreamKind::Stdout => output.push_str(&line.text),
            StreamKind::Stderr => {
                output.push_str("ERROR: ");
                output.push_str(&line.text);
            }
        }
        output.push('\n');

        if self.inner.config.is_error_line(&line.text) {
            return Err(SessionError::WorkerFailed(line.text.clone()));
        }
        if self.inner.config.is_completion_line(&line.text) {
            return Ok(Some(output.clone()));
        }
        Ok(None)
    }

    /// The worker exited while a selection was pending. Drain lines still
    /// buffered in the pipe readers for a short grace period (they race the
    /// wait task), then resolve by exit code.
    async fn resolve_exit(
        &self,
        exit_rx: &mut watch::Receiver<Option<i32>>,
        lines: &mut broadcast::Receiver<OutputLine>,
        mut output: String,
    ) -> Result<String, SessionError> {
        let grace = tokio::time::sleep(EXIT_DRAIN_GRACE);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                biased;
                line = lines.recv() => match line {
                    Ok(line) => {
                        if let Some(done) = self.consume_line(&line, &mut output)? {
                            return Ok(done);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut grace => break,
            }
        }

        // The exit watch may close before publishing if the wait task is
        // torn down; treat that as a signal-style exit.
        while exit_rx.borrow_and_update().is_none() {
            if exit_rx.changed().await.is_err() {
                break;
            }
        }
        let code = exit_rx.borrow().unwrap_or(crate::worker::SIGNAL_EXIT_CODE);

        if code != 0 {
            return Err(SessionError::WorkerExit(code));
        }
        if output.trim().is_empty() {
            return Err(SessionError::EmptyOutput);
        }
        Ok(output)
    }

    /// Kill the live worker, if any. Idempotent; used on daemon shutdown.
    pub fn shutdown(&self) {
        if let Some(worker) = self.inner.worker.lock().take() {
            worker.kill();
        }
    }
}

/// Run the external resolver (`readlink -f`) against `path`.
///
/// Empty output or a nonzero exit yields the original path back; only an
/// OS-level failure to run the resolver is an error.
pub async fn resolve_symlink(resolver: &str, path: &str) -> Result<String, SessionError> {
    let result = tokio::process::Command::new(resolver)
        .arg("-f")
        .arg(path)
        .output()
        .await
        .map_err(|e| SessionError::Resolution(format!("{resolver}: {e}")))?;

    let resolved = String::from_utf8_lossy(&result.stdout).trim().to_string();
    if !result.status.success() || resolved.is_empty() {
        tracing::warn!(%path, status = ?result.status.code(), "resolver returned nothing, using original path");
        return Ok(path.to_string());
    }
    Ok(resolved)
}
