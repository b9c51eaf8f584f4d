use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, OutputLine, StreamKind};
use crate::config::DaemonConfig;

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker process has no {0} handle")]
    MissingStdio(&'static str),
}

/// Exit code used when the worker was terminated by a signal and no code
/// is available.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// Handle to the one spawned organizer process.
///
/// The process itself is owned by a background wait task; the handle holds
/// only channels, so it is cheap to clone and every clone observes the same
/// process. Output reaches subscribers line-by-line through the [`Broker`];
/// input goes through an mpsc channel consumed by a dedicated writer task.
#[derive(Clone)]
pub struct Worker {
    /// PID of the child, if available at spawn time.
    pub pid: Option<u32>,
    /// Human-readable display of the command being run.
    pub command: String,
    input_tx: mpsc::Sender<String>,
    broker: Broker,
    exit_rx: watch::Receiver<Option<i32>>,
    /// Earliest instant at which the worker accepts input (spawn + warm-up).
    ready_at: tokio::time::Instant,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("exit_code", &*self.exit_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Spawn the organizer for `source_path` with all three stdio streams
    /// piped, in the non-interactive-monitor invocation mode.
    pub fn spawn(config: &DaemonConfig, source_path: &Path) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&config.worker_program);
        cmd.args(&config.worker_args)
            .arg(source_path)
            .arg("--force")
            .arg("--disable-monitor")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command_display = format!(
            "{} {} {} --force --disable-monitor",
            config.worker_program,
            config.worker_args.join(" "),
            source_path.display(),
        );

        let mut child = cmd.spawn().map_err(SpawnError::Spawn)?;
        let pid = child.id();
        let mut stdin = child.stdin.take().ok_or(SpawnError::MissingStdio("stdin"))?;
        let stdout = child.stdout.take().ok_or(SpawnError::MissingStdio("stdout"))?;
        let stderr = child.stderr.take().ok_or(SpawnError::MissingStdio("stderr"))?;

        let broker = Broker::new();
        let (input_tx, mut input_rx) = mpsc::channel::<String>(64);
        let (exit_tx, exit_rx) = watch::channel::<Option<i32>>(None);
        let cancel = CancellationToken::new();

        spawn_line_reader(stdout, StreamKind::Stdout, broker.clone());
        spawn_line_reader(stderr, StreamKind::Stderr, broker.clone());

        // Writer: consumes queued input lines into the child's stdin,
        // appending the newline the worker's prompt loop expects. Exits when
        // the channel closes (all handles dropped) or the pipe breaks.
        tokio::spawn(async move {
            while let Some(line) = input_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                let _ = stdin.flush().await;
            }
        });

        // Wait task: owns the child, publishes the exit code exactly once.
        // On cancellation the child is killed and still reaped.
        let wait_cancel = cancel.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = wait_cancel.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code().unwrap_or(SIGNAL_EXIT_CODE),
                Err(e) => {
                    tracing::error!(?e, "error waiting for worker process");
                    SIGNAL_EXIT_CODE
                }
            };
            tracing::debug!(code, "worker process exited");
            let _ = exit_tx.send(Some(code));
        });

        Ok(Self {
            pid,
            command: command_display,
            input_tx,
            broker,
            exit_rx,
            ready_at: tokio::time::Instant::now() + config.warmup(),
            cancel,
        })
    }

    /// True while the child has not published an exit code.
    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// The exit code, once the child has exited.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    /// Subscribe to subsequent output lines. Lines published before the
    /// subscription are never replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputLine> {
        self.broker.subscribe()
    }

    /// Watch channel holding `None` while running, `Some(code)` after exit.
    pub fn exit_watch(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    /// Number of output subscribers currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.broker.subscriber_count()
    }

    /// Suspend until the warm-up delay after spawn has elapsed.
    pub async fn ready(&self) {
        tokio::time::sleep_until(self.ready_at).await;
    }

    /// Queue one line of input for the child's stdin. The trailing newline
    /// is appended by the writer task.
    pub async fn send(&self, line: &str) -> Result<(), InputClosed> {
        self.input_tx
            .send(line.to_string())
            .await
            .map_err(|_| InputClosed)
    }

    /// Kill the child. Idempotent; the exit code is still published.
    pub fn kill(&self) {
        self.cancel.cancel();
    }
}

#[derive(Error, Debug)]
#[error("worker input stream is closed")]
pub struct InputClosed;

/// Read a child pipe chunk-by-chunk as lines, trim each, drop empties, and
/// publish the rest to the broker tagged with `kind`. Ends at EOF or read
/// error.
fn spawn_line_reader(
    pipe: impl AsyncRead + Unpin + Send + 'static,
    kind: StreamKind,
    broker: Broker,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    broker.publish(OutputLine { stream: kind, text: text.to_string() });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(?e, ?kind, "worker pipe read error");
                    break;
                }
            }
        }
    });
}
