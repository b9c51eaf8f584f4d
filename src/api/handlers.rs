use std::convert::Infallible;
use std::path::PathBuf;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::broker::{OutputLine, StreamKind};
use crate::ledger::{LogEntry, LogLevel, LogSource};
use crate::session::resolve_symlink;
use crate::settings::SettingPair;
use crate::walker::{self, FileInfo};

use super::error::ApiError;
use super::AppState;

/// Terminal notice sent to stream subscribers when no worker is running.
const NO_PROCESS_NOTICE: &str = "No scan process running";

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ── Log ledger ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub(super) struct LogsResponse {
    logs: Vec<LogEntry>,
}

pub(super) async fn logs_list(State(state): State<AppState>) -> Json<LogsResponse> {
    Json(LogsResponse { logs: state.ledger.list() })
}

#[derive(Deserialize)]
pub(super) struct AppendLogRequest {
    level: LogLevel,
    message: String,
    source: LogSource,
    details: Option<String>,
}

#[derive(Serialize)]
pub(super) struct AppendLogResponse {
    success: bool,
    log: LogEntry,
}

pub(super) async fn logs_append(
    State(state): State<AppState>,
    Json(req): Json<AppendLogRequest>,
) -> Json<AppendLogResponse> {
    let log = state
        .ledger
        .append(req.level, req.source, req.message, req.details);
    Json(AppendLogResponse { success: true, log })
}

#[derive(Serialize)]
pub(super) struct SuccessResponse {
    success: bool,
}

pub(super) async fn logs_clear(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.ledger.clear();
    Json(SuccessResponse { success: true })
}

// ── Filesystem ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct FileScanQuery {
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
}

pub(super) async fn files_scan(
    State(state): State<AppState>,
    Query(params): Query<FileScanQuery>,
) -> Result<Json<Vec<FileInfo>>, ApiError> {
    let Some(path) = params.path.filter(|p| !p.is_empty()) else {
        return Err(state.fail(
            LogSource::Scan,
            ApiError::InvalidRequest("path parameter is required".into()),
        ));
    };

    state.ledger.append(
        LogLevel::Info,
        LogSource::Scan,
        format!("Starting scan of directory: {path}"),
        None,
    );

    let dir = PathBuf::from(path.clone());
    let recursive = params.recursive;
    let entries = tokio::task::spawn_blocking(move || walker::walk(&dir, recursive))
        .await
        .map_err(|e| state.fail(LogSource::Scan, ApiError::InternalError(e.to_string())))?
        .map_err(|e| state.fail(LogSource::Scan, e.into()))?;

    state.ledger.append(
        LogLevel::Success,
        LogSource::Scan,
        format!("Completed scan of {} items in {path}", entries.len()),
        None,
    );
    Ok(Json(entries))
}

#[derive(Deserialize)]
pub(super) struct ReadlinkQuery {
    path: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ReadlinkResponse {
    #[serde(rename = "sourcePath")]
    source_path: String,
}

pub(super) async fn files_readlink(
    State(state): State<AppState>,
    Query(params): Query<ReadlinkQuery>,
) -> Result<Json<ReadlinkResponse>, ApiError> {
    let Some(path) = params.path.filter(|p| !p.is_empty()) else {
        return Err(state.fail(
            LogSource::Symlink,
            ApiError::InvalidRequest("path parameter is required".into()),
        ));
    };

    let source_path = resolve_symlink(&state.session.config().resolver_program, &path)
        .await
        .map_err(|e| state.fail(LogSource::Symlink, e.into()))?;
    Ok(Json(ReadlinkResponse { source_path }))
}

// ── Settings ───────────────────────────────────────────────────────

#[derive(Serialize)]
pub(super) struct SettingsResponse {
    success: bool,
    settings: std::collections::BTreeMap<String, String>,
}

pub(super) async fn settings_read(
    State(state): State<AppState>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let settings = state
        .settings
        .read()
        .map_err(|e| state.fail(LogSource::System, e.into()))?;
    Ok(Json(SettingsResponse { success: true, settings }))
}

#[derive(Deserialize)]
pub(super) struct UpdateSettingsRequest {
    settings: Vec<SettingPair>,
}

pub(super) async fn settings_update(
    State(state): State<AppState>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .settings
        .update(&req.settings)
        .map_err(|e| state.fail(LogSource::System, e.into()))?;
    state.ledger.append(
        LogLevel::Success,
        LogSource::System,
        "Environment settings updated successfully",
        None,
    );
    Ok(Json(SuccessResponse { success: true }))
}

// ── Scan session ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ScanStartRequest {
    #[serde(rename = "sourcePath")]
    source_path: String,
}

type EventStream = Sse<BoxStream<'static, Result<Event, Infallible>>>;

fn one_shot_stream(event: Event) -> EventStream {
    Sse::new(stream::iter([Ok(event)]).boxed())
}

/// Resolve and store the source path; does not spawn the worker yet. The
/// response is a one-event stream carrying the JSON-encoded resolved path.
pub(super) async fn scan_start(
    State(state): State<AppState>,
    Json(req): Json<ScanStartRequest>,
) -> Result<EventStream, ApiError> {
    if req.source_path.is_empty() {
        return Err(state.fail(
            LogSource::Scan,
            ApiError::InvalidRequest("sourcePath is required".into()),
        ));
    }

    let resolved = state
        .session
        .resolve_path(&req.source_path)
        .await
        .map_err(|e| state.fail(LogSource::Scan, e.into()))?;

    state.ledger.append(
        LogLevel::Info,
        LogSource::Scan,
        format!("Resolved source path: {}", resolved.display()),
        None,
    );

    let payload = serde_json::to_string(&resolved.to_string_lossy())
        .unwrap_or_else(|_| String::from("\"\""));
    Ok(one_shot_stream(Event::default().data(payload)))
}

#[derive(Deserialize)]
pub(super) struct SelectRequest {
    selection: String,
}

#[derive(Serialize)]
pub(super) struct SelectResponse {
    success: bool,
    output: String,
}

/// Spawn the worker if needed, forward the selection, and block until the
/// session resolves it (completion marker, exit, or inactivity timeout).
pub(super) async fn scan_select(
    State(state): State<AppState>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<SelectResponse>, ApiError> {
    let output = state
        .session
        .submit_selection(&req.selection)
        .await
        .map_err(|e| state.fail(LogSource::Scan, e.into()))?;

    state.ledger.append(
        LogLevel::Success,
        LogSource::Symlink,
        "Selection processed by organizer",
        Some(output.trim().to_string()),
    );
    Ok(Json(SelectResponse { success: true, output }))
}

/// Fan out the live worker's output as SSE.
///
/// Stdout lines are JSON-encoded strings; stderr lines likewise, with an
/// `ERROR: ` prefix. The worker's exit is reported as one plain-text line
/// (not JSON, by design) before the stream closes. With no live worker, the
/// stream consists of a single plain terminal notice.
pub(super) async fn scan_logs(State(state): State<AppState>) -> EventStream {
    let Some((lines, exit_rx)) = state.session.output_channels() else {
        return one_shot_stream(Event::default().data(NO_PROCESS_NOTICE));
    };

    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(forward_output(lines, exit_rx, tx));

    Sse::new(ReceiverStream::new(rx).map(Ok::<_, Infallible>).boxed())
        .keep_alive(KeepAlive::default())
}

/// Pump broker lines into an SSE subscriber channel until the worker exits
/// or the client disconnects. Exactly one terminal notice is sent on exit.
async fn forward_output(
    mut lines: broadcast::Receiver<OutputLine>,
    mut exit_rx: watch::Receiver<Option<i32>>,
    tx: mpsc::Sender<Event>,
) {
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Ok(line) => {
                    let text = match line.stream {
                        StreamKind::Stdout => line.text,
                        StreamKind::Stderr => format!("ERROR: {}", line.text),
                    };
                    let payload = match serde_json::to_string(&text) {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    if tx.send(Event::default().data(payload)).await.is_err() {
                        // client disconnected
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "stream subscriber lagged behind worker output");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = exit_rx.changed() => {
                if changed.is_err() || exit_rx.borrow_and_update().is_some() {
                    break;
                }
            }
        }
    }

    let code = exit_rx
        .borrow()
        .unwrap_or(crate::worker::SIGNAL_EXIT_CODE);
    let _ = tx
        .send(Event::default().data(format!("Process exited with code {code}")))
        .await;
    // dropping tx closes every subscriber's stream
}
