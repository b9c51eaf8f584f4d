pub mod error;
mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ledger::{Ledger, LogLevel, LogSource};
use crate::session::ScanSession;
use crate::settings::SettingsStore;

use error::ApiError;
use handlers::*;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub settings: SettingsStore,
    pub session: ScanSession,
}

impl AppState {
    /// Record `err` in the ledger before it is returned to the caller, so
    /// there is an audit trail independent of the HTTP response.
    pub(crate) fn fail(&self, source: LogSource, err: ApiError) -> ApiError {
        self.ledger
            .append(LogLevel::Error, source, err.message(), None);
        err
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/logs",
            get(logs_list).post(logs_append).delete(logs_clear),
        )
        .route("/api/files/scan", get(files_scan))
        .route("/api/files/readlink", get(files_readlink))
        .route(
            "/api/settings/environment",
            get(settings_read).post(settings_update),
        )
        .route("/api/scan/start", post(scan_start))
        .route("/api/scan/select", post(scan_select))
        .route("/api/scan/logs", get(scan_logs))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
