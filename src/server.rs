use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::{
    controller::ScanProgressController,
    error::CancelError,
    progress::ScanProgress,
    types::{ScanStatus, SessionState},
};

#[derive(Clone)]
pub struct AppState {
    controller: Arc<Mutex<ScanProgressController>>, // start/cancel are serialized
    view: watch::Receiver<ScanProgress>,            // readers never wait on the controller
}

impl AppState {
    pub fn new(controller: Arc<Mutex<ScanProgressController>>, view: watch::Receiver<ScanProgress>) -> Self {
        Self { controller, view }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Status {
    pub scan_id: Option<String>,
    pub status: ScanStatus,
    pub connected: bool,
    pub session: SessionState,
    pub total_steps: usize,
    pub finished_steps: usize,
    pub current_step: Option<u32>,
    pub log_lines: usize,
    pub dropped_frames: u64,
    pub started_at: Option<String>,
}

impl From<&ScanProgress> for Status {
    fn from(p: &ScanProgress) -> Self {
        Self {
            scan_id: p.scan_id.clone(),
            status: p.status,
            connected: p.connected,
            session: p.session,
            total_steps: p.steps().len(),
            finished_steps: p.table.finished(),
            current_step: p.current_step,
            log_lines: p.log().len(),
            dropped_frames: p.dropped_frames,
            started_at: p.started_at.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    pub scan_id: String,
}

/// Dashboard JSON API over a shared controller.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/steps", get(get_steps))
        .route("/logs", get(get_logs))
        .route("/watch", post(post_watch))
        .route("/cancel", post(post_cancel))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let app = router(state);
    tracing::info!(%bind, "serving dashboard API");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let out = Status::from(&*app.view.borrow());
    (StatusCode::OK, Json(out))
}

async fn get_steps(State(app): State<AppState>) -> impl IntoResponse {
    let steps = app.view.borrow().steps().to_vec();
    (StatusCode::OK, Json(steps))
}

async fn get_logs(State(app): State<AppState>) -> impl IntoResponse {
    let log = app.view.borrow().log().to_vec();
    (StatusCode::OK, Json(log))
}

async fn post_watch(State(app): State<AppState>, Json(req): Json<WatchRequest>) -> impl IntoResponse {
    let scan_id = req.scan_id.trim();
    if scan_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "scan_id must not be empty").into_response();
    }
    let started = app.controller.lock().await.start(scan_id);
    let code = if started { StatusCode::ACCEPTED } else { StatusCode::OK };
    let out = Status::from(&*app.view.borrow());
    (code, Json(out)).into_response()
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    let res = app.controller.lock().await.cancel().await;
    match res {
        Ok(()) => {
            let out = Status::from(&*app.view.borrow());
            (StatusCode::ACCEPTED, Json(out)).into_response()
        }
        Err(CancelError::NoActiveScan) => {
            (StatusCode::CONFLICT, "no scan is being watched").into_response()
        }
        Err(e) => (StatusCode::BAD_GATEWAY, format!("cancel failed: {e}")).into_response(),
    }
}
