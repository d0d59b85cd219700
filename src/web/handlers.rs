//! Request handlers
//!
//! Handlers only extract, delegate to the service layer and wrap the result.

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use super::{responses::created, AppState};
use crate::models::{ManualStartRequest, StreamConfigRequest};
use crate::supervisor::ProcessInfo;
use crate::web::handle_result;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub tracked_processes: usize,
    pub processes: Vec<ProcessInfo>,
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    let processes = state.supervisor.list().await;
    handle_result(Ok(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tracked_processes: state.supervisor.tracked_count().await,
        processes,
    }))
}

pub async fn list_streams(State(state): State<AppState>) -> Response {
    handle_result(state.streams.list_streams().await)
}

pub async fn get_stream(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    handle_result(state.streams.get_stream(id).await)
}

pub async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<StreamConfigRequest>,
) -> Response {
    created(state.streams.create_stream(request).await)
}

pub async fn update_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StreamConfigRequest>,
) -> Response {
    handle_result(state.streams.update_stream(id, request).await)
}

pub async fn delete_stream(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    handle_result(state.streams.delete_stream(id).await)
}

/// The body is optional; an empty request is a non-permanent start
pub async fn start_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<ManualStartRequest>>,
) -> Response {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    handle_result(state.streams.request_manual_start(id, request).await)
}

pub async fn stop_stream(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    handle_result(state.streams.request_manual_stop(id).await)
}

pub async fn list_videos(State(state): State<AppState>) -> Response {
    handle_result(state.videos.list().await.map_err(Into::into))
}
