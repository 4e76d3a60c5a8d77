use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use crate::server::AppState;
use crate::timeline::export;
use crate::Error;
use std::sync::Arc;

/// Largest window served by one request
pub const MAX_WINDOW: u64 = 16 << 20;

#[derive(Deserialize)]
pub struct WindowParams {
    pub offset: Option<u64>,
    pub length: Option<u64>,
}

impl WindowParams {
    /// `(offset, length)` to read. The length defaults to the rest of the
    /// file and never exceeds [`MAX_WINDOW`].
    pub fn window(&self, file_size: u64) -> (u64, u64) {
        let offset = self.offset.unwrap_or(0);
        let length = self
            .length
            .unwrap_or_else(|| file_size.saturating_sub(offset))
            .min(MAX_WINDOW);
        (offset, length)
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (status, Json(ErrorResponse { error: error.to_string() }))
}

fn map_error(e: Error) -> ApiError {
    let status = match &e {
        Error::UnknownTimelineType(_) => StatusCode::NOT_FOUND,
        Error::PoolClosed | Error::NotInitialized | Error::PoolTimeout => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e)
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = Arc::clone(&state.ctx);
    let rows = tokio::task::spawn_blocking(move || ctx.query_numeric("SELECT COUNT(*) FROM timeline", &[], 1))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
        .map_err(map_error)?;

    Ok(Json(serde_json::json!({
        "store": state.ctx.store_type(),
        "path": state.ctx.path(),
        "connections": state.ctx.pool().opened(),
        "strings": state.ctx.last_str_id(),
        "rows": rows.first().copied().unwrap_or(0),
        "types": state.ctx.timeline_types().len().saturating_sub(1),
    })))
}

pub async fn list_timeline(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "types": state.ctx.timeline_types() }))
}

/// Serve a byte window of a virtual export file such as `timeline_ntfs.json`
pub async fn read_timeline(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Response, ApiError> {
    let info = state
        .ctx
        .timeline_type_by_name(&file)
        .filter(|t| t.utf8_file_name == file || t.json_file_name == file)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No such timeline file: {}", file)))?;
    let is_json = info.json_file_name == file;

    let (offset, length) = params.window(info.file_size(is_json));

    let ctx = Arc::clone(&state.ctx);
    let bytes = tokio::task::spawn_blocking(move || export::read(&ctx, info.id, is_json, offset, length))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
        .map_err(map_error)?;

    let content_type = if is_json {
        "application/x-ndjson"
    } else {
        "text/plain; charset=utf-8"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
