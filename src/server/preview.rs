use axum::{
    extract::{Path, State},
    response::Html,
    Json,
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::engine::devserver::PreviewInfo;
use crate::engine::preview::{classify, compose_document, host_page, render_frame};
use crate::error::AppError;
use crate::validation::require_project_id;

use super::SharedState;

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NodePreviewRequest {
    pub action: String,
    pub project_id: String,
}

/// POST /api/node-preview: `start | stop | status` for a project's dev server.
pub async fn node_preview(
    State(state): State<SharedState>,
    Json(request): Json<NodePreviewRequest>,
) -> Result<Json<PreviewInfo>, AppError> {
    require_project_id(&request.project_id)?;
    let info = match request.action.as_str() {
        "start" => state.devservers.start(&request.project_id).await?,
        "stop" => state.devservers.stop(&request.project_id).await?,
        "status" => state.devservers.status(&request.project_id).await,
        other => return Err(AppError::Validation(format!("Invalid action: {}", other))),
    };
    Ok(Json(info))
}

/// GET /api/live-preview/{project_id}: report a running preview, else start one.
pub async fn live_preview(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Json<PreviewInfo>, AppError> {
    require_project_id(&project_id)?;
    let status = state.devservers.status(&project_id).await;
    if status.running {
        return Ok(Json(status));
    }
    Ok(Json(state.devservers.start(&project_id).await?))
}

/// GET /api/preview/{project_id}: host page framing the saved preview.
pub async fn project_preview(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Html<String>, AppError> {
    let html = state.store.read_preview(&project_id).await?;
    let render = classify(html.as_deref(), false);
    Ok(Html(host_page(&format!("Preview: {}", project_id), &render)))
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ComposeRequest {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub loading: bool,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ComposeResponse {
    pub mode: String,
    pub document: Option<String>,
    /// Markup safe to inline into the host UI.
    pub frame: String,
}

/// POST /api/preview/compose
pub async fn compose(Json(request): Json<ComposeRequest>) -> Json<ComposeResponse> {
    let render = classify(request.html.as_deref(), request.loading);
    Json(ComposeResponse {
        mode: render.mode().to_string(),
        document: compose_document(&render),
        frame: render_frame(&render),
    })
}
