use std::path::Path;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use ts_rs::TS;

use crate::engine::devserver::PreviewStatus;
use crate::engine::fixer::{fix_project, validate_project as run_validation, StylingPolicy};
use crate::engine::markdown::clean_markdown_artifacts;
use crate::engine::types::{FileRecord, FixResult, ValidationReport};
use crate::engine::workspace::new_project_id;
use crate::error::AppError;
use crate::validation::require_project_id;

use super::{blocking, SharedState};

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateProjectResponse {
    pub project_id: String,
}

/// POST /api/projects: mint an id for a new conversation.
pub async fn create_project() -> Json<CreateProjectResponse> {
    Json(CreateProjectResponse { project_id: new_project_id() })
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SaveProjectRequest {
    pub project_id: String,
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub preview_html: Option<String>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LivePreview {
    pub port: Option<u16>,
    pub preview_url: Option<String>,
    pub status: PreviewStatus,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SaveProjectResponse {
    pub success: bool,
    pub project_id: String,
    pub saved_files: usize,
    pub project_path: String,
    pub live_preview: Option<LivePreview>,
    pub instructions: String,
}

/// POST /api/save-project
///
/// Files are written before responding. Markdown cleanup and the fixer
/// run afterwards in the background, still holding the project lock, so
/// a preview started now installs dependencies only after they finish.
pub async fn save_project(
    State(state): State<SharedState>,
    Json(request): Json<SaveProjectRequest>,
) -> Result<Json<SaveProjectResponse>, AppError> {
    require_project_id(&request.project_id)?;
    let project_id = request.project_id;

    let guard = state.locks.acquire(&project_id).await;
    let outcome = state
        .store
        .save_files(&project_id, &request.files, request.preview_html.as_deref())
        .await?;
    let dir = state.store.project_dir(&project_id)?;
    let had_manifest = dir.join("package.json").is_file();

    tokio::spawn(post_save(state.clone(), project_id.clone(), guard, !had_manifest));

    let mut live_preview = None;
    if state.config.preview.auto_start && had_manifest {
        match state.devservers.start(&project_id).await {
            Ok(info) => {
                live_preview = Some(LivePreview {
                    port: info.port,
                    preview_url: info.preview_url,
                    status: info.status,
                })
            }
            Err(e) => tracing::warn!(project_id = %project_id, error = %e, "Live preview failed to start"),
        }
    }

    let instructions = match live_preview.as_ref().and_then(|p| p.preview_url.as_deref()) {
        Some(url) => format!("Project saved to {}. Live preview: {}", outcome.project_path, url),
        None => format!(
            "Project saved to {}. Run with: npm install && npm run dev",
            outcome.project_path
        ),
    };

    Ok(Json(SaveProjectResponse {
        success: true,
        project_id,
        saved_files: outcome.saved_files,
        project_path: outcome.project_path,
        live_preview,
        instructions,
    }))
}

/// Best-effort cleanup and repair after a save. When the project had no
/// manifest before the fixer created one, the preview starts from here.
async fn post_save(
    state: SharedState,
    project_id: String,
    guard: OwnedMutexGuard<()>,
    start_preview_after: bool,
) {
    let dir = match state.store.project_dir(&project_id) {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!(project_id = %project_id, error = %e, "Invalid project after save");
            return;
        }
    };
    let policy = state.config.styling;
    let outcome = blocking(move || Ok(repair_saved_project(&dir, policy, clean_markdown_artifacts))).await;
    drop(guard);

    match outcome {
        Ok(fix) => {
            tracing::info!(
                project_id = %project_id,
                fixes = fix.fixes.len(),
                errors = fix.errors.len(),
                "Post-save repair finished"
            );
        }
        Err(e) => {
            tracing::warn!(project_id = %project_id, error = %e, "Post-save repair failed");
        }
    }

    if start_preview_after && state.config.preview.auto_start {
        if let Err(e) = state.devservers.start(&project_id).await {
            tracing::warn!(project_id = %project_id, error = %e, "Live preview failed to start");
        }
    }
}

/// Markdown cleanup, then a fixer pass. A cleanup failure is logged and
/// the fixer still runs.
fn repair_saved_project<C>(dir: &Path, policy: StylingPolicy, cleanup: C) -> FixResult
where
    C: FnOnce(&Path) -> Result<Vec<String>, AppError>,
{
    match cleanup(dir) {
        Ok(cleaned) if !cleaned.is_empty() => {
            tracing::info!(files = cleaned.len(), "Removed markdown artifacts after save")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Markdown cleanup failed"),
    }
    fix_project(dir, policy)
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProjectRequest {
    pub project_id: String,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ValidateProjectResponse {
    pub success: bool,
    pub project_id: String,
    pub validation: ValidationReport,
}

/// POST /api/validate-project: re-run the fixer, then check the result.
pub async fn validate_project(
    State(state): State<SharedState>,
    Json(request): Json<ProjectRequest>,
) -> Result<Json<ValidateProjectResponse>, AppError> {
    let dir = state.store.existing_project_dir(&request.project_id)?;
    let _guard = state.locks.acquire(&request.project_id).await;
    let policy = state.config.styling;
    let validation = blocking(move || run_validation(&dir, policy)).await?;

    tracing::info!(
        project_id = %request.project_id,
        fixes = validation.fixes.len(),
        errors = validation.errors.len(),
        "Project validated"
    );
    Ok(Json(ValidateProjectResponse {
        success: true,
        project_id: request.project_id,
        validation,
    }))
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FixMarkdownResponse {
    pub success: bool,
    pub project_id: String,
    pub fixed_files: Vec<String>,
    pub message: String,
}

/// POST /api/fix-markdown
pub async fn fix_markdown(
    State(state): State<SharedState>,
    Json(request): Json<ProjectRequest>,
) -> Result<Json<FixMarkdownResponse>, AppError> {
    let dir = state.store.existing_project_dir(&request.project_id)?;
    let _guard = state.locks.acquire(&request.project_id).await;
    let fixed_files = blocking(move || clean_markdown_artifacts(&dir)).await?;

    Ok(Json(FixMarkdownResponse {
        success: true,
        message: format!("Fixed markdown code blocks in {} files", fixed_files.len()),
        project_id: request.project_id,
        fixed_files,
    }))
}
