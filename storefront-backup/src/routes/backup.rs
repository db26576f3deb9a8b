use crate::error::AppError;
use crate::models::user::User;
use crate::services::backup::BackupMethod;
use crate::services::backup_scheduler::Trigger;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

const DEFAULT_KEEP_COUNT: usize = 10;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/clean", post(clean_backups))
        .route("/restore/{file_name}", post(restore_backup))
        .route("/download/{file_name}", get(download_backup))
        .route("/{file_name}", delete(delete_backup))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let overview = state.backups.overview().await?;
    Ok(Json(json!({
        "success": true,
        "method": overview.method,
        "backups": overview.backups,
        "stats": overview.stats,
    })))
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(user = %user.email, "[Backup] Manual backup requested");

    match state.runner.run(Trigger::Manual).await? {
        Some(backup) => Ok(Json(json!({
            "success": true,
            "message": "Backup created successfully",
            "backup": backup,
        }))),
        None => Err(AppError::Conflict("A backup is already in progress".into())),
    }
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(file_name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(user = %user.email, file = %file_name, "[Restore] Restore requested");

    let report = state.runner.restore(&file_name).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Backup {file_name} restored successfully"),
        "restored": report,
    })))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(file_name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.backups.delete(&file_name).await?;
    state
        .ui
        .broadcast("backup:deleted", json!({ "fileName": file_name }));
    Ok(Json(json!({
        "success": true,
        "message": format!("Backup {file_name} deleted"),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanBody {
    #[serde(default = "default_keep_count")]
    keep_count: usize,
}

fn default_keep_count() -> usize {
    DEFAULT_KEEP_COUNT
}

async fn clean_backups(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CleanBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    // A bare POST without a JSON body uses the default count
    let keep_count = match body {
        Ok(Json(body)) => body.keep_count,
        Err(JsonRejection::MissingJsonContentType(_)) => DEFAULT_KEEP_COUNT,
        Err(rejection) => return Err(AppError::BadRequest(rejection.body_text())),
    };

    let report = state.backups.clean(keep_count).await?;
    if !report.deleted.is_empty() || !report.failed.is_empty() {
        state.ui.broadcast("backup:cleaned", json!(report));
    }
    Ok(Json(json!({
        "success": report.failed.is_empty(),
        "message": format!("Removed {} old backups", report.deleted.len()),
        "deleted": report.deleted,
        "failed": report.failed,
        "kept": report.kept,
    })))
}

async fn download_backup(
    State(state): State<Arc<AppState>>,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (path, info) = state.backups.locate(&file_name).await?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to open backup: {}", e)))?;
    let body = Body::from_stream(ReaderStream::new(file));

    let content_type = match BackupMethod::from_file_name(&info.name) {
        Some(BackupMethod::Dump) => "application/gzip",
        Some(BackupMethod::Json) => "application/json",
        None => "application/octet-stream",
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, info.size_bytes.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", info.name.replace('"', "_")),
            ),
        ],
        body,
    ))
}
