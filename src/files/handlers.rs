use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::services::{object_key, read_upload_form};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    projects::{handlers::authorize, Access},
    state::AppState,
    storage::{SignedAction, SignedUrlRequest, StoredFile},
    users::handlers::load_caller,
};

const DEFAULT_URL_TTL_SECS: u64 = 15 * 60;
const MAX_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct SignedUrlBody {
    pub key: String,
    pub action: SignedAction,
    pub content_type: Option<String>,
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    pub url: String,
    pub key: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct FileKeyQuery {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct UploadedResponse {
    pub keys: Vec<String>,
}

/// Mounted under the project tree.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:project/files",
            get(list_files)
                .post(upload_files)
                .delete(delete_file)
                .layer(DefaultBodyLimit::max(50 * 1024 * 1024)),
        )
        .route("/:project/files/signed-url", post(signed_url))
}

#[instrument(skip(state))]
pub async fn list_files(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<StoredFile>>> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Collaborator).await?;
    let files = state
        .storage
        .get_files(&project.bucket_name, "")
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(files))
}

#[instrument(skip(state, mp))]
pub async fn upload_files(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
    mp: Multipart,
) -> ApiResult<(StatusCode, Json<UploadedResponse>)> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Collaborator).await?;
    let form = read_upload_form(mp).await?;
    if form.files.is_empty() {
        return Err(ApiError::Validation("files[] is required".into()));
    }

    let mut keys = Vec::with_capacity(form.files.len());
    for file in form.files {
        let key = file.key.clone();
        state
            .storage
            .save_file(&project.bucket_name, file)
            .await
            .map_err(ApiError::upstream)?;
        keys.push(key);
    }
    info!(project = %project.name, count = keys.len(), "files uploaded");
    Ok((StatusCode::CREATED, Json(UploadedResponse { keys })))
}

#[instrument(skip(state, body))]
pub async fn signed_url(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
    Json(body): Json<SignedUrlBody>,
) -> ApiResult<Json<SignedUrlResponse>> {
    let key = object_key(&body.key)
        .ok_or_else(|| ApiError::Validation(format!("Invalid key {:?}", body.key)))?;
    let expires_in = body
        .expires_in
        .unwrap_or(DEFAULT_URL_TTL_SECS)
        .clamp(1, MAX_URL_TTL_SECS);

    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Collaborator).await?;
    let url = state
        .storage
        .signed_url(SignedUrlRequest {
            bucket: project.bucket_name.clone(),
            key: key.clone(),
            action: body.action,
            content_type: body.content_type,
            expires_in: Duration::from_secs(expires_in),
        })
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(SignedUrlResponse {
        url,
        key,
        expires_in,
    }))
}

#[instrument(skip(state))]
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
    Query(q): Query<FileKeyQuery>,
) -> ApiResult<StatusCode> {
    let key = object_key(&q.key).ok_or_else(|| ApiError::Validation("Invalid key".into()))?;
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Collaborator).await?;
    state
        .storage
        .delete_object(&project.bucket_name, &key)
        .await
        .map_err(ApiError::upstream)?;
    info!(project = %project.name, key = %key, "file deleted");
    Ok(StatusCode::NO_CONTENT)
}
