use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    auth::AuthUser,
    config::AppConfig,
    error::{ApiError, ApiResult},
    state::AppState,
    users::{handlers::load_caller, User},
};

#[derive(Debug, Serialize)]
pub struct BucketList {
    pub prefix: String,
    pub buckets: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/buckets", get(list_buckets))
        .route("/admin/buckets/:bucket", delete(delete_bucket))
}

async fn require_admin(state: &AppState, user_id: uuid::Uuid) -> ApiResult<User> {
    let caller = load_caller(state, user_id).await?;
    if !caller.is_admin {
        warn!(user_id = %caller.id, "non-admin tried an admin route");
        return Err(ApiError::Forbidden("Admins only".into()));
    }
    Ok(caller)
}

/// Only project buckets of this deployment may be touched.
fn check_managed(config: &AppConfig, bucket: &str) -> ApiResult<()> {
    let prefix = &config.storage.bucket_prefix;
    if config.is_reserved_bucket(bucket) {
        return Err(ApiError::Validation(format!("Bucket {bucket} is reserved")));
    }
    if bucket.starts_with(prefix.as_str()) && bucket.len() > prefix.len() {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "Bucket {bucket} is not managed here (prefix {prefix})"
        )))
    }
}

#[instrument(skip(state))]
pub async fn list_buckets(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<BucketList>> {
    require_admin(&state, user_id).await?;
    let prefix = state.config.storage.bucket_prefix.clone();
    let buckets = state
        .storage
        .list_buckets(&prefix)
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(BucketList { prefix, buckets }))
}

#[instrument(skip(state))]
pub async fn delete_bucket(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(bucket): Path<String>,
) -> ApiResult<StatusCode> {
    check_managed(&state.config, &bucket)?;
    let caller = require_admin(&state, user_id).await?;
    let removed = state
        .storage
        .delete_bucket(&bucket)
        .await
        .map_err(ApiError::upstream)?;
    if !removed {
        return Err(ApiError::NotFound(format!("Bucket {bucket} not found")));
    }
    info!(bucket = %bucket, by = %caller.id, "bucket deleted");
    Ok(StatusCode::NO_CONTENT)
}
