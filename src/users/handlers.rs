use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{Pagination, PublicUser, UpdateUserRequest},
    repo_types::User,
};
use crate::{
    auth::{password::hash_password, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
    validate,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route(
            "/users/:username",
            get(get_user).put(update_user).delete(delete_user),
        )
}

/// Loads the caller; a token for a deleted account is treated as unauthenticated.
pub async fn load_caller(state: &AppState, user_id: uuid::Uuid) -> ApiResult<User> {
    User::find_by_id(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))
}

pub async fn find_user(state: &AppState, username: &str) -> ApiResult<User> {
    User::find_by_username(&state.db, username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {username} not found")))
}

fn ensure_self_or_admin(caller: &User, target: &User) -> ApiResult<()> {
    if caller.id == target.id || caller.is_admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Only the user or an admin can do that".into()))
    }
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> ApiResult<Json<Vec<PublicUser>>> {
    let caller = load_caller(&state, user_id).await?;
    let (limit, offset) = p.clamped();
    let users = User::list(&state.db, limit, offset).await?;
    Ok(Json(
        users
            .into_iter()
            .map(|u| PublicUser::for_viewer(u, &caller))
            .collect(),
    ))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<PublicUser>> {
    let caller = load_caller(&state, user_id).await?;
    let user = find_user(&state, &username).await?;
    Ok(Json(PublicUser::for_viewer(user, &caller)))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(username): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<Json<PublicUser>> {
    let email = payload.email.map(|e| e.trim().to_lowercase());
    if let Some(email) = &email {
        validate::email(email)?;
    }
    if let Some(password) = &payload.password {
        validate::password(password)?;
    }
    if email.is_none() && payload.password.is_none() {
        return Err(ApiError::Validation("Nothing to update".into()));
    }

    let caller = load_caller(&state, user_id).await?;
    let target = find_user(&state, &username).await?;
    ensure_self_or_admin(&caller, &target)?;

    if let Some(email) = &email {
        if let Some(other) = User::find_by_email(&state.db, email).await? {
            if other.id != target.id {
                return Err(ApiError::Conflict("Email already registered".into()));
            }
        }
    }

    let hash = payload
        .password
        .as_deref()
        .map(hash_password)
        .transpose()
        .map_err(ApiError::Internal)?;
    let user = User::update(&state.db, target.id, email.as_deref(), hash.as_deref()).await?;
    info!(user_id = %user.id, by = %caller.id, "user updated");
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    let caller = load_caller(&state, user_id).await?;
    let target = find_user(&state, &username).await?;
    ensure_self_or_admin(&caller, &target)?;

    let owned = User::count_owned_projects(&state.db, target.id).await?;
    if owned > 0 {
        warn!(user_id = %target.id, owned, "refusing to delete project owner");
        return Err(ApiError::Conflict(format!(
            "User still owns {owned} project(s)"
        )));
    }

    User::delete(&state.db, target.id).await?;
    info!(user_id = %target.id, by = %caller.id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn user(is_admin: bool) -> User {
        User {
            id: Uuid::new_v4(),
            username: "u".into(),
            email: "u@example.com".into(),
            password_hash: String::new(),
            is_admin,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn self_or_admin_rule() {
        let me = user(false);
        let other = user(false);
        let admin = user(true);
        assert!(ensure_self_or_admin(&me, &me).is_ok());
        assert!(ensure_self_or_admin(&admin, &me).is_ok());
        assert!(matches!(
            ensure_self_or_admin(&other, &me),
            Err(ApiError::Forbidden(_))
        ));
    }
}
