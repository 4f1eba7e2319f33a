use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};

use super::{
    dto::{normalize_usernames, CreateGroupRequest, UpdateGroupRequest},
    repo_types::Group,
    services::resolve_members,
};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    projects::{handlers::authorize, Access},
    state::AppState,
    users::handlers::load_caller,
    validate,
};

/// Routes under a project, relative to the `/projects` nest.
pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/:project/groups", get(list_groups).post(create_group))
        .route(
            "/:project/groups/:group",
            get(get_group).put(update_group).delete(delete_group),
        )
}

/// The caller's own memberships, also served as `/roles`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/groups", get(my_groups))
        .route("/roles", get(my_groups))
}

async fn find_group(
    state: &AppState,
    project_id: uuid::Uuid,
    project: &str,
    name: &str,
) -> ApiResult<Group> {
    Group::find(&state.db, project_id, name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Group {name} not found in {project}")))
}

#[instrument(skip(state))]
pub async fn my_groups(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<Group>>> {
    Ok(Json(Group::list_for_member(&state.db, user_id).await?))
}

#[instrument(skip(state))]
pub async fn list_groups(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(project): Path<String>,
) -> ApiResult<Json<Vec<Group>>> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &project, &caller, Access::Collaborator).await?;
    Ok(Json(Group::list_for_project(&state.db, project.id).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(project): Path<String>,
    Json(payload): Json<CreateGroupRequest>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let name = payload.name.trim();
    validate::slug("group", name)?;
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &project, &caller, Access::Owner).await?;

    let members = resolve_members(&state, &project, &normalize_usernames(&payload.members)).await?;
    if Group::find(&state.db, project.id, name).await?.is_some() {
        return Err(ApiError::Conflict(format!("Group {name} already exists")));
    }
    let id = Group::create(&state.db, project.id, name).await?;
    Group::add_members(&state.db, id, &members).await?;
    info!(project = %project.name, group = %name, members = members.len(), "group created");

    let group = find_group(&state, project.id, &project.name, name).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[instrument(skip(state))]
pub async fn get_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((project, group)): Path<(String, String)>,
) -> ApiResult<Json<Group>> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &project, &caller, Access::Collaborator).await?;
    Ok(Json(find_group(&state, project.id, &project.name, &group).await?))
}

/// Adds and removes members. The group is created when it doesn't exist yet.
#[instrument(skip(state, payload))]
pub async fn update_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((project, group)): Path<(String, String)>,
    Json(payload): Json<UpdateGroupRequest>,
) -> ApiResult<Json<Group>> {
    validate::slug("group", &group)?;
    if payload.is_empty() {
        return Err(ApiError::Validation("Nothing to update".into()));
    }
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &project, &caller, Access::Owner).await?;

    let add = resolve_members(&state, &project, &normalize_usernames(&payload.add)).await?;
    let remove_names = normalize_usernames(&payload.remove);
    // Removing someone who already left the project is allowed.
    let remove: Vec<uuid::Uuid> = if remove_names.is_empty() {
        Vec::new()
    } else {
        crate::users::User::ids_by_usernames(&state.db, &remove_names)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    };

    let id = Group::get_or_create(&state.db, project.id, &group).await?;
    let added = Group::add_members(&state.db, id, &add).await?;
    let removed = Group::remove_members(&state.db, id, &remove).await?;
    info!(project = %project.name, group = %group, added, removed, "group updated");

    Ok(Json(find_group(&state, project.id, &project.name, &group).await?))
}

#[instrument(skip(state))]
pub async fn delete_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((project, group)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &project, &caller, Access::Owner).await?;
    if !Group::delete(&state.db, project.id, &group).await? {
        return Err(ApiError::NotFound(format!("Group {group} not found in {}", project.name)));
    }
    info!(project = %project.name, group = %group, "group deleted");
    Ok(StatusCode::NO_CONTENT)
}
