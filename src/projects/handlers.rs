use axum::{
    extract::{Path, State},
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument};

use super::{
    dto::{
        AddCollaboratorRequest, CreateProjectRequest, CreatedProjectResponse, ProjectResponse,
        TemplateJobResponse, TemplateRef, UpdateProjectRequest,
    },
    repo_types::{Access, Project},
    services,
};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
    users::handlers::{find_user, load_caller},
};

pub use super::services::authorize;

/// Routes below `/projects` (and its `/apps` alias).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route(
            "/:project",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/:project/collaborators", post(add_collaborator))
        .route(
            "/:project/collaborators/:username",
            delete(remove_collaborator),
        )
        .route("/:project/template", post(apply_template))
}

pub fn user_routes() -> Router<AppState> {
    Router::new().route("/users/:username/projects", get(user_projects))
}

#[instrument(skip(state))]
pub async fn list_projects(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<ProjectResponse>>> {
    let projects = Project::list_for_user(&state.db, user_id).await?;
    Ok(Json(projects.into_iter().map(ProjectResponse::from).collect()))
}

#[instrument(skip(state))]
pub async fn user_projects(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<ProjectResponse>>> {
    let caller = load_caller(&state, user_id).await?;
    let target = find_user(&state, &username).await?;
    let projects = Project::list_for_user(&state.db, target.id).await?;
    // Callers only see the ones they can access themselves.
    let visible = projects
        .into_iter()
        .filter(|p| p.access_for(&caller).is_some())
        .map(ProjectResponse::from)
        .collect();
    Ok(Json(visible))
}

#[instrument(skip(state, payload))]
pub async fn create_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, HeaderMap, Json<CreatedProjectResponse>)> {
    let owner = load_caller(&state, user_id).await?;
    let (project, template_job) = services::create_project(&state, &owner, payload).await?;

    let mut headers = HeaderMap::new();
    let location = HeaderValue::from_str(&format!("/projects/{}", project.name))
        .map_err(|e| ApiError::Internal(e.into()))?;
    headers.insert(LOCATION, location);

    Ok((
        StatusCode::CREATED,
        headers,
        Json(CreatedProjectResponse {
            project: project.into(),
            template_job,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn get_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
) -> ApiResult<Json<ProjectResponse>> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Collaborator).await?;
    Ok(Json(project.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
    Json(payload): Json<UpdateProjectRequest>,
) -> ApiResult<Json<ProjectResponse>> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Owner).await?;
    if let Some(auth) = &payload.auth {
        if auth.provider.trim().is_empty() || auth.client_id.trim().is_empty() {
            return Err(ApiError::Validation("auth needs provider and client_id".into()));
        }
    }
    Project::set_auth(&state.db, project.id, payload.auth).await?;
    info!(project = %project.name, "project auth updated");
    let project = authorize(&state, &name, &caller, Access::Owner).await?;
    Ok(Json(project.into()))
}

#[instrument(skip(state))]
pub async fn delete_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Owner).await?;
    services::delete_project(&state, &project).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Idempotent: 201 when the user was added, 200 when already present.
#[instrument(skip(state, payload))]
pub async fn add_collaborator(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
    Json(payload): Json<AddCollaboratorRequest>,
) -> ApiResult<(StatusCode, Json<ProjectResponse>)> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Owner).await?;
    let target = find_user(&state, payload.username.trim()).await?;
    if target.id == project.owner_id {
        return Err(ApiError::Validation(
            "The owner can't be a collaborator".into(),
        ));
    }

    let added = Project::add_collaborator(&state.db, project.id, target.id).await?;
    info!(project = %project.name, collaborator = %target.username, added, "collaborator added");
    let project = authorize(&state, &name, &caller, Access::Owner).await?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(project.into())))
}

#[instrument(skip(state))]
pub async fn remove_collaborator(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((name, username)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let caller = load_caller(&state, user_id).await?;
    let target = find_user(&state, &username).await?;
    let project = if caller.id == target.id {
        // Collaborators may leave on their own.
        authorize(&state, &name, &caller, Access::Collaborator).await?
    } else {
        authorize(&state, &name, &caller, Access::Owner).await?
    };
    if !Project::remove_collaborator(&state.db, project.id, target.id).await? {
        return Err(ApiError::NotFound(format!(
            "{username} is not a collaborator"
        )));
    }
    info!(project = %project.name, collaborator = %username, "collaborator removed");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, payload))]
pub async fn apply_template(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
    Json(payload): Json<TemplateRef>,
) -> ApiResult<(StatusCode, Json<TemplateJobResponse>)> {
    let caller = load_caller(&state, user_id).await?;
    let project = authorize(&state, &name, &caller, Access::Collaborator).await?;
    let (job, message_id) = services::apply_template(&state, &caller, &project, &payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TemplateJobResponse {
            message_id,
            message: job.to_message(),
        }),
    ))
}
