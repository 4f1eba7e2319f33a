use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{CreatedTemplateResponse, TemplateDetail},
    repo_types::Template,
    services::{self, NewTemplate},
    template_prefix,
};
use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    files::services::read_upload_form,
    projects::{handlers::authorize, Access},
    state::AppState,
    users::handlers::load_caller,
};

/// Listing and reading are public; see the auth allow-list.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/templates",
            get(list_templates)
                .post(create_template)
                .layer(DefaultBodyLimit::max(50 * 1024 * 1024)),
        )
        .route("/templates/:template", get(get_template).delete(delete_template))
}

async fn find_template(state: &AppState, name: &str) -> ApiResult<Template> {
    Template::find_by_name(&state.db, name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Template {name} not found")))
}

#[instrument(skip(state))]
pub async fn list_templates(State(state): State<AppState>) -> ApiResult<Json<Vec<Template>>> {
    Ok(Json(Template::list(&state.db).await?))
}

#[instrument(skip(state))]
pub async fn get_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TemplateDetail>> {
    let template = find_template(&state, &name).await?;
    let files = state
        .storage
        .get_files(&state.config.storage.template_bucket, &template_prefix(&name))
        .await
        .map_err(ApiError::upstream)?;
    Ok(Json(TemplateDetail { template, files }))
}

#[instrument(skip(state, mp))]
pub async fn create_template(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> ApiResult<(StatusCode, Json<CreatedTemplateResponse>)> {
    let new = NewTemplate::from_form(read_upload_form(mp).await?)?;
    let caller = load_caller(&state, user_id).await?;
    if let Some(project) = &new.from_project {
        authorize(&state, project, &caller, Access::Collaborator).await?;
    }
    let (template, files, template_job) = services::create_template(&state, caller.id, new).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedTemplateResponse {
            template,
            files,
            template_job,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn delete_template(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    let caller = load_caller(&state, user_id).await?;
    let template = find_template(&state, &name).await?;
    if !template.is_authored_by(caller.id) && !caller.is_admin {
        return Err(ApiError::Forbidden(
            "Only the author or an admin can delete a template".into(),
        ));
    }
    services::delete_template(&state, &template).await?;
    Ok(StatusCode::NO_CONTENT)
}
