use anyhow::Context;
use tracing::{error, info, warn};

use super::{
    dto::{CreateProjectRequest, TemplateRef},
    repo_types::{Access, Project},
};
use crate::{
    error::{ApiError, ApiResult},
    queue::{enqueue_template_job, SourceKind, TemplateJob},
    state::AppState,
    storage::StorageClient,
    templates::Template,
    users::User,
    validate,
};

pub const STORAGE_PROVIDER: &str = "s3";

/// Loads the project and checks the caller's access level.
pub async fn authorize(
    state: &AppState,
    name: &str,
    caller: &User,
    needed: Access,
) -> ApiResult<Project> {
    let project = Project::find_by_name(&state.db, name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project {name} not found")))?;
    match project.access_for(caller) {
        Some(access) if access >= needed => Ok(project),
        Some(_) => Err(ApiError::Forbidden("Only the project owner can do that".into())),
        // Outsiders don't learn the project exists.
        None => Err(ApiError::NotFound(format!("Project {name} not found"))),
    }
}

/// Job copying `source` into the project `project_name`.
pub fn template_job_for(source: &TemplateRef, project_name: &str) -> TemplateJob {
    TemplateJob {
        from_name: source.name.clone(),
        from_type: source.kind,
        to_name: project_name.to_string(),
        to_type: SourceKind::Project,
    }
}

/// Checks the job source before anything is created or sent. Templates are
/// public; a project source must be one the caller can access.
async fn check_source(state: &AppState, caller: &User, source: &TemplateRef) -> ApiResult<()> {
    match source.kind {
        SourceKind::Template => {
            if Template::find_by_name(&state.db, &source.name).await?.is_none() {
                return Err(ApiError::NotFound(format!("Template {} not found", source.name)));
            }
        }
        SourceKind::Project => {
            authorize(state, &source.name, caller, Access::Collaborator).await?;
        }
    }
    Ok(())
}

/// Creates the row, then the bucket site. A failed bucket step removes the row
/// again, and the bucket too when this call created it.
/// Returns the project and the message id of the template job, if any.
pub async fn create_project(
    state: &AppState,
    owner: &User,
    req: CreateProjectRequest,
) -> ApiResult<(Project, Option<String>)> {
    let name = req.name.trim().to_string();
    validate::project_name(&name)?;
    let bucket = state.config.bucket_name(&name);
    if state.config.is_reserved_bucket(&bucket) {
        warn!(project = %name, bucket = %bucket, "project name maps to a reserved bucket");
        return Err(ApiError::Conflict(format!("Project name {name} is reserved")));
    }

    if Project::name_taken(&state.db, &name, &bucket).await? {
        warn!(project = %name, "project name taken");
        return Err(ApiError::Conflict(format!("Project {name} already exists")));
    }
    if let Some(source) = &req.template {
        check_source(state, owner, source).await?;
    }

    let id = Project::create(&state.db, &name, owner.id, &bucket, STORAGE_PROVIDER).await?;

    // A bucket we failed to create may belong to someone else; leave it alone.
    if let Err(e) = state.storage.create_bucket(&bucket).await {
        error!(error = %format!("{e:#}"), bucket = %bucket, "bucket creation failed, rolling back");
        Project::delete(&state.db, id).await?;
        return Err(ApiError::upstream(e));
    }
    let site_url = match state.storage.configure_site(&bucket).await {
        Ok(url) => url,
        Err(e) => {
            error!(error = %format!("{e:#}"), bucket = %bucket, "bucket setup failed, rolling back");
            if let Err(cleanup) = state.storage.delete_bucket(&bucket).await {
                warn!(error = %cleanup, bucket = %bucket, "partial bucket left behind");
            }
            Project::delete(&state.db, id).await?;
            return Err(ApiError::upstream(e));
        }
    };
    Project::set_site_url(&state.db, id, &site_url).await?;

    let mut message_id = None;
    if let Some(source) = &req.template {
        let job = template_job_for(source, &name);
        match enqueue_template_job(state.queue.as_ref(), &job).await {
            Ok(id) => message_id = Some(id),
            // The project stands without its template; the client can re-apply.
            Err(e) => error!(error = %format!("{e:#}"), project = %name, "template enqueue failed"),
        }
    }

    let project = Project::find_by_name(&state.db, &name)
        .await?
        .context("project vanished after insert")
        .map_err(ApiError::Internal)?;
    info!(project = %project.name, owner = %owner.id, bucket = %bucket, "project created");
    Ok((project, message_id))
}

/// Removes the bucket; missing buckets are fine. Returns whether one existed.
pub async fn remove_storage(storage: &dyn StorageClient, project: &Project) -> ApiResult<bool> {
    let removed = storage
        .delete_bucket(&project.bucket_name)
        .await
        .map_err(ApiError::upstream)?;
    if !removed {
        info!(project = %project.name, bucket = %project.bucket_name, "no bucket to remove");
    }
    Ok(removed)
}

pub async fn delete_project(state: &AppState, project: &Project) -> ApiResult<()> {
    remove_storage(state.storage.as_ref(), project).await?;
    Project::delete(&state.db, project.id).await?;
    info!(project = %project.name, "project deleted");
    Ok(())
}

/// Sends one template job for `project`. Returns the job and its message id.
pub async fn apply_template(
    state: &AppState,
    caller: &User,
    project: &Project,
    source: &TemplateRef,
) -> ApiResult<(TemplateJob, String)> {
    if source.kind == SourceKind::Project && source.name == project.name {
        return Err(ApiError::Validation("A project can't be its own template".into()));
    }
    check_source(state, caller, source).await?;
    let job = template_job_for(source, &project.name);
    let message_id = enqueue_template_job(state.queue.as_ref(), &job)
        .await
        .map_err(ApiError::upstream)?;
    Ok((job, message_id))
}
