use anyhow::Context;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{repo_types::Template, template_prefix};
use crate::{
    error::{ApiError, ApiResult},
    files::services::UploadForm,
    queue::{enqueue_template_job, SourceKind, TemplateJob},
    state::AppState,
    storage::{FileUpload, StorageClient},
    validate,
};

/// Fields of the template upload form.
#[derive(Debug)]
pub struct NewTemplate {
    pub name: String,
    pub description: Option<String>,
    /// Project whose files seed the template.
    pub from_project: Option<String>,
    pub files: Vec<FileUpload>,
}

impl NewTemplate {
    pub fn from_form(form: UploadForm) -> ApiResult<Self> {
        let text = |key: &str| {
            form.fields
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let name = text("name").ok_or_else(|| ApiError::Validation("name is required".into()))?;
        validate::slug("template", &name)?;
        let description = text("description");
        let from_project = text("project");
        if form.files.is_empty() && from_project.is_none() {
            return Err(ApiError::Validation(
                "Upload files[] or name a project to copy".into(),
            ));
        }
        Ok(Self {
            name,
            description,
            from_project,
            files: form.files,
        })
    }
}

/// Moves uploaded keys under the template's prefix.
pub fn prefixed(name: &str, files: Vec<FileUpload>) -> Vec<FileUpload> {
    let prefix = template_prefix(name);
    files
        .into_iter()
        .map(|f| FileUpload {
            key: format!("{prefix}{}", f.key),
            ..f
        })
        .collect()
}

/// Creates the shared template bucket on first use.
pub async fn ensure_template_bucket(storage: &dyn StorageClient, bucket: &str) -> anyhow::Result<()> {
    let existing = storage.list_buckets(bucket).await?;
    if !existing.iter().any(|b| b == bucket) {
        storage.create_bucket(bucket).await?;
        info!(bucket = %bucket, "template bucket created");
    }
    Ok(())
}

/// Deletes every object under the template's prefix. Returns how many went.
pub async fn remove_template_files(
    storage: &dyn StorageClient,
    bucket: &str,
    name: &str,
) -> anyhow::Result<usize> {
    let files = storage.get_files(bucket, &template_prefix(name)).await?;
    for file in &files {
        storage.delete_object(bucket, &file.key).await?;
    }
    Ok(files.len())
}

/// Inserts the row and uploads the files. A failed upload removes both again.
/// Returns the template, its keys and the job id when seeded from a project.
pub async fn create_template(
    state: &AppState,
    author_id: Uuid,
    new: NewTemplate,
) -> ApiResult<(Template, Vec<String>, Option<String>)> {
    if Template::find_by_name(&state.db, &new.name).await?.is_some() {
        return Err(ApiError::Conflict(format!("Template {} already exists", new.name)));
    }
    let bucket = state.config.storage.template_bucket.clone();
    let id = Template::create(&state.db, &new.name, author_id, new.description.as_deref()).await?;

    let uploads = prefixed(&new.name, new.files);
    let mut keys = Vec::with_capacity(uploads.len());
    let stored = async {
        ensure_template_bucket(state.storage.as_ref(), &bucket).await?;
        for file in uploads {
            let key = file.key.clone();
            state.storage.save_file(&bucket, file).await?;
            keys.push(key);
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;
    if let Err(e) = stored {
        error!(error = %format!("{e:#}"), template = %new.name, "template upload failed, rolling back");
        if let Err(cleanup) = remove_template_files(state.storage.as_ref(), &bucket, &new.name).await {
            warn!(error = %cleanup, template = %new.name, "partial template left behind");
        }
        Template::delete(&state.db, id).await?;
        return Err(ApiError::upstream(e));
    }

    let mut message_id = None;
    if let Some(project) = &new.from_project {
        let job = TemplateJob {
            from_name: project.clone(),
            from_type: SourceKind::Project,
            to_name: new.name.clone(),
            to_type: SourceKind::Template,
        };
        message_id = Some(
            enqueue_template_job(state.queue.as_ref(), &job)
                .await
                .map_err(ApiError::upstream)?,
        );
    }

    let template = Template::find_by_name(&state.db, &new.name)
        .await?
        .context("template vanished after insert")
        .map_err(ApiError::Internal)?;
    info!(template = %template.name, author = %author_id, files = keys.len(), "template created");
    Ok((template, keys, message_id))
}

pub async fn delete_template(state: &AppState, template: &Template) -> ApiResult<()> {
    let bucket = &state.config.storage.template_bucket;
    let removed = remove_template_files(state.storage.as_ref(), bucket, &template.name)
        .await
        .map_err(ApiError::upstream)?;
    Template::delete(&state.db, template.id).await?;
    info!(template = %template.name, removed, "template deleted");
    Ok(())
}
