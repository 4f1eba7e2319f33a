use serde::Serialize;

use super::repo_types::Template;
use crate::storage::StoredFile;

#[derive(Debug, Serialize)]
pub struct TemplateDetail {
    #[serde(flatten)]
    pub template: Template,
    pub files: Vec<StoredFile>,
}

#[derive(Debug, Serialize)]
pub struct CreatedTemplateResponse {
    #[serde(flatten)]
    pub template: Template,
    pub files: Vec<String>,
    /// Queue message copying a project into the template, if one was requested.
    pub template_job: Option<String>,
}
