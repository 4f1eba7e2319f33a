use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{AuthDescriptor, Project};
use crate::queue::SourceKind;

/// Names a template job source: a stored template or another project.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    #[serde(rename = "type", default = "default_source")]
    pub kind: SourceKind,
}

fn default_source() -> SourceKind {
    SourceKind::Template
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub template: Option<TemplateRef>,
}

/// `auth: null` clears the descriptor.
#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub auth: Option<AuthDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct AddCollaboratorRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct FrontendDescriptor {
    pub bucket_name: String,
    pub site_url: Option<String>,
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub collaborators: Vec<String>,
    pub frontend: FrontendDescriptor,
    pub auth: Option<AuthDescriptor>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Project> for ProjectResponse {
    fn from(p: Project) -> Self {
        Self {
            id: p.id,
            name: p.name,
            owner: p.owner,
            collaborators: p.collaborators,
            frontend: FrontendDescriptor {
                bucket_name: p.bucket_name,
                site_url: p.site_url,
                provider: p.storage_provider,
            },
            auth: p.auth.map(|j| j.0),
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedProjectResponse {
    #[serde(flatten)]
    pub project: ProjectResponse,
    /// Queue message id of the template job, when one was requested.
    pub template_job: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TemplateJobResponse {
    pub message_id: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_ref_defaults_to_template_source() {
        let r: TemplateRef = serde_json::from_str(r#"{"name":"landing"}"#).unwrap();
        assert_eq!(r.kind, SourceKind::Template);
        let r: TemplateRef = serde_json::from_str(r#"{"name":"blog","type":"project"}"#).unwrap();
        assert_eq!(r.kind, SourceKind::Project);
    }

    #[test]
    fn response_nests_frontend_descriptor() {
        let project = Project {
            id: Uuid::new_v4(),
            name: "my-site".into(),
            owner_id: Uuid::new_v4(),
            owner: "jane".into(),
            collaborator_ids: vec![],
            collaborators: vec![],
            bucket_name: "tess-my-site".into(),
            site_url: Some("http://tess-my-site.example".into()),
            storage_provider: "s3".into(),
            auth: None,
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(ProjectResponse::from(project)).unwrap();
        assert_eq!(json["frontend"]["bucket_name"], "tess-my-site");
        assert_eq!(json["frontend"]["provider"], "s3");
        assert!(json["auth"].is_null());
    }
}
