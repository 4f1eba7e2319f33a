use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::User;

/// Third-party auth a project's site uses for its own visitors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthDescriptor {
    pub provider: String,
    pub client_id: String,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Project row joined with its owner's name and collaborator lists.
#[derive(Debug, Clone, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub owner: String,
    pub collaborator_ids: Vec<Uuid>,
    pub collaborators: Vec<String>,
    pub bucket_name: String,
    pub site_url: Option<String>,
    pub storage_provider: String,
    pub auth: Option<Json<AuthDescriptor>>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    Collaborator,
    Owner,
}

impl Project {
    /// Admins act as owners.
    pub fn access_for(&self, user: &User) -> Option<Access> {
        if user.id == self.owner_id || user.is_admin {
            Some(Access::Owner)
        } else if self.collaborator_ids.contains(&user.id) {
            Some(Access::Collaborator)
        } else {
            None
        }
    }

    /// Owner or collaborator.
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id || self.collaborator_ids.contains(&user_id)
    }
}
