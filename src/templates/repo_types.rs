use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Starter site stored under its own prefix in the template bucket.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub author_id: Option<Uuid>,
    pub author: Option<String>,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Template {
    pub fn is_authored_by(&self, user_id: Uuid) -> bool {
        self.author_id == Some(user_id)
    }
}
