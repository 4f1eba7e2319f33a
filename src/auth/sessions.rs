//! Login bookkeeping. Sessions record when a user logged in and out; token
//! verification does not consult them.

use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub active: bool,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
}

impl Session {
    pub async fn start(db: &PgPool, user_id: Uuid, user_agent: Option<&str>) -> anyhow::Result<Session> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (user_id, user_agent)
            VALUES ($1, $2)
            RETURNING id, user_id, active, user_agent, created_at, ended_at
            "#,
        )
        .bind(user_id)
        .bind(user_agent)
        .fetch_one(db)
        .await?;
        Ok(session)
    }

    /// Marks the session inactive. Returns false when it was already ended
    /// or belongs to someone else.
    pub async fn end(db: &PgPool, session_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE sessions
               SET active = FALSE, ended_at = now()
             WHERE id = $1 AND user_id = $2 AND active
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .execute(db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn list_for_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, active, user_agent, created_at, ended_at
            FROM sessions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 50
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}
