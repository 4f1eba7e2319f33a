use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::repo_types::{AuthDescriptor, Project};

const PROJECT_SELECT: &str = r#"
    SELECT p.id, p.name, p.owner_id, u.username AS owner,
           ARRAY(SELECT pc.user_id FROM project_collaborators pc
                  WHERE pc.project_id = p.id ORDER BY pc.added_at) AS collaborator_ids,
           ARRAY(SELECT cu.username FROM project_collaborators pc
                  JOIN users cu ON cu.id = pc.user_id
                  WHERE pc.project_id = p.id ORDER BY pc.added_at) AS collaborators,
           p.bucket_name, p.site_url, p.storage_provider, p.auth, p.created_at
      FROM projects p
      JOIN users u ON u.id = p.owner_id
"#;

impl Project {
    pub async fn find_by_name(db: &PgPool, name: &str) -> anyhow::Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!("{PROJECT_SELECT} WHERE p.name = $1"))
            .bind(name)
            .fetch_optional(db)
            .await?;
        Ok(project)
    }

    /// True when the name or the bucket it maps to is already used.
    pub async fn name_taken(db: &PgPool, name: &str, bucket_name: &str) -> anyhow::Result<bool> {
        let (taken,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM projects WHERE name = $1 OR bucket_name = $2)",
        )
        .bind(name)
        .bind(bucket_name)
        .fetch_one(db)
        .await?;
        Ok(taken)
    }

    /// Projects the user owns or collaborates on.
    pub async fn list_for_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, Project>(&format!(
            r#"{PROJECT_SELECT}
             WHERE p.owner_id = $1
                OR EXISTS (SELECT 1 FROM project_collaborators pc
                            WHERE pc.project_id = p.id AND pc.user_id = $1)
             ORDER BY p.name"#
        ))
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn create(
        db: &PgPool,
        name: &str,
        owner_id: Uuid,
        bucket_name: &str,
        storage_provider: &str,
    ) -> anyhow::Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO projects (name, owner_id, bucket_name, storage_provider)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(owner_id)
        .bind(bucket_name)
        .bind(storage_provider)
        .fetch_one(db)
        .await?;
        Ok(id)
    }

    pub async fn set_site_url(db: &PgPool, id: Uuid, site_url: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE projects SET site_url = $2 WHERE id = $1")
            .bind(id)
            .bind(site_url)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn set_auth(db: &PgPool, id: Uuid, auth: Option<AuthDescriptor>) -> anyhow::Result<()> {
        sqlx::query("UPDATE projects SET auth = $2 WHERE id = $1")
            .bind(id)
            .bind(auth.map(Json))
            .execute(db)
            .await?;
        Ok(())
    }

    /// Collaborators and groups go with it.
    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Returns false when the user already was a collaborator.
    pub async fn add_collaborator(db: &PgPool, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO project_collaborators (project_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (project_id, user_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Also drops the user from the project's groups.
    pub async fn remove_collaborator(db: &PgPool, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let mut tx = db.begin().await?;
        let res = sqlx::query(
            "DELETE FROM project_collaborators WHERE project_id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            DELETE FROM group_members gm
             USING groups g
             WHERE gm.group_id = g.id AND g.project_id = $1 AND gm.user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(res.rows_affected() > 0)
    }
}
