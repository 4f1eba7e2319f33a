use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::Template;

const TEMPLATE_SELECT: &str = r#"
    SELECT t.id, t.name, t.author_id, u.username AS author, t.description, t.created_at
      FROM templates t
      LEFT JOIN users u ON u.id = t.author_id
"#;

impl Template {
    pub async fn list(db: &PgPool) -> anyhow::Result<Vec<Template>> {
        let rows = sqlx::query_as::<_, Template>(&format!("{TEMPLATE_SELECT} ORDER BY t.name"))
            .fetch_all(db)
            .await?;
        Ok(rows)
    }

    pub async fn find_by_name(db: &PgPool, name: &str) -> anyhow::Result<Option<Template>> {
        let row = sqlx::query_as::<_, Template>(&format!("{TEMPLATE_SELECT} WHERE t.name = $1"))
            .bind(name)
            .fetch_optional(db)
            .await?;
        Ok(row)
    }

    pub async fn create(
        db: &PgPool,
        name: &str,
        author_id: Uuid,
        description: Option<&str>,
    ) -> anyhow::Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO templates (name, author_id, description) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(name)
        .bind(author_id)
        .bind(description)
        .fetch_one(db)
        .await?;
        Ok(id)
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}
